//! MySQL schema analyzer.
//!
//! Everything comes from `INFORMATION_SCHEMA`, scoped to the connected
//! database. Index columns keep their `SEQ_IN_INDEX` order and foreign
//! keys group by constraint name with ordinal column order. System-prefixed
//! tables (`mysql_*`, `sys_*`) are excluded by default.
//!
//! MySQL can hand strings back as VARBINARY depending on the connection
//! charset, so the readers go through byte-tolerant accessors.

use crate::db::types::normalize_type;
use crate::error::DbResult;
use crate::models::{
    relationship_map_from_pairs, ColumnInfo, DatabaseInfo, DatabaseType, ForeignKeyAction,
    ForeignKeyInfo, IndexInfo, ProcedureInfo, RelationshipMap, SchemaInfo, TableInfo,
    TableStatistics, ViewInfo,
};
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;
use tracing::debug;

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = ?
          AND TABLE_TYPE = 'BASE TABLE'
          AND TABLE_NAME NOT LIKE 'mysql\_%'
          AND TABLE_NAME NOT LIKE 'sys\_%'
        ORDER BY TABLE_NAME
        "#;

    pub const COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(DATA_TYPE USING utf8) AS DATA_TYPE,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8) AS EXTRA,
            CHARACTER_MAXIMUM_LENGTH,
            NUMERIC_PRECISION,
            NUMERIC_SCALE,
            CONVERT(COLUMN_COMMENT USING utf8) AS COLUMN_COMMENT
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#;

    pub const INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            NOT NON_UNIQUE AS IS_UNIQUE,
            CONVERT(INDEX_TYPE USING utf8) AS INDEX_TYPE
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;

    pub const FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(kcu.CONSTRAINT_NAME USING utf8) AS CONSTRAINT_NAME,
            CONVERT(kcu.COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(kcu.REFERENCED_TABLE_NAME USING utf8) AS REFERENCED_TABLE_NAME,
            CONVERT(kcu.REFERENCED_COLUMN_NAME USING utf8) AS REFERENCED_COLUMN_NAME,
            CONVERT(rc.UPDATE_RULE USING utf8) AS UPDATE_RULE,
            CONVERT(rc.DELETE_RULE USING utf8) AS DELETE_RULE
        FROM information_schema.KEY_COLUMN_USAGE kcu
        JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
            ON rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
           AND rc.CONSTRAINT_SCHEMA = kcu.TABLE_SCHEMA
        WHERE kcu.TABLE_SCHEMA = ?
          AND kcu.TABLE_NAME = ?
          AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#;

    pub const STATISTICS: &str = r#"
        SELECT
            TABLE_ROWS,
            DATA_LENGTH,
            INDEX_LENGTH,
            CONVERT(ENGINE USING utf8) AS ENGINE,
            AUTO_INCREMENT,
            CREATE_TIME,
            UPDATE_TIME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        "#;

    pub const VIEWS: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
            CONVERT(VIEW_DEFINITION USING utf8) AS VIEW_DEFINITION
        FROM information_schema.VIEWS
        WHERE TABLE_SCHEMA = ?
        ORDER BY TABLE_NAME
        "#;

    pub const PROCEDURES: &str = r#"
        SELECT
            CONVERT(ROUTINE_NAME USING utf8) AS ROUTINE_NAME,
            CONVERT(ROUTINE_TYPE USING utf8) AS ROUTINE_TYPE,
            CONVERT(DTD_IDENTIFIER USING utf8) AS DTD_IDENTIFIER
        FROM information_schema.ROUTINES
        WHERE ROUTINE_SCHEMA = ?
        ORDER BY ROUTINE_NAME
        "#;

    pub const RELATIONSHIPS: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
            CONVERT(REFERENCED_TABLE_NAME USING utf8) AS REFERENCED_TABLE_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = ?
          AND REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY TABLE_NAME, CONSTRAINT_NAME, ORDINAL_POSITION
        "#;

    pub const DATABASE_SIZE: &str = r#"
        SELECT
            CAST(COALESCE(SUM(DATA_LENGTH + COALESCE(INDEX_LENGTH, 0)), 0) AS UNSIGNED)
                AS TOTAL_SIZE,
            COUNT(*) AS TABLE_COUNT
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
        "#;
}

/// String accessor tolerant of VARBINARY-typed catalog columns.
fn get_string(row: &MySqlRow, column: &str) -> String {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .unwrap_or_default()
}

fn get_opt_string(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .filter(|s| !s.is_empty())
}

/// MySQL 5.x reports BIGINT, 8.x BIGINT UNSIGNED; accept both.
fn get_u64(row: &MySqlRow, column: &str) -> Option<u64> {
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(column) {
        return Some(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(column) {
        return Some(v as u64);
    }
    None
}

pub struct MySqlSchemaAnalyzer {
    pool: MySqlPool,
    database: String,
}

impl MySqlSchemaAnalyzer {
    pub fn new(pool: MySqlPool, database: String) -> Self {
        Self { pool, database }
    }

    pub async fn schema(&self) -> DbResult<SchemaInfo> {
        let mut tables = Vec::new();
        for name in self.table_names().await? {
            tables.push(self.table_info(&name).await?);
        }
        Ok(SchemaInfo {
            tables,
            views: self.views().await?,
            procedures: self.procedures().await?,
        })
    }

    pub async fn table_names(&self) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::LIST_TABLES)
            .bind(&self.database)
            .fetch_all(&self.pool)
            .await?;
        let names = rows
            .iter()
            .map(|r| get_string(r, "TABLE_NAME"))
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>();
        debug!(db = %self.database, count = names.len(), "listed MySQL tables");
        Ok(names)
    }

    pub async fn table_info(&self, table: &str) -> DbResult<TableInfo> {
        let columns = self.columns(table).await?;
        let indexes = self.indexes(table).await?;
        let foreign_keys = self.foreign_keys(table).await?;
        let stats = self.statistics(table).await?;

        let mut info = TableInfo::new(table);
        info.columns = columns;
        info.indexes = indexes;
        info.foreign_keys = foreign_keys;
        if let Some(stats) = stats {
            info.row_count = stats.row_count;
            info.size_in_bytes = match (stats.data_length, stats.index_length) {
                (Some(d), Some(i)) => Some(d + i),
                (Some(d), None) => Some(d),
                _ => None,
            };
        }
        Ok(info)
    }

    pub async fn columns(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(queries::COLUMNS)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "COLUMN_NAME");
                let data_type = get_string(row, "DATA_TYPE");
                let normalized = normalize_type(&data_type, DatabaseType::MySql);
                let extra = get_string(row, "EXTRA");

                let mut col = ColumnInfo::new(
                    name,
                    normalized.as_str(),
                    get_string(row, "IS_NULLABLE") == "YES",
                );
                col.native_type = Some(get_string(row, "COLUMN_TYPE"));
                col.default_value = get_opt_string(row, "COLUMN_DEFAULT");
                col.is_primary_key = get_string(row, "COLUMN_KEY") == "PRI";
                col.is_auto_increment = extra.contains("auto_increment");
                col.max_length = get_u64(row, "CHARACTER_MAXIMUM_LENGTH");
                col.precision = get_u64(row, "NUMERIC_PRECISION").map(|v| v as u32);
                col.scale = get_u64(row, "NUMERIC_SCALE").map(|v| v as u32);
                col.comment = get_opt_string(row, "COLUMN_COMMENT");
                col
            })
            .collect())
    }

    pub async fn indexes(&self, table: &str) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::INDEXES)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        // Rows arrive ordered by (INDEX_NAME, SEQ_IN_INDEX); fold them into
        // one entry per index with columns in definition order.
        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let name = get_string(row, "INDEX_NAME");
            let column = get_string(row, "COLUMN_NAME");
            let is_unique = row
                .try_get::<i64, _>("IS_UNIQUE")
                .map(|v| v != 0)
                .unwrap_or(false);
            let index_type = get_string(row, "INDEX_TYPE");

            let extends_last = indexes.last().is_some_and(|last| last.name == name);
            if extends_last {
                if let Some(last) = indexes.last_mut() {
                    last.columns.push(column);
                }
            } else {
                indexes.push(IndexInfo {
                    is_primary: name == "PRIMARY",
                    name,
                    columns: vec![column],
                    is_unique,
                    index_type,
                });
            }
        }
        Ok(indexes)
    }

    pub async fn foreign_keys(&self, table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        let rows = sqlx::query(queries::FOREIGN_KEYS)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut fks: Vec<ForeignKeyInfo> = Vec::new();
        for row in &rows {
            let name = get_string(row, "CONSTRAINT_NAME");
            let column = get_string(row, "COLUMN_NAME");
            let referenced_column = get_string(row, "REFERENCED_COLUMN_NAME");

            let extends_last = fks.last().is_some_and(|last| last.name == name);
            if extends_last {
                if let Some(last) = fks.last_mut() {
                    last.columns.push(column);
                    last.referenced_columns.push(referenced_column);
                }
            } else {
                fks.push(ForeignKeyInfo {
                    name,
                    columns: vec![column],
                    referenced_table: get_string(row, "REFERENCED_TABLE_NAME"),
                    referenced_columns: vec![referenced_column],
                    on_update: ForeignKeyAction::parse(&get_string(row, "UPDATE_RULE")),
                    on_delete: ForeignKeyAction::parse(&get_string(row, "DELETE_RULE")),
                });
            }
        }
        Ok(fks)
    }

    pub async fn statistics(&self, table: &str) -> DbResult<Option<TableStatistics>> {
        let row = sqlx::query(queries::STATISTICS)
            .bind(&self.database)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| TableStatistics {
            table_name: table.to_string(),
            row_count: get_u64(&row, "TABLE_ROWS"),
            data_length: get_u64(&row, "DATA_LENGTH"),
            index_length: get_u64(&row, "INDEX_LENGTH"),
            engine: get_opt_string(&row, "ENGINE"),
            auto_increment: get_u64(&row, "AUTO_INCREMENT"),
            created_at: row
                .try_get::<Option<NaiveDateTime>, _>("CREATE_TIME")
                .ok()
                .flatten()
                .map(|t| t.and_utc()),
            updated_at: row
                .try_get::<Option<NaiveDateTime>, _>("UPDATE_TIME")
                .ok()
                .flatten()
                .map(|t| t.and_utc()),
        }))
    }

    pub async fn views(&self) -> DbResult<Vec<ViewInfo>> {
        let rows = sqlx::query(queries::VIEWS)
            .bind(&self.database)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ViewInfo {
                name: get_string(row, "TABLE_NAME"),
                schema: None,
                definition: get_opt_string(row, "VIEW_DEFINITION"),
            })
            .collect())
    }

    pub async fn procedures(&self) -> DbResult<Vec<ProcedureInfo>> {
        let rows = sqlx::query(queries::PROCEDURES)
            .bind(&self.database)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ProcedureInfo {
                name: get_string(row, "ROUTINE_NAME"),
                schema: None,
                kind: get_string(row, "ROUTINE_TYPE").to_lowercase(),
                parameters: None,
                return_type: get_opt_string(row, "DTD_IDENTIFIER"),
            })
            .collect())
    }

    /// Table → referenced tables, keyed by bare table name.
    pub async fn relationships(&self) -> DbResult<RelationshipMap> {
        let rows = sqlx::query(queries::RELATIONSHIPS)
            .bind(&self.database)
            .fetch_all(&self.pool)
            .await?;
        Ok(relationship_map_from_pairs(rows.iter().map(|row| {
            (
                get_string(row, "TABLE_NAME"),
                get_string(row, "REFERENCED_TABLE_NAME"),
            )
        })))
    }

    pub async fn database_info(&self) -> DbResult<DatabaseInfo> {
        let version: String = sqlx::query_scalar("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await?;

        let row = sqlx::query(queries::DATABASE_SIZE)
            .bind(&self.database)
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseInfo {
            name: self.database.clone(),
            version,
            size_bytes: get_u64(&row, "TOTAL_SIZE"),
            encoding: None,
            collation: None,
            table_count: get_u64(&row, "TABLE_COUNT").unwrap_or(0) as usize,
        })
    }
}
