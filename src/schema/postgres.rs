//! PostgreSQL schema analyzer.
//!
//! `information_schema` for tables and columns, `pg_catalog` where the
//! standard views fall short: index column order comes from a lateral
//! unnest over `indkey` with ordinality, procedures from `pg_proc`, and
//! statistics from `pg_stat_user_tables` with a live `COUNT(*)` fallback.
//!
//! Scans the `public` schema by default; an explicit schema set widens it.

use crate::db::types::normalize_type;
use crate::error::DbResult;
use crate::models::{
    relationship_map_from_pairs, ColumnInfo, DatabaseInfo, DatabaseType, ForeignKeyAction,
    ForeignKeyInfo, IndexInfo, ProcedureInfo, RelationshipMap, SchemaInfo, TableInfo,
    TableStatistics, ViewInfo,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT table_schema, table_name
        FROM information_schema.tables
        WHERE table_schema = ANY($1)
          AND table_type = 'BASE TABLE'
        ORDER BY table_schema, table_name
        "#;

    pub const COLUMNS: &str = r#"
        SELECT
            c.column_name,
            c.data_type,
            c.udt_name,
            c.is_nullable,
            c.column_default,
            c.is_identity,
            c.character_maximum_length,
            c.numeric_precision,
            c.numeric_scale,
            CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS is_primary_key,
            col_description(format('%I.%I', c.table_schema, c.table_name)::regclass::oid,
                            c.ordinal_position) AS column_comment
        FROM information_schema.columns c
        LEFT JOIN (
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON kcu.constraint_name = tc.constraint_name
               AND kcu.table_schema = tc.table_schema
            WHERE tc.table_name = $1
              AND tc.table_schema = $2
              AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON pk.column_name = c.column_name
        WHERE c.table_name = $1 AND c.table_schema = $2
        ORDER BY c.ordinal_position
        "#;

    pub const INDEXES: &str = r#"
        SELECT
            i.relname AS index_name,
            a.attname AS column_name,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary,
            am.amname AS index_type,
            k.ord
        FROM pg_index ix
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        LEFT JOIN pg_am am ON am.oid = i.relam
        CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE t.relname = $1 AND n.nspname = $2
        ORDER BY i.relname, k.ord
        "#;

    pub const FOREIGN_KEYS: &str = r#"
        SELECT
            tc.constraint_name,
            kcu.column_name,
            ref_kcu.table_schema AS referenced_schema,
            ref_kcu.table_name AS referenced_table,
            ref_kcu.column_name AS referenced_column,
            rc.update_rule,
            rc.delete_rule
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_name = tc.constraint_name
           AND kcu.table_schema = tc.table_schema
        JOIN information_schema.referential_constraints rc
            ON rc.constraint_name = tc.constraint_name
           AND rc.constraint_schema = tc.table_schema
        JOIN information_schema.key_column_usage ref_kcu
            ON ref_kcu.constraint_name = rc.unique_constraint_name
           AND ref_kcu.constraint_schema = rc.unique_constraint_schema
           AND ref_kcu.ordinal_position = kcu.position_in_unique_constraint
        WHERE tc.table_name = $1
          AND tc.table_schema = $2
          AND tc.constraint_type = 'FOREIGN KEY'
        ORDER BY tc.constraint_name, kcu.ordinal_position
        "#;

    pub const STATISTICS: &str = r#"
        SELECT
            s.n_live_tup AS row_count,
            pg_total_relation_size(format('%I.%I', $2, $1)::regclass) AS total_size
        FROM pg_stat_user_tables s
        WHERE s.relname = $1 AND s.schemaname = $2
        "#;

    pub const VIEWS: &str = r#"
        SELECT table_schema, table_name, view_definition
        FROM information_schema.views
        WHERE table_schema = ANY($1)
        ORDER BY table_schema, table_name
        "#;

    pub const PROCEDURES: &str = r#"
        SELECT
            p.proname AS name,
            n.nspname AS schema,
            CASE p.prokind WHEN 'p' THEN 'procedure' ELSE 'function' END AS kind,
            pg_get_function_arguments(p.oid) AS parameters,
            pg_get_function_result(p.oid) AS return_type
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE n.nspname = ANY($1)
          AND p.prokind IN ('f', 'p')
        ORDER BY n.nspname, p.proname
        "#;

    pub const RELATIONSHIPS: &str = r#"
        SELECT
            tc.table_schema || '.' || tc.table_name AS table_key,
            ccu.table_schema || '.' || ccu.table_name AS referenced_key
        FROM information_schema.table_constraints tc
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
           AND ccu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
          AND tc.table_schema = ANY($1)
        ORDER BY tc.table_schema, tc.table_name, tc.constraint_name
        "#;

    pub const DATABASE_INFO: &str = r#"
        SELECT
            current_database() AS name,
            version() AS version,
            pg_database_size(current_database()) AS size_bytes,
            pg_encoding_to_char(d.encoding) AS encoding,
            d.datcollate AS collation
        FROM pg_database d
        WHERE d.datname = current_database()
        "#;
}

pub struct PostgresSchemaAnalyzer {
    pool: PgPool,
    database: String,
    schemas: Vec<String>,
}

impl PostgresSchemaAnalyzer {
    pub fn new(pool: PgPool, database: String) -> Self {
        Self {
            pool,
            database,
            schemas: vec!["public".to_string()],
        }
    }

    /// Widen the scan beyond `public`.
    pub fn with_schemas(mut self, schemas: Vec<String>) -> Self {
        if !schemas.is_empty() {
            self.schemas = schemas;
        }
        self
    }

    pub async fn schema(&self) -> DbResult<SchemaInfo> {
        let mut tables = Vec::new();
        for (schema, name) in self.qualified_table_names().await? {
            tables.push(self.table_info_in(&schema, &name).await?);
        }
        Ok(SchemaInfo {
            tables,
            views: self.views().await?,
            procedures: self.procedures().await?,
        })
    }

    pub async fn table_names(&self) -> DbResult<Vec<String>> {
        Ok(self
            .qualified_table_names()
            .await?
            .into_iter()
            .map(|(_, name)| name)
            .collect())
    }

    async fn qualified_table_names(&self) -> DbResult<Vec<(String, String)>> {
        let rows = sqlx::query(queries::LIST_TABLES)
            .bind(&self.schemas)
            .fetch_all(&self.pool)
            .await?;
        let names: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r.get("table_schema"), r.get("table_name")))
            .collect();
        debug!(db = %self.database, count = names.len(), "listed PostgreSQL tables");
        Ok(names)
    }

    /// Table info for a bare name, resolved against the schema set in order.
    pub async fn table_info(&self, table: &str) -> DbResult<TableInfo> {
        let schema = self.resolve_schema(table).await?;
        self.table_info_in(&schema, table).await
    }

    async fn resolve_schema(&self, table: &str) -> DbResult<String> {
        if let Some((schema, _)) = table.split_once('.') {
            return Ok(schema.to_string());
        }
        for schema in &self.schemas {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
            )
            .bind(schema)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
            if exists.is_some() {
                return Ok(schema.clone());
            }
        }
        Ok(self.schemas[0].clone())
    }

    async fn table_info_in(&self, schema: &str, table: &str) -> DbResult<TableInfo> {
        let bare = table.split_once('.').map(|(_, t)| t).unwrap_or(table);
        let columns = self.columns_in(schema, bare).await?;
        let indexes = self.indexes_in(schema, bare).await?;
        let foreign_keys = self.foreign_keys_in(schema, bare).await?;
        let stats = self.statistics_in(schema, bare).await?;

        let mut info = TableInfo::new(bare);
        info.schema = Some(schema.to_string());
        info.columns = columns;
        info.indexes = indexes;
        info.foreign_keys = foreign_keys;
        if let Some(stats) = stats {
            info.row_count = stats.row_count;
            info.size_in_bytes = stats.data_length;
        }
        Ok(info)
    }

    pub async fn columns(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let schema = self.resolve_schema(table).await?;
        let bare = table.split_once('.').map(|(_, t)| t).unwrap_or(table);
        self.columns_in(&schema, bare).await
    }

    async fn columns_in(&self, schema: &str, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(queries::COLUMNS)
            .bind(table)
            .bind(schema)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let data_type: String = row.get("data_type");
                let udt_name: String = row.get("udt_name");
                let nullable: String = row.get("is_nullable");
                let default_value: Option<String> =
                    row.try_get("column_default").ok().flatten();
                let is_identity: String = row.get("is_identity");

                let normalized = normalize_type(&data_type, DatabaseType::Postgres);
                let is_serial = default_value
                    .as_deref()
                    .map(|d| d.starts_with("nextval("))
                    .unwrap_or(false);

                let mut col = ColumnInfo::new(name, normalized.as_str(), nullable == "YES");
                col.native_type = Some(udt_name);
                col.is_primary_key = row.get("is_primary_key");
                col.is_auto_increment = is_serial || is_identity == "YES";
                col.default_value = default_value;
                col.max_length = row
                    .try_get::<Option<i32>, _>("character_maximum_length")
                    .ok()
                    .flatten()
                    .map(|v| v as u64);
                col.precision = row
                    .try_get::<Option<i32>, _>("numeric_precision")
                    .ok()
                    .flatten()
                    .map(|v| v as u32);
                col.scale = row
                    .try_get::<Option<i32>, _>("numeric_scale")
                    .ok()
                    .flatten()
                    .map(|v| v as u32);
                col.comment = row
                    .try_get::<Option<String>, _>("column_comment")
                    .ok()
                    .flatten()
                    .filter(|c| !c.is_empty());
                col
            })
            .collect())
    }

    pub async fn indexes(&self, table: &str) -> DbResult<Vec<IndexInfo>> {
        let schema = self.resolve_schema(table).await?;
        let bare = table.split_once('.').map(|(_, t)| t).unwrap_or(table);
        self.indexes_in(&schema, bare).await
    }

    async fn indexes_in(&self, schema: &str, table: &str) -> DbResult<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::INDEXES)
            .bind(table)
            .bind(schema)
            .fetch_all(&self.pool)
            .await?;

        // Ordered by (index_name, ordinal); fold preserving column order.
        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let name: String = row.get("index_name");
            let column: String = row.get("column_name");

            let extends_last = indexes.last().is_some_and(|last| last.name == name);
            if extends_last {
                if let Some(last) = indexes.last_mut() {
                    last.columns.push(column);
                }
            } else {
                indexes.push(IndexInfo {
                    name,
                    columns: vec![column],
                    is_unique: row.get("is_unique"),
                    is_primary: row.get("is_primary"),
                    index_type: row
                        .try_get::<Option<String>, _>("index_type")
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| "btree".to_string())
                        .to_uppercase(),
                });
            }
        }
        Ok(indexes)
    }

    pub async fn foreign_keys(&self, table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        let schema = self.resolve_schema(table).await?;
        let bare = table.split_once('.').map(|(_, t)| t).unwrap_or(table);
        self.foreign_keys_in(&schema, bare).await
    }

    async fn foreign_keys_in(&self, schema: &str, table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        let rows = sqlx::query(queries::FOREIGN_KEYS)
            .bind(table)
            .bind(schema)
            .fetch_all(&self.pool)
            .await?;

        let mut fks: Vec<ForeignKeyInfo> = Vec::new();
        for row in &rows {
            let name: String = row.get("constraint_name");
            let column: String = row.get("column_name");
            let referenced_column: String = row.get("referenced_column");

            let extends_last = fks.last().is_some_and(|last| last.name == name);
            if extends_last {
                if let Some(last) = fks.last_mut() {
                    last.columns.push(column);
                    last.referenced_columns.push(referenced_column);
                }
            } else {
                let ref_schema: String = row.get("referenced_schema");
                let ref_table: String = row.get("referenced_table");
                fks.push(ForeignKeyInfo {
                    name,
                    columns: vec![column],
                    referenced_table: format!("{ref_schema}.{ref_table}"),
                    referenced_columns: vec![referenced_column],
                    on_update: ForeignKeyAction::parse(&row.get::<String, _>("update_rule")),
                    on_delete: ForeignKeyAction::parse(&row.get::<String, _>("delete_rule")),
                });
            }
        }
        Ok(fks)
    }

    pub async fn statistics(&self, table: &str) -> DbResult<Option<TableStatistics>> {
        let schema = self.resolve_schema(table).await?;
        let bare = table.split_once('.').map(|(_, t)| t).unwrap_or(table);
        self.statistics_in(&schema, bare).await
    }

    async fn statistics_in(&self, schema: &str, table: &str) -> DbResult<Option<TableStatistics>> {
        let row = sqlx::query(queries::STATISTICS)
            .bind(table)
            .bind(schema)
            .fetch_optional(&self.pool)
            .await?;

        let (row_count, total_size) = match row {
            Some(row) => (
                row.try_get::<Option<i64>, _>("row_count").ok().flatten(),
                row.try_get::<Option<i64>, _>("total_size").ok().flatten(),
            ),
            None => (None, None),
        };

        // The stats collector lags behind; fall back to a live count when
        // it has nothing for this table.
        let row_count = match row_count {
            Some(n) => Some(n as u64),
            None => {
                let count: i64 = sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {}.{}",
                    quote_ident(schema),
                    quote_ident(table)
                ))
                .fetch_one(&self.pool)
                .await?;
                Some(count as u64)
            }
        };

        Ok(Some(TableStatistics {
            table_name: table.to_string(),
            row_count,
            data_length: total_size.map(|v| v as u64),
            index_length: None,
            engine: None,
            auto_increment: None,
            created_at: None,
            updated_at: None,
        }))
    }

    pub async fn views(&self) -> DbResult<Vec<ViewInfo>> {
        let rows = sqlx::query(queries::VIEWS)
            .bind(&self.schemas)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ViewInfo {
                name: row.get("table_name"),
                schema: Some(row.get("table_schema")),
                definition: row
                    .try_get::<Option<String>, _>("view_definition")
                    .ok()
                    .flatten(),
            })
            .collect())
    }

    /// Functions and procedures (`prokind` f/p), parameter lists rendered
    /// by `pg_get_function_arguments`.
    pub async fn procedures(&self) -> DbResult<Vec<ProcedureInfo>> {
        let rows = sqlx::query(queries::PROCEDURES)
            .bind(&self.schemas)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ProcedureInfo {
                name: row.get("name"),
                schema: Some(row.get("schema")),
                kind: row.get("kind"),
                parameters: row
                    .try_get::<Option<String>, _>("parameters")
                    .ok()
                    .flatten()
                    .filter(|p| !p.is_empty()),
                return_type: row
                    .try_get::<Option<String>, _>("return_type")
                    .ok()
                    .flatten(),
            })
            .collect())
    }

    /// Table → referenced tables, keyed by `schema.table`.
    pub async fn relationships(&self) -> DbResult<RelationshipMap> {
        let rows = sqlx::query(queries::RELATIONSHIPS)
            .bind(&self.schemas)
            .fetch_all(&self.pool)
            .await?;
        Ok(relationship_map_from_pairs(rows.iter().map(|row| {
            (
                row.get::<String, _>("table_key"),
                row.get::<String, _>("referenced_key"),
            )
        })))
    }

    pub async fn database_info(&self) -> DbResult<DatabaseInfo> {
        let row = sqlx::query(queries::DATABASE_INFO)
            .fetch_one(&self.pool)
            .await?;
        let table_count = self.qualified_table_names().await?.len();

        Ok(DatabaseInfo {
            name: row.get("name"),
            version: row.get("version"),
            size_bytes: row
                .try_get::<Option<i64>, _>("size_bytes")
                .ok()
                .flatten()
                .map(|v| v as u64),
            encoding: row.try_get::<Option<String>, _>("encoding").ok().flatten(),
            collation: row
                .try_get::<Option<String>, _>("collation")
                .ok()
                .flatten(),
            table_count,
        })
    }
}

/// Double-quote an identifier, escaping embedded quotes.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
