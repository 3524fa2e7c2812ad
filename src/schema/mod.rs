//! Schema introspection: per-engine analyzers and the TTL+LRU cache.

pub mod cache;
pub mod mysql;
pub mod postgres;

pub use cache::{CacheConfig, CacheKey, CacheStats, SchemaCache};
pub use mysql::MySqlSchemaAnalyzer;
pub use postgres::PostgresSchemaAnalyzer;

use crate::error::DbResult;
use crate::models::{
    ColumnInfo, DatabaseInfo, ForeignKeyInfo, IndexInfo, ProcedureInfo, RelationshipMap,
    SchemaInfo, TableInfo, TableStatistics, ViewInfo,
};

/// Engine-dispatched schema analyzer, handed out by the owning adapter.
pub enum SchemaAnalyzer {
    MySql(MySqlSchemaAnalyzer),
    Postgres(PostgresSchemaAnalyzer),
}

impl SchemaAnalyzer {
    /// Full snapshot: tables (with columns, indexes, foreign keys), views,
    /// and procedures.
    pub async fn schema(&self) -> DbResult<SchemaInfo> {
        match self {
            Self::MySql(a) => a.schema().await,
            Self::Postgres(a) => a.schema().await,
        }
    }

    pub async fn table_names(&self) -> DbResult<Vec<String>> {
        match self {
            Self::MySql(a) => a.table_names().await,
            Self::Postgres(a) => a.table_names().await,
        }
    }

    pub async fn table_info(&self, table: &str) -> DbResult<TableInfo> {
        match self {
            Self::MySql(a) => a.table_info(table).await,
            Self::Postgres(a) => a.table_info(table).await,
        }
    }

    pub async fn columns(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        match self {
            Self::MySql(a) => a.columns(table).await,
            Self::Postgres(a) => a.columns(table).await,
        }
    }

    pub async fn indexes(&self, table: &str) -> DbResult<Vec<IndexInfo>> {
        match self {
            Self::MySql(a) => a.indexes(table).await,
            Self::Postgres(a) => a.indexes(table).await,
        }
    }

    pub async fn foreign_keys(&self, table: &str) -> DbResult<Vec<ForeignKeyInfo>> {
        match self {
            Self::MySql(a) => a.foreign_keys(table).await,
            Self::Postgres(a) => a.foreign_keys(table).await,
        }
    }

    pub async fn statistics(&self, table: &str) -> DbResult<Option<TableStatistics>> {
        match self {
            Self::MySql(a) => a.statistics(table).await,
            Self::Postgres(a) => a.statistics(table).await,
        }
    }

    pub async fn views(&self) -> DbResult<Vec<ViewInfo>> {
        match self {
            Self::MySql(a) => a.views().await,
            Self::Postgres(a) => a.views().await,
        }
    }

    pub async fn procedures(&self) -> DbResult<Vec<ProcedureInfo>> {
        match self {
            Self::MySql(a) => a.procedures().await,
            Self::Postgres(a) => a.procedures().await,
        }
    }

    /// Table → distinct referenced tables, insertion-ordered. Keys are
    /// `schema.table` on PostgreSQL and bare table names on MySQL.
    pub async fn relationships(&self) -> DbResult<RelationshipMap> {
        match self {
            Self::MySql(a) => a.relationships().await,
            Self::Postgres(a) => a.relationships().await,
        }
    }

    pub async fn database_info(&self) -> DbResult<DatabaseInfo> {
        match self {
            Self::MySql(a) => a.database_info().await,
            Self::Postgres(a) => a.database_info().await,
        }
    }
}
