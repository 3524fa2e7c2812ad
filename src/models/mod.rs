//! Data models shared across the broker.

pub mod connection;
pub mod profile;
pub mod query;
pub mod schema;

pub use connection::{
    AdapterMetrics, ConnectionInfo, ConnectionStatus, DatabaseType, HealthStatus, PoolConfig,
    PoolOptions, RetryOptions, SslConfig, SslMode,
};
pub use profile::{
    ColumnProfile, DataQuality, ProfileOptions, SamplingInfo, TableProfile, TableRelationships,
    TopValue,
};
pub use query::{
    AuditEntry, Complexity, FieldInfo, QueryAnalysis, QueryOptions, QueryParam, QueryResult,
    SecurityConfig, SqlRow, AUDIT_QUERY_MAX_CHARS, AUDIT_RING_CAPACITY,
    DEFAULT_MAX_EXECUTION_TIME_MS, DEFAULT_MAX_QUERY_LENGTH, DEFAULT_MAX_ROWS,
};
pub use schema::{
    relationship_map_from_pairs, ColumnInfo, DatabaseInfo, ForeignKeyAction, ForeignKeyInfo,
    IndexInfo, ProcedureInfo, RelationshipMap, SchemaInfo, TableInfo, TableStatistics, ViewInfo,
};
