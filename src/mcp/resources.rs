//! `database://` resource URIs.
//!
//! The grammar the transport exposes:
//!
//! - `database://connections` — pool connection info
//! - `database://<pool>/schema` — full schema for that pool
//! - `database://<pool>/tables` — just the tables subset
//! - `database://<pool>/table/<name>` — one table
//! - `database://<pool>/table/<name>/profile` — table profile
//!
//! Resolution goes through the schema cache: hits are served as stored,
//! misses trigger the pool's analyzer or profiler and fill the cache.

use crate::error::{DbError, DbResult};
use crate::mcp::BrokerState;
use crate::models::ProfileOptions;
use crate::schema::CacheKey;
use serde_json::Value as JsonValue;

const URI_SCHEME: &str = "database://";

/// Parsed resource address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceTarget {
    Connections,
    Schema { pool: String },
    Tables { pool: String },
    Table { pool: String, table: String },
    Profile { pool: String, table: String },
}

impl ResourceTarget {
    /// Parse a `database://` URI. Unknown shapes are not-found errors.
    pub fn parse(uri: &str) -> DbResult<Self> {
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| DbError::internal(format!("unknown resource URI: {uri}")))?;

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["connections"] => Ok(Self::Connections),
            [pool, "schema"] => Ok(Self::Schema {
                pool: pool.to_string(),
            }),
            [pool, "tables"] => Ok(Self::Tables {
                pool: pool.to_string(),
            }),
            [pool, "table", table] => Ok(Self::Table {
                pool: pool.to_string(),
                table: table.to_string(),
            }),
            [pool, "table", table, "profile"] => Ok(Self::Profile {
                pool: pool.to_string(),
                table: table.to_string(),
            }),
            _ => Err(DbError::internal(format!("unknown resource URI: {uri}"))),
        }
    }

    pub fn uri(&self) -> String {
        match self {
            Self::Connections => format!("{URI_SCHEME}connections"),
            Self::Schema { pool } => format!("{URI_SCHEME}{pool}/schema"),
            Self::Tables { pool } => format!("{URI_SCHEME}{pool}/tables"),
            Self::Table { pool, table } => format!("{URI_SCHEME}{pool}/table/{table}"),
            Self::Profile { pool, table } => {
                format!("{URI_SCHEME}{pool}/table/{table}/profile")
            }
        }
    }
}

/// Resolve a target to its JSON payload, consulting the cache first.
pub async fn resolve(state: &BrokerState, target: &ResourceTarget) -> DbResult<JsonValue> {
    match target {
        ResourceTarget::Connections => {
            let infos = state.manager.connection_infos().await;
            serde_json::to_value(infos).map_err(|e| DbError::internal(e.to_string()))
        }
        ResourceTarget::Schema { pool } => {
            fetch_schema(state, pool).await
        }
        ResourceTarget::Tables { pool } => {
            let schema = fetch_schema(state, pool).await?;
            Ok(schema.get("tables").cloned().unwrap_or(JsonValue::Array(Vec::new())))
        }
        ResourceTarget::Table { pool, table } => {
            let key = CacheKey::table(pool, table);
            if let Some(cached) = state.cache.get(&key) {
                return Ok(cached);
            }
            let adapter = state.manager.get_connection(Some(pool)).await?;
            let info = adapter.schema_analyzer().await?.table_info(table).await?;
            state.cache.set(&key, &info)?;
            serde_json::to_value(info).map_err(|e| DbError::internal(e.to_string()))
        }
        ResourceTarget::Profile { pool, table } => {
            let key = CacheKey::profile(pool, table);
            if let Some(cached) = state.cache.get(&key) {
                return Ok(cached);
            }
            let adapter = state.manager.get_connection(Some(pool)).await?;
            let profile = adapter
                .data_profiler()
                .await?
                .profile_table(table, &ProfileOptions::default())
                .await?;
            state.cache.set(&key, &profile)?;
            serde_json::to_value(profile).map_err(|e| DbError::internal(e.to_string()))
        }
    }
}

async fn fetch_schema(state: &BrokerState, pool: &str) -> DbResult<JsonValue> {
    let key = CacheKey::schema(pool);
    if let Some(cached) = state.cache.get(&key) {
        return Ok(cached);
    }
    let adapter = state.manager.get_connection(Some(pool)).await?;
    let schema = adapter.schema_analyzer().await?.schema().await?;
    state.cache.set(&key, &schema)?;
    serde_json::to_value(schema).map_err(|e| DbError::internal(e.to_string()))
}

/// The resource listing for one registry snapshot.
pub fn list_targets(pool_names: &[String]) -> Vec<(ResourceTarget, String)> {
    let mut targets = vec![(
        ResourceTarget::Connections,
        "Configured database connections".to_string(),
    )];
    for pool in pool_names {
        targets.push((
            ResourceTarget::Schema { pool: pool.clone() },
            format!("Full schema of pool '{pool}'"),
        ));
        targets.push((
            ResourceTarget::Tables { pool: pool.clone() },
            format!("Tables of pool '{pool}'"),
        ));
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for uri in [
            "database://connections",
            "database://sales/schema",
            "database://sales/tables",
            "database://sales/table/orders",
            "database://sales/table/orders/profile",
        ] {
            let target = ResourceTarget::parse(uri).unwrap();
            assert_eq!(target.uri(), uri);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        assert!(ResourceTarget::parse("database://").is_err());
        assert!(ResourceTarget::parse("database://a/b/c/d/e").is_err());
        assert!(ResourceTarget::parse("file://x").is_err());
        assert!(ResourceTarget::parse("database://pool/unknown").is_err());
    }

    #[test]
    fn test_list_targets_per_pool() {
        let targets = list_targets(&["a".to_string(), "b".to_string()]);
        assert_eq!(targets.len(), 5);
        assert_eq!(targets[0].0, ResourceTarget::Connections);
        assert!(targets
            .iter()
            .any(|(t, _)| *t == ResourceTarget::Schema { pool: "b".to_string() }));
    }
}
