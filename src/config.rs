//! Configuration: CLI flags, the multi-pool document, and environment
//! mapping.
//!
//! Three sources, in mode order:
//!
//! 1. A JSON multi-pool document (`--config` / `DB_CONFIG_FILE`):
//!    `{ "connections": { name: entry, ... }, "defaultConnection": name? }`.
//!    Its presence switches the process to multi-pool mode and skips the
//!    legacy single-pool validation.
//! 2. `DB_<NAME>_<PROPERTY>` environment variables building named pools,
//!    with `DB_DEFAULT_CONNECTION` for the default.
//! 3. Legacy `MYSQL_*` / `POSTGRES_*` variables producing synthetic pools
//!    named `mysql` and `postgresql`.
//!
//! Environment is always passed in as an explicit iterator so tests can
//! isolate process-wide state.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PoolConfig, SslConfig, SslMode};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// HTTP with SSE streaming (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Command-line configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-broker-mcp",
    about = "MCP broker over a named fleet of read-only MySQL/PostgreSQL pools",
    version
)]
pub struct Cli {
    /// Path to a JSON multi-pool configuration document.
    #[arg(short, long, value_name = "FILE", env = "DB_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Transport mode (stdio or http)
    #[arg(short, long, value_enum, default_value = "stdio", env = "MCP_TRANSPORT")]
    pub transport: TransportMode,

    /// HTTP host to bind to (http transport only)
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "MCP_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to (http transport only)
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "MCP_HTTP_PORT")]
    pub http_port: u16,

    /// MCP endpoint path (http transport only)
    #[arg(long, default_value = DEFAULT_MCP_ENDPOINT, env = "MCP_ENDPOINT")]
    pub mcp_endpoint: String,

    /// Default per-statement timeout in milliseconds
    #[arg(long, default_value_t = crate::models::DEFAULT_MAX_EXECUTION_TIME_MS, env = "MCP_QUERY_TIMEOUT_MS")]
    pub query_timeout_ms: u64,

    /// Default row cap per query
    #[arg(long, default_value_t = crate::models::DEFAULT_MAX_ROWS, env = "MCP_MAX_ROWS")]
    pub max_rows: usize,

    /// Prefetch schema, relationships, and small-table profiles into the
    /// cache after connecting
    #[arg(long, env = "MCP_WARM_CACHE")]
    pub warm_cache: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

/// The multi-pool document shape on disk.
#[derive(Debug, Clone, Deserialize)]
struct MultiPoolDocument {
    connections: HashMap<String, PoolConfig>,
    #[serde(default, alias = "defaultConnection")]
    default_connection: Option<String>,
}

/// Resolved pool fleet plus the default selection.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    pub pools: Vec<PoolConfig>,
    pub default_connection: Option<String>,
}

/// Recognized `DB_<NAME>_<PROPERTY>` suffixes, longest first so
/// `CONNECTION_TIMEOUT` wins over `TIMEOUT`-ish lookalikes.
const ENV_PROPERTIES: &[&str] = &[
    "CONNECTION_TIMEOUT",
    "CONNECTION_LIMIT",
    "IDLE_TIMEOUT",
    "DESCRIPTION",
    "DATABASE",
    "PASSWORD",
    "SSL_MODE",
    "SSL_CA",
    "HOST",
    "PORT",
    "USER",
    "TAGS",
    "TYPE",
    "DB",
];

impl BrokerConfig {
    /// Load from the configured source. A config file selects multi-pool
    /// mode; otherwise `DB_*` variables, then the legacy single-pool set.
    pub fn load(cli: &Cli) -> DbResult<Self> {
        let env: Vec<(String, String)> = std::env::vars().collect();
        match &cli.config {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::from_env(env.iter().cloned())?;
                if !config.pools.is_empty() {
                    Ok(config)
                } else {
                    Self::legacy_from_env(env.into_iter())
                }
            }
        }
    }

    /// Parse the JSON multi-pool document.
    pub fn from_file(path: &std::path::Path) -> DbResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let document: MultiPoolDocument = serde_json::from_str(&raw)
            .map_err(|e| DbError::config(format!("invalid config file: {e}")))?;

        let mut pools: Vec<PoolConfig> = document
            .connections
            .into_iter()
            .map(|(name, mut pool)| {
                pool.name = name;
                pool
            })
            .collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));

        let config = Self {
            pools,
            default_connection: document.default_connection,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build pools from `DB_<NAME>_<PROPERTY>` variables.
    pub fn from_env<I>(vars: I) -> DbResult<Self>
    where
        I: Iterator<Item = (String, String)>,
    {
        let mut entries: HashMap<String, PoolConfig> = HashMap::new();
        let mut default_connection = None;

        for (key, value) in vars {
            let Some(rest) = key.strip_prefix("DB_") else {
                continue;
            };
            if key == "DB_CONFIG_FILE" {
                continue;
            }
            if key == "DB_DEFAULT_CONNECTION" {
                default_connection = Some(value.to_lowercase());
                continue;
            }

            let Some((name, property)) = split_env_key(rest) else {
                continue;
            };
            let pool = entries
                .entry(name.to_lowercase())
                .or_insert_with(|| PoolConfig::new(name.to_lowercase(), "", "", "", ""));
            apply_property(pool, property, &value)?;
        }

        let mut pools: Vec<PoolConfig> = entries.into_values().collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));

        let config = Self {
            pools,
            default_connection,
        };
        if !config.pools.is_empty() {
            config.validate()?;
        }
        Ok(config)
    }

    /// Legacy single-pool mode: `MYSQL_*` and `POSTGRES_*` variables
    /// produce synthetic pools named `mysql` and `postgresql`.
    pub fn legacy_from_env<I>(vars: I) -> DbResult<Self>
    where
        I: Iterator<Item = (String, String)>,
    {
        let mut mysql: Option<PoolConfig> = None;
        let mut postgres: Option<PoolConfig> = None;

        for (key, value) in vars {
            let (pool, property) = if let Some(prop) = key.strip_prefix("MYSQL_") {
                (
                    mysql.get_or_insert_with(|| {
                        let mut p = PoolConfig::new("mysql", "", "", "", "");
                        p.db_type = Some(DatabaseType::MySql);
                        p
                    }),
                    prop.to_string(),
                )
            } else if let Some(prop) = key.strip_prefix("POSTGRES_") {
                (
                    postgres.get_or_insert_with(|| {
                        let mut p = PoolConfig::new("postgresql", "", "", "", "");
                        p.db_type = Some(DatabaseType::Postgres);
                        p
                    }),
                    prop.to_string(),
                )
            } else {
                continue;
            };

            apply_property(pool, &property, &value)?;
        }

        let pools: Vec<PoolConfig> = [mysql, postgres].into_iter().flatten().collect();
        let default_connection = pools.first().map(|p| p.name.clone());

        let config = Self {
            pools,
            default_connection,
        };
        if !config.pools.is_empty() {
            config.validate()?;
        }
        Ok(config)
    }

    /// Fatal-at-startup checks: per-pool field presence, unique names, and
    /// a known default.
    pub fn validate(&self) -> DbResult<()> {
        if self.pools.is_empty() {
            return Err(DbError::config("no database pools configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for pool in &self.pools {
            pool.validate().map_err(DbError::config)?;
            if !seen.insert(pool.name.as_str()) {
                return Err(DbError::config(format!(
                    "duplicate pool name '{}'",
                    pool.name
                )));
            }
        }

        if let Some(default) = &self.default_connection {
            if !self.pools.iter().any(|p| &p.name == default) {
                return Err(DbError::config(format!(
                    "default connection '{default}' is not a configured pool"
                )));
            }
        }
        Ok(())
    }
}

/// Split `<NAME>_<PROPERTY>` on the longest recognized property suffix.
/// Pool names may themselves contain underscores.
fn split_env_key(rest: &str) -> Option<(&str, &str)> {
    for property in ENV_PROPERTIES {
        if let Some(name) = rest.strip_suffix(property) {
            let name = name.strip_suffix('_')?;
            if !name.is_empty() {
                return Some((name, property));
            }
        }
    }
    None
}

fn apply_property(pool: &mut PoolConfig, property: &str, value: &str) -> DbResult<()> {
    match property {
        "HOST" => pool.host = value.to_string(),
        "PORT" => {
            pool.port = Some(value.parse().map_err(|_| {
                DbError::config(format!("pool '{}': invalid port '{value}'", pool.name))
            })?)
        }
        "USER" => pool.user = value.to_string(),
        "PASSWORD" => pool.password = value.to_string(),
        "DATABASE" | "DB" => pool.database = value.to_string(),
        "TYPE" => {
            pool.db_type = Some(DatabaseType::parse(value).ok_or_else(|| {
                DbError::config(format!(
                    "pool '{}': unknown database type '{value}'",
                    pool.name
                ))
            })?)
        }
        "DESCRIPTION" => pool.description = Some(value.to_string()),
        "TAGS" => {
            pool.tags = value
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        }
        "SSL_MODE" => {
            let mode = SslMode::parse(value).ok_or_else(|| {
                DbError::config(format!("pool '{}': unknown SSL mode '{value}'", pool.name))
            })?;
            pool.ssl.get_or_insert_with(SslConfig::default).mode = mode;
        }
        "SSL_CA" => {
            pool.ssl.get_or_insert_with(SslConfig::default).ca = Some(value.to_string());
        }
        "CONNECTION_TIMEOUT" => {
            pool.connection_timeout_ms = Some(parse_ms(pool, "CONNECTION_TIMEOUT", value)?)
        }
        "CONNECTION_LIMIT" => {
            pool.connection_limit = Some(value.parse().map_err(|_| {
                DbError::config(format!(
                    "pool '{}': invalid connection limit '{value}'",
                    pool.name
                ))
            })?)
        }
        "IDLE_TIMEOUT" => pool.idle_timeout_ms = Some(parse_ms(pool, "IDLE_TIMEOUT", value)?),
        _ => {}
    }
    Ok(())
}

fn parse_ms(pool: &PoolConfig, property: &str, value: &str) -> DbResult<u64> {
    value.parse().map_err(|_| {
        DbError::config(format!(
            "pool '{}': invalid {property} '{value}'",
            pool.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = (String, String)> + 'a {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
    }

    #[test]
    fn test_split_env_key() {
        assert_eq!(split_env_key("SALES_HOST"), Some(("SALES", "HOST")));
        assert_eq!(
            split_env_key("SALES_CONNECTION_TIMEOUT"),
            Some(("SALES", "CONNECTION_TIMEOUT"))
        );
        // Pool names may contain underscores.
        assert_eq!(split_env_key("MY_POOL_PORT"), Some(("MY_POOL", "PORT")));
        assert_eq!(split_env_key("HOST"), None);
        assert_eq!(split_env_key("X_UNKNOWN"), None);
    }

    #[test]
    fn test_from_env_builds_pools() {
        let config = BrokerConfig::from_env(env(&[
            ("DB_SALES_HOST", "db1.example.com"),
            ("DB_SALES_PORT", "3306"),
            ("DB_SALES_USER", "reader"),
            ("DB_SALES_PASSWORD", "secret"),
            ("DB_SALES_DATABASE", "sales"),
            ("DB_SALES_TAGS", "prod, reporting"),
            ("DB_ANALYTICS_HOST", "db2.example.com"),
            ("DB_ANALYTICS_PORT", "5432"),
            ("DB_ANALYTICS_USER", "reader"),
            ("DB_ANALYTICS_PASSWORD", "secret"),
            ("DB_ANALYTICS_DB", "analytics"),
            ("DB_ANALYTICS_TYPE", "postgresql"),
            ("DB_DEFAULT_CONNECTION", "sales"),
            ("UNRELATED", "x"),
        ]))
        .unwrap();

        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.default_connection.as_deref(), Some("sales"));

        let sales = config.pools.iter().find(|p| p.name == "sales").unwrap();
        assert_eq!(sales.host, "db1.example.com");
        assert_eq!(sales.port, Some(3306));
        assert_eq!(sales.tags, vec!["prod", "reporting"]);

        let analytics = config.pools.iter().find(|p| p.name == "analytics").unwrap();
        assert_eq!(analytics.db_type, Some(DatabaseType::Postgres));
        assert_eq!(analytics.database, "analytics");
    }

    #[test]
    fn test_from_env_ssl_mapping() {
        let config = BrokerConfig::from_env(env(&[
            ("DB_P_HOST", "h"),
            ("DB_P_USER", "u"),
            ("DB_P_PASSWORD", "pw"),
            ("DB_P_DATABASE", "d"),
            ("DB_P_SSL_MODE", "REQUIRED"),
            ("DB_P_SSL_CA", "/etc/ssl/ca.pem"),
        ]))
        .unwrap();
        let ssl = config.pools[0].ssl.as_ref().unwrap();
        assert_eq!(ssl.mode, SslMode::Required);
        assert_eq!(ssl.ca.as_deref(), Some("/etc/ssl/ca.pem"));
    }

    #[test]
    fn test_from_env_invalid_port_is_config_error() {
        let err = BrokerConfig::from_env(env(&[
            ("DB_P_HOST", "h"),
            ("DB_P_USER", "u"),
            ("DB_P_PASSWORD", "pw"),
            ("DB_P_DATABASE", "d"),
            ("DB_P_PORT", "notaport"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("invalid port"));
    }

    #[test]
    fn test_from_env_missing_field_fails_validation() {
        let err = BrokerConfig::from_env(env(&[("DB_P_HOST", "h")])).unwrap_err();
        assert!(err.to_string().contains("user is required"));
    }

    #[test]
    fn test_legacy_env_builds_synthetic_pools() {
        let config = BrokerConfig::legacy_from_env(env(&[
            ("MYSQL_HOST", "localhost"),
            ("MYSQL_PORT", "3306"),
            ("MYSQL_USER", "root"),
            ("MYSQL_PASSWORD", "pw"),
            ("MYSQL_DATABASE", "app"),
            ("POSTGRES_HOST", "localhost"),
            ("POSTGRES_PORT", "5432"),
            ("POSTGRES_USER", "postgres"),
            ("POSTGRES_PASSWORD", "pw"),
            ("POSTGRES_DATABASE", "app"),
        ]))
        .unwrap();

        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.pools[0].name, "mysql");
        assert_eq!(config.pools[0].db_type, Some(DatabaseType::MySql));
        assert_eq!(config.pools[1].name, "postgresql");
        assert_eq!(config.default_connection.as_deref(), Some("mysql"));
    }

    #[test]
    fn test_from_file_multi_pool_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pools.json");
        std::fs::write(
            &path,
            r#"{
                "connections": {
                    "sales": {
                        "host": "db1", "user": "u", "password": "p",
                        "database": "sales", "port": 3306,
                        "tags": ["prod"]
                    },
                    "warehouse": {
                        "type": "postgresql",
                        "host": "db2", "user": "u", "password": "p",
                        "database": "wh"
                    }
                },
                "defaultConnection": "sales"
            }"#,
        )
        .unwrap();

        let config = BrokerConfig::from_file(&path).unwrap();
        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.default_connection.as_deref(), Some("sales"));
        let warehouse = config.pools.iter().find(|p| p.name == "warehouse").unwrap();
        assert_eq!(warehouse.db_type, Some(DatabaseType::Postgres));
    }

    #[test]
    fn test_from_file_unknown_default_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pools.json");
        std::fs::write(
            &path,
            r#"{
                "connections": {
                    "a": {"host": "h", "user": "u", "password": "p", "database": "d"}
                },
                "defaultConnection": "ghost"
            }"#,
        )
        .unwrap();

        let err = BrokerConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let err = BrokerConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("no database pools"));
    }
}
