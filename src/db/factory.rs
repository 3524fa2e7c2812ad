//! Adapter factory: type detection, driver probing, construction.
//!
//! Type resolution precedence: explicit `type` in the config, then the
//! well-known port (3306 → mysql, 5432 → postgresql), then a host-name
//! substring match, then the mysql default. The port rule deliberately
//! precedes the host rule, so `my-postgres.example:3306` resolves to mysql.

use crate::db::adapter::{AdapterOptions, DatabaseAdapter};
use crate::db::mysql::MySqlAdapter;
use crate::db::postgres::PostgresAdapter;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PoolConfig, PoolOptions, RetryOptions};
use tracing::debug;

/// Builds adapters for pool configs.
pub struct AdapterFactory {
    registered: Vec<DatabaseType>,
}

impl AdapterFactory {
    /// Factory with both engine adapters registered.
    pub fn new() -> Self {
        Self {
            registered: vec![DatabaseType::MySql, DatabaseType::Postgres],
        }
    }

    /// Factory with a restricted registry. Unregistered types fail with
    /// the unsupported-type error.
    pub fn with_registered(registered: Vec<DatabaseType>) -> Self {
        Self { registered }
    }

    /// Resolve the engine type for a config.
    pub fn detect_type(config: &PoolConfig) -> DatabaseType {
        if let Some(db_type) = config.db_type {
            return db_type;
        }
        match config.port {
            Some(3306) => return DatabaseType::MySql,
            Some(5432) => return DatabaseType::Postgres,
            _ => {}
        }
        let host = config.host.to_lowercase();
        if host.contains("mysql") {
            return DatabaseType::MySql;
        }
        if host.contains("postgres") {
            return DatabaseType::Postgres;
        }
        DatabaseType::MySql
    }

    /// Driver availability probe. Both drivers are compiled in; the probe
    /// exists so a build with a restricted driver set fails with the
    /// driver-unavailable error rather than at pool construction.
    pub fn is_available(&self, db_type: DatabaseType) -> bool {
        match db_type {
            DatabaseType::MySql | DatabaseType::Postgres => true,
        }
    }

    /// Construct an adapter for the config. The adapter is not connected
    /// yet; the manager drives `connect`.
    pub fn create(&self, config: PoolConfig) -> DbResult<DatabaseAdapter> {
        let db_type = Self::detect_type(&config);

        if !self.registered.contains(&db_type) {
            return Err(DbError::UnsupportedType(db_type.to_string()));
        }
        if !self.is_available(db_type) {
            return Err(DbError::DriverUnavailable(db_type.to_string()));
        }

        let options = Self::resolve_options(&config);
        debug!(
            pool = %config.name,
            db_type = %db_type,
            max_connections = options.pool.max_connections,
            "creating adapter"
        );

        Ok(match db_type {
            DatabaseType::MySql => DatabaseAdapter::MySql(MySqlAdapter::new(config, options)),
            DatabaseType::Postgres => {
                DatabaseAdapter::Postgres(PostgresAdapter::new(config, options))
            }
        })
    }

    /// Pool/retry defaults, overridden per-pool where configured.
    fn resolve_options(config: &PoolConfig) -> AdapterOptions {
        let defaults = PoolOptions::default();
        AdapterOptions {
            pool: PoolOptions {
                min_connections: defaults.min_connections,
                max_connections: config.connection_limit.unwrap_or(defaults.max_connections),
                idle_timeout_ms: config.idle_timeout_ms.unwrap_or(defaults.idle_timeout_ms),
                acquire_timeout_ms: config
                    .acquire_timeout_ms
                    .unwrap_or(defaults.acquire_timeout_ms),
            },
            retry: RetryOptions::default(),
            metrics_enabled: true,
        }
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, port: Option<u16>) -> PoolConfig {
        PoolConfig {
            port,
            ..PoolConfig::new("test", host, "u", "p", "d")
        }
    }

    #[test]
    fn test_explicit_type_wins() {
        let mut c = config("some-postgres-host", Some(5432));
        c.db_type = Some(DatabaseType::MySql);
        assert_eq!(AdapterFactory::detect_type(&c), DatabaseType::MySql);
    }

    #[test]
    fn test_port_detection() {
        assert_eq!(
            AdapterFactory::detect_type(&config("x", Some(5432))),
            DatabaseType::Postgres
        );
        assert_eq!(
            AdapterFactory::detect_type(&config("x", Some(3306))),
            DatabaseType::MySql
        );
    }

    #[test]
    fn test_port_rule_precedes_host_substring() {
        // Host says postgres, port says mysql: port wins.
        assert_eq!(
            AdapterFactory::detect_type(&config("my-postgres.example", Some(3306))),
            DatabaseType::MySql
        );
    }

    #[test]
    fn test_host_substring_detection() {
        assert_eq!(
            AdapterFactory::detect_type(&config("mysql.internal", None)),
            DatabaseType::MySql
        );
        assert_eq!(
            AdapterFactory::detect_type(&config("postgres.internal", Some(9999))),
            DatabaseType::Postgres
        );
    }

    #[test]
    fn test_default_is_mysql() {
        assert_eq!(
            AdapterFactory::detect_type(&config("db.example.com", None)),
            DatabaseType::MySql
        );
    }

    #[test]
    fn test_unregistered_type_fails() {
        let factory = AdapterFactory::with_registered(vec![DatabaseType::MySql]);
        let err = factory.create(config("x", Some(5432))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported database type: postgresql"
        );
    }

    #[test]
    fn test_create_resolves_pool_options() {
        let factory = AdapterFactory::new();
        let mut c = config("x", Some(3306));
        c.connection_limit = Some(25);
        let adapter = factory.create(c).unwrap();
        assert_eq!(adapter.shared().options.pool.max_connections, 25);
        assert_eq!(adapter.shared().options.pool.min_connections, 2);
        assert_eq!(adapter.shared().options.pool.acquire_timeout_ms, 60_000);
        assert_eq!(adapter.shared().options.retry.retries, 3);
    }

    #[test]
    fn test_created_adapter_id() {
        let factory = AdapterFactory::new();
        let adapter = factory.create(config("db.example.com", Some(5432))).unwrap();
        assert_eq!(adapter.id(), "postgresql-db.example.com-5432-d");
    }
}
