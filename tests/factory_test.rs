//! Adapter factory type-detection precedence.

use db_broker_mcp::db::AdapterFactory;
use db_broker_mcp::models::{DatabaseType, PoolConfig};

fn config(host: &str, port: Option<u16>) -> PoolConfig {
    PoolConfig {
        port,
        ..PoolConfig::new("pool", host, "u", "p", "d")
    }
}

/// Port 5432 with no explicit type resolves to PostgreSQL.
#[test]
fn test_auto_detect_by_port() {
    let adapter = AdapterFactory::new()
        .create(config("x.example", Some(5432)))
        .unwrap();
    assert_eq!(adapter.db_type(), DatabaseType::Postgres);
}

/// The port rule precedes host-substring matching: a host that mentions
/// postgres but listens on 3306 is MySQL.
#[test]
fn test_port_precedes_host_substring() {
    let adapter = AdapterFactory::new()
        .create(config("my-postgres.example", Some(3306)))
        .unwrap();
    assert_eq!(adapter.db_type(), DatabaseType::MySql);
}

#[test]
fn test_host_substring_when_port_is_unknown() {
    let factory = AdapterFactory::new();
    assert_eq!(
        factory
            .create(config("postgres-replica.internal", Some(6432)))
            .unwrap()
            .db_type(),
        DatabaseType::Postgres
    );
    assert_eq!(
        factory
            .create(config("mysql-primary.internal", None))
            .unwrap()
            .db_type(),
        DatabaseType::MySql
    );
}

#[test]
fn test_explicit_type_overrides_everything() {
    let mut c = config("postgres.example", Some(5432));
    c.db_type = Some(DatabaseType::MySql);
    let adapter = AdapterFactory::new().create(c).unwrap();
    assert_eq!(adapter.db_type(), DatabaseType::MySql);
}

#[test]
fn test_default_falls_back_to_mysql() {
    let adapter = AdapterFactory::new()
        .create(config("db.internal", None))
        .unwrap();
    assert_eq!(adapter.db_type(), DatabaseType::MySql);
}

#[test]
fn test_unregistered_type_error_message() {
    let factory = AdapterFactory::with_registered(vec![DatabaseType::Postgres]);
    let err = factory.create(config("x", Some(3306))).unwrap_err();
    assert_eq!(err.to_string(), "Unsupported database type: mysql");
}

/// Adapter ids derive from type, host, effective port, and database.
#[test]
fn test_adapter_id_uses_default_port_when_unset() {
    let adapter = AdapterFactory::new()
        .create(config("mysql.internal", None))
        .unwrap();
    assert_eq!(adapter.id(), "mysql-mysql.internal-3306-d");
}
