//! Connection manager resolution, filtering, and health aggregation.

use db_broker_mcp::db::ConnectionManager;
use db_broker_mcp::error::DbError;
use db_broker_mcp::models::{DatabaseType, HealthStatus, PoolConfig};

fn pool(name: &str, port: u16, tags: &[&str]) -> PoolConfig {
    PoolConfig {
        port: Some(port),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..PoolConfig::new(name, "localhost", "reader", "pw", name)
    }
}

#[tokio::test]
async fn test_registered_names_match_configuration() {
    let manager = ConnectionManager::new();
    manager
        .register_pools(vec![
            pool("alpha", 3306, &[]),
            pool("beta", 5432, &[]),
            pool("gamma", 5432, &[]),
        ])
        .await
        .unwrap();

    assert_eq!(
        manager.connection_names().await,
        vec!["alpha", "beta", "gamma"]
    );
    assert_eq!(manager.connection_count().await, 3);
}

#[tokio::test]
async fn test_resolution_error_messages() {
    let manager = ConnectionManager::new();
    manager
        .register_pools(vec![pool("alpha", 3306, &[]), pool("beta", 5432, &[])])
        .await
        .unwrap();

    let err = manager.get_connection(None).await.unwrap_err();
    assert!(matches!(err, DbError::NoDefaultConnection));
    assert_eq!(
        err.to_string(),
        "No connection name specified and no default connection configured"
    );

    let err = manager.get_connection(Some("ghost")).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Database connection 'ghost' not found. Available: alpha, beta"
    );
}

#[tokio::test]
async fn test_default_selection_round_trip() {
    let manager = ConnectionManager::new();
    manager
        .register_pools(vec![pool("alpha", 3306, &[])])
        .await
        .unwrap();

    assert!(manager.set_default_connection("ghost").await.is_err());
    manager.set_default_connection("alpha").await.unwrap();

    let adapter = manager.get_connection(None).await.unwrap();
    assert_eq!(adapter.db_type(), DatabaseType::MySql);
}

#[tokio::test]
async fn test_tag_and_type_filters() {
    let manager = ConnectionManager::new();
    manager
        .register_pools(vec![
            pool("sales", 3306, &["prod"]),
            pool("warehouse", 5432, &["prod", "analytics"]),
            pool("scratch", 5432, &["dev"]),
        ])
        .await
        .unwrap();

    assert_eq!(
        manager.connections_by_tag("prod").await,
        vec!["sales", "warehouse"]
    );
    assert_eq!(manager.connections_by_tag("analytics").await, vec!["warehouse"]);
    // Type filter reports connected pools only; nothing is connected here.
    assert!(manager
        .connections_by_type(DatabaseType::Postgres)
        .await
        .is_empty());
}

/// Health fan-out never hides one pool behind another: every registered
/// pool produces an entry, and probe failures come back as unhealthy
/// entries with an error.
#[tokio::test]
async fn test_health_check_all_reports_every_pool() {
    let manager = ConnectionManager::new();
    manager
        .register_pools(vec![
            pool("a", 3306, &[]),
            pool("b", 5432, &[]),
            pool("c", 3306, &[]),
        ])
        .await
        .unwrap();

    // Unconnected adapters fail their ping, which is exactly the failure
    // conversion path.
    let results = manager.health_check_all().await;
    assert_eq!(results.len(), 3);
    for (name, status) in &results {
        assert!(!status.is_healthy, "pool {name} should be unhealthy");
        assert_eq!(status.response_time_ms, 0);
        assert!(status.error.is_some());
    }
}

/// Aggregate math: two healthy probes at 50 and 80 ms and one failure
/// average over all three samples with the failure contributing zero.
#[test]
fn test_health_summary_average_includes_failures() {
    let results = vec![
        ("a".to_string(), HealthStatus::healthy(DatabaseType::MySql, 50)),
        (
            "b".to_string(),
            HealthStatus::healthy(DatabaseType::Postgres, 80),
        ),
        (
            "c".to_string(),
            HealthStatus::unhealthy(DatabaseType::MySql, "ping raised"),
        ),
    ];
    let summary = ConnectionManager::summarize_health(&results);
    assert_eq!(summary.total_databases, 3);
    assert_eq!(summary.healthy_databases, 2);
    assert!((summary.average_response_time_ms - (50.0 + 80.0) / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_statistics_by_type_and_tag() {
    let manager = ConnectionManager::new();
    manager
        .register_pools(vec![
            pool("a", 3306, &["prod"]),
            pool("b", 5432, &["prod"]),
        ])
        .await
        .unwrap();
    manager.set_default_connection("a").await.unwrap();

    let stats = manager.statistics().await;
    assert_eq!(stats.total_connections, 2);
    assert_eq!(stats.by_type.get("mysql"), Some(&1));
    assert_eq!(stats.by_type.get("postgresql"), Some(&1));
    assert_eq!(stats.by_tag.get("prod"), Some(&2));
    assert_eq!(stats.default_connection.as_deref(), Some("a"));
}
