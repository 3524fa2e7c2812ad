//! End-to-end admission tests: rejected statements never reach an adapter,
//! leave no audit trace, and keep metrics untouched.

use db_broker_mcp::db::AdapterFactory;
use db_broker_mcp::error::DbError;
use db_broker_mcp::models::{PoolConfig, QueryOptions};
use db_broker_mcp::query::QueryExecutor;

fn mysql_adapter() -> db_broker_mcp::db::DatabaseAdapter {
    let config = PoolConfig {
        port: Some(3306),
        ..PoolConfig::new("u", "localhost", "reader", "secret", "users_db")
    };
    AdapterFactory::new().create(config).unwrap()
}

/// A DELETE must fail admission with the keyword named, without any
/// database round-trip: metrics unchanged, audit ring empty.
#[tokio::test]
async fn test_delete_is_rejected_before_any_adapter_call() {
    let executor = QueryExecutor::with_defaults();
    let adapter = mysql_adapter();

    let err = executor
        .execute_query(&adapter, "DELETE FROM users", &[], &QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Validation(_)));
    let msg = err.to_string();
    assert!(msg.starts_with("Query validation failed:"), "{msg}");
    assert!(msg.contains("DELETE"), "{msg}");

    let metrics = adapter.metrics().await;
    assert_eq!(metrics.queries_executed, 0);
    assert_eq!(metrics.error_count, 0);
    assert!(executor.audit_log().is_empty());
    assert_eq!(adapter.shared().active_queries(), 0);
}

#[tokio::test]
async fn test_insert_update_ddl_all_rejected() {
    let executor = QueryExecutor::with_defaults();
    let adapter = mysql_adapter();

    for sql in [
        "INSERT INTO t VALUES (1)",
        "UPDATE t SET a = 1",
        "DROP TABLE t",
        "TRUNCATE t",
        "GRANT ALL ON t TO x",
        "CALL cleanup()",
    ] {
        let err = executor
            .execute_query(&adapter, sql, &[], &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, DbError::Validation(_)),
            "{sql} should be a validation error, got {err}"
        );
    }
    assert_eq!(adapter.metrics().await.queries_executed, 0);
}

/// Dry runs skip the database entirely and return analysis, so they work
/// even against an unconnected adapter.
#[tokio::test]
async fn test_dry_run_returns_analysis_without_database() {
    let executor = QueryExecutor::with_defaults();
    let adapter = mysql_adapter();

    let result = executor
        .execute_query(
            &adapter,
            "SELECT id FROM users JOIN orders ON orders.user_id = users.id LIMIT 5",
            &[],
            &QueryOptions {
                dry_run: true,
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(result.dry_run);
    assert!(result.rows.is_empty());
    assert_eq!(result.row_count, 0);
    let analysis = result.analysis.unwrap();
    assert_eq!(analysis.operation, "SELECT");
    assert!(analysis.has_joins);
    assert_eq!(analysis.tables, vec!["users", "orders"]);
    assert_eq!(adapter.metrics().await.queries_executed, 0);
}

/// Leading-operation allow-list boundary: the exact read tokens pass
/// admission, INSERT does not.
#[test]
fn test_leading_operation_boundary() {
    let executor = QueryExecutor::with_defaults();
    for sql in [
        "SELECT 1",
        "SHOW TABLES",
        "DESCRIBE t",
        "DESC t",
        "EXPLAIN SELECT 1",
        "ANALYZE t",
    ] {
        assert!(
            executor.analyze_query(sql).validation.is_valid,
            "{sql} should pass admission"
        );
    }
    assert!(
        !executor
            .analyze_query("INSERT INTO t VALUES (1)")
            .validation
            .is_valid
    );
}

/// Sanitized output is a fixed point of validation.
#[test]
fn test_sanitization_idempotent_through_public_api() {
    let executor = QueryExecutor::with_defaults();
    let first = executor
        .analyze_query("SELECT  id  -- comment\nFROM t")
        .validation;
    let sanitized = first.sanitized_query.unwrap();
    assert_eq!(sanitized, "SELECT id FROM t");

    let second = executor.analyze_query(&sanitized).validation;
    assert_eq!(second.sanitized_query.unwrap(), sanitized);
}
