//! Executor pipeline behaviors that don't need a live database: row-cap
//! boundaries, cacheability via the public surface, explain prefixing, and
//! audit suppression.

use db_broker_mcp::db::AdapterFactory;
use db_broker_mcp::error::DbError;
use db_broker_mcp::models::{PoolConfig, QueryOptions, QueryResult, SqlRow};
use db_broker_mcp::query::QueryExecutor;

fn rows(n: usize) -> QueryResult {
    let rows: Vec<SqlRow> = (0..n)
        .map(|i| {
            let mut row = SqlRow::new();
            row.insert("id".to_string(), serde_json::json!(i));
            row
        })
        .collect();
    QueryResult::rows(rows, Vec::new(), 1)
}

/// Row-cap boundary: exactly at the cap is untouched, one past the cap
/// truncates and records the pre-cap total.
#[test]
fn test_row_cap_boundary() {
    let at_cap = rows(100).truncate_to(100);
    assert!(!at_cap.truncated);
    assert_eq!(at_cap.row_count, 100);
    assert_eq!(at_cap.total_rows, None);

    let over = rows(101).truncate_to(100);
    assert!(over.truncated);
    assert_eq!(over.row_count, 100);
    assert_eq!(over.rows.len(), 100);
    assert_eq!(over.total_rows, Some(101));
}

/// The executor's timeout error carries the configured budget verbatim.
#[tokio::test]
async fn test_timeout_error_message_shape() {
    let err = DbError::QueryTimeout { timeout_ms: 100 };
    assert_eq!(err.to_string(), "Query timeout after 100ms");

    // A 100 ms budget against an unconnected adapter fails fast with the
    // connectivity error instead; the timer only wins against a statement
    // that is actually in flight.
    let executor = QueryExecutor::with_defaults();
    let adapter = AdapterFactory::new()
        .create(PoolConfig {
            port: Some(3306),
            ..PoolConfig::new("p", "localhost", "u", "p", "d")
        })
        .unwrap();
    let err = executor
        .execute_query(
            &adapter,
            "SELECT 1",
            &[],
            &QueryOptions {
                timeout_ms: Some(100),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotConnected));
}

/// Execution failures are audited with `success = false` and the error
/// message preserved; audit can be suppressed per call.
#[tokio::test]
async fn test_failure_audited_and_suppressible() {
    let executor = QueryExecutor::with_defaults();
    let adapter = AdapterFactory::new()
        .create(PoolConfig {
            port: Some(5432),
            ..PoolConfig::new("p", "localhost", "u", "p", "d")
        })
        .unwrap();

    let _ = executor
        .execute_query(&adapter, "SELECT 1", &[], &QueryOptions::default())
        .await;
    let log = executor.audit_log();
    assert_eq!(log.len(), 1);
    assert!(!log[0].success);
    assert!(log[0].error_message.is_some());
    assert_eq!(log[0].query, "SELECT 1");

    let _ = executor
        .execute_query(
            &adapter,
            "SELECT 2",
            &[],
            &QueryOptions {
                enable_audit: Some(false),
                ..QueryOptions::default()
            },
        )
        .await;
    assert_eq!(executor.audit_log().len(), 1);
}

/// explain_query dispatches `EXPLAIN <sql>` with auditing off, so even its
/// failure leaves no audit trace.
#[tokio::test]
async fn test_explain_suppresses_audit() {
    let executor = QueryExecutor::with_defaults();
    let adapter = AdapterFactory::new()
        .create(PoolConfig {
            port: Some(3306),
            ..PoolConfig::new("p", "localhost", "u", "p", "d")
        })
        .unwrap();

    let err = executor
        .explain_query(&adapter, "SELECT id FROM t", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotConnected));
    assert!(executor.audit_log().is_empty());
}

/// Query-length admission boundary through the executor's security config.
#[test]
fn test_query_length_boundary() {
    let executor = QueryExecutor::new(db_broker_mcp::models::SecurityConfig {
        max_query_length: 40,
        ..Default::default()
    });

    let pad = 40 - "SELECT  FROM t".len();
    let at_limit = format!("SELECT {} FROM t", "c".repeat(pad));
    assert_eq!(at_limit.chars().count(), 40);
    assert!(executor.analyze_query(&at_limit).validation.is_valid);

    let over = format!("{at_limit}c");
    let validation = executor.analyze_query(&over).validation;
    assert!(!validation.is_valid);
    assert!(validation.errors[0].contains("maximum length"));
}
