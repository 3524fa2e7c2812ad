//! Cross-database dispatcher: order preservation and per-item failure
//! isolation.

use db_broker_mcp::db::ConnectionManager;
use db_broker_mcp::models::PoolConfig;
use db_broker_mcp::query::{cross_query, CrossQueryItem};

fn item(pool: &str, sql: &str, alias: Option<&str>) -> CrossQueryItem {
    CrossQueryItem {
        pool: pool.to_string(),
        sql: sql.to_string(),
        alias: alias.map(|a| a.to_string()),
        params: Vec::new(),
    }
}

async fn manager_with(names: &[&str]) -> ConnectionManager {
    let manager = ConnectionManager::new();
    let configs = names
        .iter()
        .map(|name| PoolConfig {
            port: Some(3306),
            ..PoolConfig::new(*name, "localhost", "u", "p", *name)
        })
        .collect();
    manager.register_pools(configs).await.unwrap();
    manager
}

/// `results[i].pool == inputs[i].pool` for every i, whatever the mix of
/// successes and failures.
#[tokio::test]
async fn test_output_order_matches_input_order() {
    let manager = manager_with(&["a", "b", "c"]).await;
    let inputs = vec![
        item("c", "SELECT 1", Some("C")),
        item("a", "SELECT 2", None),
        item("missing", "SELECT 3", Some("M")),
        item("b", "SELECT 4", None),
    ];
    let input_pools: Vec<String> = inputs.iter().map(|i| i.pool.clone()).collect();

    let result = cross_query(&manager, inputs).await.unwrap();

    assert_eq!(result.summary.total_queries, 4);
    assert_eq!(result.results.len(), 4);
    for (i, item_result) in result.results.iter().enumerate() {
        assert_eq!(item_result.pool, input_pools[i]);
    }
    assert_eq!(result.results[0].alias, "C");
    assert_eq!(result.results[1].alias, "a");
    assert_eq!(result.results[2].alias, "M");
}

/// A bad pool name fails only its own item; the call itself succeeds.
#[tokio::test]
async fn test_partial_failure_is_per_item() {
    let manager = manager_with(&["a"]).await;
    let result = cross_query(
        &manager,
        vec![item("a", "SELECT 1", None), item("nope", "SELECT 2", None)],
    )
    .await
    .unwrap();

    // Both fail here (nothing is connected), but for different reasons and
    // each within its own slot.
    assert!(result.results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("not connected"));
    assert!(result.results[1]
        .error
        .as_deref()
        .unwrap()
        .contains("not found"));
    assert_eq!(result.summary.total_rows, 0);
}

#[tokio::test]
async fn test_sql_excerpt_is_bounded() {
    let manager = manager_with(&["a"]).await;
    let long_sql = format!("SELECT {}", "x, ".repeat(200));
    let result = cross_query(&manager, vec![item("a", &long_sql, None)])
        .await
        .unwrap();
    assert!(result.results[0].sql_excerpt.chars().count() <= 120);
}
