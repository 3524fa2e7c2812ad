//! Cross-database dispatcher.
//!
//! Fans an ordered list of `{pool, sql, alias?}` items out over their
//! adapters concurrently and assembles a labeled result set in input
//! order. This is the one place where partial success is visible to the
//! caller: a failing item carries its error while its siblings return
//! rows. The dispatcher neither reads nor writes the executor's result
//! cache — fan-out is an exploratory, uncached path.

use crate::db::manager::ConnectionManager;
use crate::error::DbResult;
use crate::models::{FieldInfo, QueryParam, SqlRow};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Characters of SQL echoed back per item.
const SQL_EXCERPT_CHARS: usize = 120;

/// One query in a cross-database call.
#[derive(Debug, Clone, Deserialize)]
pub struct CrossQueryItem {
    /// Pool name from the connection registry.
    pub pool: String,
    pub sql: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

/// Per-item outcome, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct CrossQueryItemResult {
    pub pool: String,
    pub alias: String,
    pub sql_excerpt: String,
    pub execution_time_ms: u64,
    pub row_count: usize,
    pub rows: Vec<SqlRow>,
    pub fields: Vec<FieldInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossQuerySummary {
    pub total_queries: usize,
    pub total_rows: usize,
    pub total_execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossQueryResult {
    pub summary: CrossQuerySummary,
    pub results: Vec<CrossQueryItemResult>,
}

/// Execute every item concurrently on its pool and merge the outcomes.
///
/// Results preserve input order: `results[i].pool == items[i].pool`.
pub async fn cross_query(
    manager: &ConnectionManager,
    items: Vec<CrossQueryItem>,
) -> DbResult<CrossQueryResult> {
    let started = Instant::now();
    let total_queries = items.len();

    let outcomes = join_all(items.into_iter().map(|item| async move {
        let alias = item.alias.clone().unwrap_or_else(|| item.pool.clone());
        let sql_excerpt: String = item.sql.chars().take(SQL_EXCERPT_CHARS).collect();
        let item_started = Instant::now();

        let outcome = match manager.get_connection(Some(&item.pool)).await {
            Ok(adapter) => adapter.query(&item.sql, &item.params).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => CrossQueryItemResult {
                pool: item.pool,
                alias,
                sql_excerpt,
                execution_time_ms: result.execution_time_ms,
                row_count: result.row_count,
                rows: result.rows,
                fields: result.fields,
                error: None,
            },
            Err(e) => CrossQueryItemResult {
                pool: item.pool,
                alias,
                sql_excerpt,
                execution_time_ms: item_started.elapsed().as_millis() as u64,
                row_count: 0,
                rows: Vec::new(),
                fields: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }))
    .await;

    let total_rows = outcomes.iter().map(|r| r.row_count).sum();
    let summary = CrossQuerySummary {
        total_queries,
        total_rows,
        total_execution_time_ms: started.elapsed().as_millis() as u64,
    };

    info!(
        queries = summary.total_queries,
        rows = summary.total_rows,
        elapsed_ms = summary.total_execution_time_ms,
        "cross-database query complete"
    );

    Ok(CrossQueryResult {
        summary,
        results: outcomes,
    })
}
