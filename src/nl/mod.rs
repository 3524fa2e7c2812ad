//! Restricted natural-language query surface.
//!
//! Translates a small family of question shapes into SQL using cached
//! schema context: row counts, top-N orderings, single-column aggregates,
//! recency scans, and plain listings. Anything else is a caller-visible
//! generation error, not a system failure. Generated SQL goes through the
//! validator before execution like any other statement, so the templates
//! never emit quoted literals or multi-statement text.

use crate::error::{DbError, DbResult};
use crate::models::SchemaInfo;
use regex::Regex;
use serde::Serialize;

/// Column names treated as recency indicators, in preference order.
const TIMESTAMP_COLUMNS: &[&str] = &["created_at", "updated_at", "timestamp", "created", "updated"];

const DEFAULT_LIST_LIMIT: u32 = 100;

/// Schema context handed to the generator: table names and their columns.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    pub tables: Vec<TableContext>,
}

#[derive(Debug, Clone)]
pub struct TableContext {
    pub name: String,
    pub columns: Vec<String>,
}

impl From<&SchemaInfo> for SchemaContext {
    fn from(schema: &SchemaInfo) -> Self {
        Self {
            tables: schema
                .tables
                .iter()
                .map(|t| TableContext {
                    name: t.name.clone(),
                    columns: t.columns.iter().map(|c| c.name.clone()).collect(),
                })
                .collect(),
        }
    }
}

/// Generator output. `sql` still has to pass the validator downstream.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuery {
    pub sql: String,
    /// 0..=1
    pub confidence: f64,
    pub explanation: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggested_improvements: Vec<String>,
}

pub struct NlQueryGenerator {
    top_n: Regex,
    aggregate: Regex,
}

impl NlQueryGenerator {
    pub fn new() -> Self {
        Self {
            top_n: Regex::new(r"(?i)\btop\s+(\d+)\b").expect("hardcoded pattern"),
            aggregate: Regex::new(r"(?i)\b(average|avg|sum|total|minimum|min|maximum|max)\s+(?:of\s+)?([a-z0-9_]+)")
                .expect("hardcoded pattern"),
        }
    }

    /// Translate a question against the schema context.
    pub fn generate(&self, question: &str, context: &SchemaContext) -> DbResult<GeneratedQuery> {
        let lower = question.to_lowercase();
        let (table, exact_match) = self.resolve_table(&lower, context).ok_or_else(|| {
            DbError::Generation(
                "could not identify a target table in the question; \
                 name one of the known tables explicitly"
                    .to_string(),
            )
        })?;
        // A fuzzy table match costs confidence across every template.
        let table_penalty = if exact_match { 0.0 } else { 0.2 };
        let columns = context
            .tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.columns.clone())
            .unwrap_or_default();

        // Row count.
        if lower.contains("how many") || lower.contains("count") || lower.contains("number of") {
            return Ok(GeneratedQuery {
                sql: format!("SELECT COUNT(*) AS total FROM {table}"),
                confidence: 0.9 - table_penalty,
                explanation: format!("Counts all rows in {table}"),
                suggested_improvements: vec![
                    "Add a WHERE clause with parameters to count a subset".to_string(),
                ],
            });
        }

        // Top-N ordered by a named column.
        if let Some(caps) = self.top_n.captures(&lower) {
            let n: u32 = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(10);
            let order_column = self
                .column_after_by(&lower, &columns)
                .or_else(|| pick_timestamp_column(&columns));
            return match order_column {
                Some(column) => Ok(GeneratedQuery {
                    sql: format!("SELECT * FROM {table} ORDER BY {column} DESC LIMIT {n}"),
                    confidence: 0.8 - table_penalty,
                    explanation: format!("Top {n} rows of {table} by {column}, descending"),
                    suggested_improvements: Vec::new(),
                }),
                None => Ok(GeneratedQuery {
                    sql: format!("SELECT * FROM {table} LIMIT {n}"),
                    confidence: 0.5 - table_penalty,
                    explanation: format!(
                        "First {n} rows of {table}; no ordering column was recognized"
                    ),
                    suggested_improvements: vec![
                        "Name the ranking column, e.g. 'top 5 orders by amount'".to_string(),
                    ],
                }),
            };
        }

        // Single-column aggregate.
        if let Some(caps) = self.aggregate.captures(&lower) {
            let func = match caps.get(1).map(|m| m.as_str()).unwrap_or_default() {
                "average" | "avg" => "AVG",
                "sum" | "total" => "SUM",
                "minimum" | "min" => "MIN",
                _ => "MAX",
            };
            let raw_column = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            if let Some(column) = resolve_column(raw_column, &columns) {
                return Ok(GeneratedQuery {
                    sql: format!(
                        "SELECT {func}({column}) AS {} FROM {table}",
                        func.to_lowercase()
                    ),
                    confidence: 0.75 - table_penalty,
                    explanation: format!("{func} of {table}.{column}"),
                    suggested_improvements: Vec::new(),
                });
            }
        }

        // Recency scan.
        if lower.contains("latest") || lower.contains("recent") || lower.contains("newest") {
            if let Some(column) = pick_timestamp_column(&columns) {
                return Ok(GeneratedQuery {
                    sql: format!("SELECT * FROM {table} ORDER BY {column} DESC LIMIT 10"),
                    confidence: 0.7 - table_penalty,
                    explanation: format!("Most recent rows of {table} by {column}"),
                    suggested_improvements: Vec::new(),
                });
            }
        }

        // Fallback listing.
        Ok(GeneratedQuery {
            sql: format!("SELECT * FROM {table} LIMIT {DEFAULT_LIST_LIMIT}"),
            confidence: 0.5 - table_penalty,
            explanation: format!(
                "Listing of {table} capped at {DEFAULT_LIST_LIMIT} rows; \
                 no more specific template matched"
            ),
            suggested_improvements: vec![
                "Ask for a count, a top-N ranking, or an aggregate for a more targeted query"
                    .to_string(),
            ],
        })
    }

    /// Find the table the question talks about. Exact-token matches win;
    /// otherwise tolerate a trailing-s mismatch either way.
    fn resolve_table(&self, lower: &str, context: &SchemaContext) -> Option<(String, bool)> {
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();

        for table in &context.tables {
            let name = table.name.to_lowercase();
            if words.iter().any(|w| *w == name) {
                return Some((table.name.clone(), true));
            }
        }
        for table in &context.tables {
            let name = table.name.to_lowercase();
            let singular = name.strip_suffix('s').unwrap_or(&name);
            if words
                .iter()
                .any(|w| w.strip_suffix('s').unwrap_or(w) == singular)
            {
                return Some((table.name.clone(), false));
            }
        }
        None
    }

    fn column_after_by(&self, lower: &str, columns: &[String]) -> Option<String> {
        let after_by = lower.split(" by ").nth(1)?;
        let candidate = after_by
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .find(|w| !w.is_empty())?;
        resolve_column(candidate, columns)
    }
}

impl Default for NlQueryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_column(candidate: &str, columns: &[String]) -> Option<String> {
    columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(candidate))
        .cloned()
        .or_else(|| {
            let singular = candidate.strip_suffix('s').unwrap_or(candidate);
            columns
                .iter()
                .find(|c| c.eq_ignore_ascii_case(singular))
                .cloned()
        })
}

fn pick_timestamp_column(columns: &[String]) -> Option<String> {
    for preferred in TIMESTAMP_COLUMNS {
        if let Some(found) = columns.iter().find(|c| c.eq_ignore_ascii_case(preferred)) {
            return Some(found.clone());
        }
    }
    None
}
