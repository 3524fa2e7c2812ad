//! Query-related data models.
//!
//! Parameter values, result shapes, executor options, and the audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default row cap applied when a call provides none.
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Default per-statement timeout in milliseconds.
pub const DEFAULT_MAX_EXECUTION_TIME_MS: u64 = 30_000;

/// Default maximum accepted query length in characters.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 10_000;

/// Audit ring capacity: older entries are dropped past this point.
pub const AUDIT_RING_CAPACITY: usize = 1000;

/// Queries are truncated to this many characters before auditing.
pub const AUDIT_QUERY_MAX_CHARS: usize = 1000;

/// A positional parameter for parameterized queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a loose JSON value into a parameter. Arrays and objects are
    /// rejected: drivers have no positional binding for them.
    pub fn from_json(value: &JsonValue) -> Result<Self, String> {
        match value {
            JsonValue::Null => Ok(Self::Null),
            JsonValue::Bool(b) => Ok(Self::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(format!("unrepresentable number parameter: {n}"))
                }
            }
            JsonValue::String(s) => Ok(Self::String(s.clone())),
            other => Err(format!("unsupported parameter type: {other}")),
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Column metadata in the shared result shape. `type_name` is the
/// normalized category; consumers treat it as an opaque tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// One row: column name → decoded JSON value, in SELECT order.
pub type SqlRow = serde_json::Map<String, JsonValue>;

/// Uniform result of one statement.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub rows: Vec<SqlRow>,
    pub fields: Vec<FieldInfo>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    /// True when rows were cut at the effective row cap.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    /// Row count before truncation. Present only when `truncated`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<usize>,
    /// Engine metadata for non-row-set statements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    /// True when served from the executor's result cache.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    /// Milliseconds since the cached entry was stored. Present iff `cached`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_ms: Option<u64>,
    /// Validator analysis, present on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<QueryAnalysis>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl QueryResult {
    /// A plain row-set result with no truncation or cache annotations.
    pub fn rows(rows: Vec<SqlRow>, fields: Vec<FieldInfo>, execution_time_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            fields,
            row_count,
            execution_time_ms,
            truncated: false,
            total_rows: None,
            metadata: None,
            cached: false,
            cache_age_ms: None,
            analysis: None,
            dry_run: false,
        }
    }

    /// Result for non-row-set statements (SHOW engine counters, etc.).
    pub fn command(affected: u64, metadata: Option<JsonValue>, execution_time_ms: u64) -> Self {
        Self {
            rows: Vec::new(),
            fields: Vec::new(),
            row_count: affected as usize,
            execution_time_ms,
            truncated: false,
            total_rows: None,
            metadata,
            cached: false,
            cache_age_ms: None,
            analysis: None,
            dry_run: false,
        }
    }

    /// Apply a row cap, recording the pre-cap total when rows were cut.
    pub fn truncate_to(mut self, max_rows: usize) -> Self {
        let total = self.rows.len();
        if total > max_rows {
            self.rows.truncate(max_rows);
            self.row_count = max_rows;
            self.truncated = true;
            self.total_rows = Some(total);
        }
        self
    }
}

/// Per-call executor options. Unset fields fall back to the security config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryOptions {
    pub timeout_ms: Option<u64>,
    pub max_rows: Option<usize>,
    pub enable_audit: Option<bool>,
    #[serde(default)]
    pub dry_run: bool,
}

impl QueryOptions {
    pub fn audited(&self) -> bool {
        self.enable_audit.unwrap_or(true)
    }
}

/// Executor-wide safety limits.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub max_execution_time_ms: u64,
    pub max_result_rows: usize,
    pub max_query_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_execution_time_ms: DEFAULT_MAX_EXECUTION_TIME_MS,
            max_result_rows: DEFAULT_MAX_ROWS,
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
        }
    }
}

/// One execution record in the bounded audit ring.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// Truncated to [`AUDIT_QUERY_MAX_CHARS`].
    pub query: String,
    pub execution_time_ms: u64,
    pub row_count: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Structural analysis of a statement, produced without touching the
/// database. Table extraction is heuristic (names after FROM/JOIN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnalysis {
    pub operation: String,
    pub tables: Vec<String>,
    pub has_subqueries: bool,
    pub has_joins: bool,
    pub has_aggregates: bool,
    pub estimated_complexity: Complexity,
}

/// Complexity bucket from the validator's weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_from_json() {
        assert!(QueryParam::from_json(&JsonValue::Null).unwrap().is_null());
        assert!(matches!(
            QueryParam::from_json(&serde_json::json!(42)).unwrap(),
            QueryParam::Int(42)
        ));
        assert!(matches!(
            QueryParam::from_json(&serde_json::json!(1.5)).unwrap(),
            QueryParam::Float(_)
        ));
        assert!(QueryParam::from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_truncate_to_sets_total_rows() {
        let rows: Vec<SqlRow> = (0..5)
            .map(|i| {
                let mut row = SqlRow::new();
                row.insert("n".to_string(), JsonValue::Number(i.into()));
                row
            })
            .collect();
        let result = QueryResult::rows(rows, vec![], 3).truncate_to(3);
        assert!(result.truncated);
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.total_rows, Some(5));
    }

    #[test]
    fn test_truncate_to_noop_at_exact_cap() {
        let rows: Vec<SqlRow> = (0..3).map(|_| SqlRow::new()).collect();
        let result = QueryResult::rows(rows, vec![], 1).truncate_to(3);
        assert!(!result.truncated);
        assert_eq!(result.total_rows, None);
        assert_eq!(result.row_count, 3);
    }

    #[test]
    fn test_bytes_param_round_trips_as_base64() {
        let param = QueryParam::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&param).unwrap();
        assert_eq!(json, "\"3q2+7w==\"");
    }

    #[test]
    fn test_query_options_audit_default() {
        let opts = QueryOptions::default();
        assert!(opts.audited());
        let opts = QueryOptions {
            enable_audit: Some(false),
            ..Default::default()
        };
        assert!(!opts.audited());
    }
}
