//! Timeout-bounded, row-bounded, cached, audited query execution.
//!
//! Pipeline per call: validate → log warnings → result-cache lookup →
//! dry-run short-circuit → timed execution against the adapter → row cap →
//! conditional cache store → audit ring append → security telemetry on
//! suspicious failures.
//!
//! The timeout races a timer against the adapter call. A lost race reports
//! `Query timeout after <ms>ms`; the in-flight statement is dropped, not
//! killed — driver-side cancellation is best-effort and correctness never
//! depends on it.

use crate::db::adapter::DatabaseAdapter;
use crate::error::{DbError, DbResult};
use crate::models::{
    AuditEntry, QueryAnalysis, QueryOptions, QueryResult, SecurityConfig,
    AUDIT_QUERY_MAX_CHARS, AUDIT_RING_CAPACITY,
};
use crate::query::validator::{QueryValidator, ValidationResult, ValidatorConfig};
use chrono::Utc;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result-cache entry lifetime.
const RESULT_CACHE_TTL_MS: u64 = 60_000;

/// Opportunistic cache cleanup threshold.
const CACHE_CLEANUP_THRESHOLD: usize = 100;

/// Row-count ceiling for cacheable results.
const CACHEABLE_MAX_ROWS: usize = 1000;

/// Calls whose presence makes a SELECT non-deterministic, hence uncacheable.
const NON_DETERMINISTIC_CALLS: &[&str] = &["NOW(", "RAND(", "UUID(", "CONNECTION_ID("];

/// Validation plus structural analysis, produced without touching the
/// database.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryInspection {
    pub validation: ValidationResult,
    pub analysis: QueryAnalysis,
}

struct CachedResult {
    result: QueryResult,
    stored_at: Instant,
}

impl CachedResult {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed().as_millis() as u64 > RESULT_CACHE_TTL_MS
    }
}

pub struct QueryExecutor {
    security: SecurityConfig,
    validator: QueryValidator,
    cache: Mutex<HashMap<String, CachedResult>>,
    audit: Mutex<VecDeque<AuditEntry>>,
    suspicious_error: Regex,
}

impl QueryExecutor {
    pub fn new(security: SecurityConfig) -> Self {
        let validator = QueryValidator::new(ValidatorConfig {
            max_query_length: security.max_query_length,
            ..ValidatorConfig::default()
        });
        Self {
            security,
            validator,
            cache: Mutex::new(HashMap::new()),
            audit: Mutex::new(VecDeque::with_capacity(AUDIT_RING_CAPACITY)),
            suspicious_error: Regex::new(
                r"(?i)access denied|permission denied|table .* doesn't exist|column .* doesn't exist|syntax error",
            )
            .expect("hardcoded telemetry pattern"),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SecurityConfig::default())
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    /// Execute one statement through the adapter with the full pipeline.
    pub async fn execute_query(
        &self,
        adapter: &DatabaseAdapter,
        sql: &str,
        params: &[crate::models::QueryParam],
        options: &QueryOptions,
    ) -> DbResult<QueryResult> {
        let timeout_ms = options
            .timeout_ms
            .unwrap_or(self.security.max_execution_time_ms);
        let max_rows = options.max_rows.unwrap_or(self.security.max_result_rows);

        // 1. Admission. Rejections never reach the adapter and are not
        //    audited.
        let validation = self.validator.validate(sql);
        if !validation.is_valid {
            return Err(DbError::Validation(validation.errors.join("; ")));
        }
        for warning in &validation.warnings {
            warn!(warning = %warning, "query warning");
        }
        let sanitized = validation
            .sanitized_query
            .ok_or_else(|| DbError::internal("validator returned no sanitized query"))?;

        // 2. Cache lookup, skipped on dry runs.
        let cache_key = Self::cache_key(&sanitized, params);
        if !options.dry_run {
            if let Some(hit) = self.cache_lookup(&cache_key) {
                debug!(cache_age_ms = ?hit.cache_age_ms, "query served from cache");
                return Ok(hit);
            }
        }

        // 3. Dry run: analysis only, no database round-trip.
        if options.dry_run {
            let started = Instant::now();
            let analysis = self.validator.analyze(&sanitized);
            let mut result = QueryResult::rows(Vec::new(), Vec::new(), 0);
            result.execution_time_ms = started.elapsed().as_millis() as u64;
            result.analysis = Some(analysis);
            result.dry_run = true;
            return Ok(result);
        }

        // 4. Timed execution.
        let started = Instant::now();
        let outcome = Self::run_timed(adapter.query(&sanitized, params), timeout_ms).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                let result = result.truncate_to(max_rows);
                if Self::is_cacheable(&sanitized, &result) {
                    self.cache_store(cache_key, &result);
                }
                if options.audited() {
                    self.audit_push(&sanitized, elapsed, result.row_count, true, None);
                }
                Ok(result)
            }
            Err(err) => {
                if matches!(err, DbError::QueryTimeout { .. }) {
                    // The cancelled future never reached the adapter's own
                    // failure accounting.
                    adapter.note_external_failure(elapsed, &err).await;
                }
                if options.audited() {
                    self.audit_push(
                        &sanitized,
                        elapsed,
                        0,
                        false,
                        Some(err.to_string()),
                    );
                }
                self.security_telemetry(&sanitized, &err);
                Err(err)
            }
        }
    }

    /// Race a statement future against the timeout.
    async fn run_timed<F>(fut: F, timeout_ms: u64) -> DbResult<QueryResult>
    where
        F: Future<Output = DbResult<QueryResult>>,
    {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(DbError::QueryTimeout { timeout_ms }),
        }
    }

    /// `EXPLAIN` passthrough; audit suppressed.
    pub async fn explain_query(
        &self,
        adapter: &DatabaseAdapter,
        sql: &str,
        params: &[crate::models::QueryParam],
    ) -> DbResult<QueryResult> {
        let options = QueryOptions {
            enable_audit: Some(false),
            ..QueryOptions::default()
        };
        self.execute_query(adapter, &format!("EXPLAIN {sql}"), params, &options)
            .await
    }

    /// Validation and structural analysis without a database round-trip.
    pub fn analyze_query(&self, sql: &str) -> QueryInspection {
        QueryInspection {
            validation: self.validator.validate(sql),
            analysis: self.validator.analyze(sql),
        }
    }

    /// Snapshot of the audit ring, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().expect("audit lock").iter().cloned().collect()
    }

    fn cache_key(sanitized: &str, params: &[crate::models::QueryParam]) -> String {
        let params_json = serde_json::to_string(params).unwrap_or_default();
        format!("{sanitized}:{params_json}")
    }

    fn cache_lookup(&self, key: &str) -> Option<QueryResult> {
        let mut cache = self.cache.lock().expect("cache lock");

        let expired = match cache.get(key) {
            Some(entry) => entry.is_expired(),
            None => return None,
        };
        if expired {
            cache.remove(key);
            return None;
        }

        cache.get(key).map(|entry| {
            let mut result = entry.result.clone();
            result.cached = true;
            result.cache_age_ms = Some((entry.stored_at.elapsed().as_millis() as u64).max(1));
            result
        })
    }

    fn cache_store(&self, key: String, result: &QueryResult) {
        let mut cache = self.cache.lock().expect("cache lock");
        if cache.len() > CACHE_CLEANUP_THRESHOLD {
            cache.retain(|_, entry| !entry.is_expired());
        }
        cache.insert(
            key,
            CachedResult {
                result: result.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Only deterministic SELECTs with modest row counts and no engine
    /// metadata payload are cached.
    fn is_cacheable(sanitized: &str, result: &QueryResult) -> bool {
        let upper = sanitized.to_uppercase();
        upper.starts_with("SELECT")
            && !NON_DETERMINISTIC_CALLS.iter().any(|call| upper.contains(call))
            && result.row_count <= CACHEABLE_MAX_ROWS
            && result.metadata.is_none()
    }

    fn audit_push(
        &self,
        query: &str,
        execution_time_ms: u64,
        row_count: usize,
        success: bool,
        error_message: Option<String>,
    ) {
        let mut audit = self.audit.lock().expect("audit lock");
        if audit.len() >= AUDIT_RING_CAPACITY {
            audit.pop_front();
        }
        audit.push_back(AuditEntry {
            timestamp: Utc::now(),
            query: query.chars().take(AUDIT_QUERY_MAX_CHARS).collect(),
            execution_time_ms,
            row_count,
            success,
            error_message,
        });
    }

    /// Failures whose text smells like probing (missing objects, denied
    /// access, syntax fishing) get surfaced on the security target.
    fn security_telemetry(&self, sanitized: &str, err: &DbError) {
        let text = err.to_string();
        if self.suspicious_error.is_match(&text) {
            let excerpt: String = sanitized.chars().take(200).collect();
            warn!(
                target: "security",
                event = "suspicious_query_error",
                query = %excerpt,
                error = %text,
                "suspicious query failure"
            );
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldInfo, QueryParam, SqlRow};

    fn result_with_rows(n: usize) -> QueryResult {
        let rows: Vec<SqlRow> = (0..n)
            .map(|i| {
                let mut row = SqlRow::new();
                row.insert("id".to_string(), serde_json::json!(i));
                row
            })
            .collect();
        QueryResult::rows(rows, vec![FieldInfo::new("id", "integer", false)], 3)
    }

    #[tokio::test]
    async fn test_run_timed_timer_wins() {
        let fut = async {
            tokio::time::sleep(Duration::from_millis(5_000)).await;
            Ok(result_with_rows(1))
        };
        let err = QueryExecutor::run_timed(fut, 100).await.unwrap_err();
        assert_eq!(err.to_string(), "Query timeout after 100ms");
    }

    #[tokio::test]
    async fn test_run_timed_statement_wins() {
        let fut = async { Ok(result_with_rows(2)) };
        let result = QueryExecutor::run_timed(fut, 1_000).await.unwrap();
        assert_eq!(result.row_count, 2);
    }

    #[test]
    fn test_cacheability_rules() {
        let result = result_with_rows(3);
        assert!(QueryExecutor::is_cacheable("SELECT id FROM t", &result));
        assert!(!QueryExecutor::is_cacheable("SHOW TABLES", &result));
        assert!(!QueryExecutor::is_cacheable(
            "SELECT id, NOW() FROM t",
            &result
        ));
        assert!(!QueryExecutor::is_cacheable(
            "SELECT RAND() FROM t",
            &result
        ));

        let mut big = result_with_rows(3);
        big.row_count = CACHEABLE_MAX_ROWS + 1;
        assert!(!QueryExecutor::is_cacheable("SELECT id FROM t", &big));

        let mut with_meta = result_with_rows(1);
        with_meta.metadata = Some(serde_json::json!({"affected": 0}));
        assert!(!QueryExecutor::is_cacheable("SELECT id FROM t", &with_meta));
    }

    #[test]
    fn test_cache_round_trip_marks_cached() {
        let executor = QueryExecutor::with_defaults();
        let key = QueryExecutor::cache_key("SELECT id FROM t", &[]);
        executor.cache_store(key.clone(), &result_with_rows(2));

        let hit = executor.cache_lookup(&key).unwrap();
        assert!(hit.cached);
        assert!(hit.cache_age_ms.unwrap() >= 1);
        assert_eq!(hit.row_count, 2);

        // Different params miss.
        let other = QueryExecutor::cache_key("SELECT id FROM t", &[QueryParam::Int(1)]);
        assert!(executor.cache_lookup(&other).is_none());
    }

    #[test]
    fn test_analyze_query_offline() {
        let executor = QueryExecutor::with_defaults();
        let inspection = executor.analyze_query("SELECT id FROM users LIMIT 5");
        assert!(inspection.validation.is_valid);
        assert_eq!(inspection.analysis.tables, vec!["users"]);
    }

    #[test]
    fn test_audit_ring_caps_and_truncates() {
        let executor = QueryExecutor::with_defaults();
        let long_query = "SELECT ".to_string() + &"x".repeat(5_000);
        for _ in 0..(AUDIT_RING_CAPACITY + 5) {
            executor.audit_push(&long_query, 1, 0, true, None);
        }
        let log = executor.audit_log();
        assert_eq!(log.len(), AUDIT_RING_CAPACITY);
        assert_eq!(log[0].query.chars().count(), AUDIT_QUERY_MAX_CHARS);
    }

    #[test]
    fn test_suspicious_error_pattern() {
        let executor = QueryExecutor::with_defaults();
        for text in [
            "Access denied for user 'x'",
            "permission denied for relation y",
            "table 'app.ghost' doesn't exist",
            "You have an error in your SQL syntax error near",
        ] {
            assert!(
                executor.suspicious_error.is_match(text),
                "{text} should match"
            );
        }
        assert!(!executor.suspicious_error.is_match("connection reset"));
    }
}
