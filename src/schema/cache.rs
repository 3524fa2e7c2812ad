//! TTL + LRU cache for schema, table, profile, and relationship payloads.
//!
//! Keys follow the grammar `kind:db[:entity]` with kinds `schema`, `table`,
//! `profile`, `relationships`, and `dbinfo`. Entries expire on TTL, are
//! evicted under entry-count or byte-size pressure (least-hit, then oldest,
//! first), and are swept periodically by a background task.

use crate::error::{DbError, DbResult};
use crate::models::ProfileOptions;
use crate::profile::DataProfiler;
use crate::schema::SchemaAnalyzer;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tables below this row count get a shallow profile during warm-up.
const WARMUP_PROFILE_ROW_LIMIT: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub max_size_bytes: u64,
    pub max_entries: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 3_600_000,
            max_size_bytes: 50 * 1024 * 1024,
            max_entries: 1000,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Cache key constructors. Centralized so the invalidation patterns and
/// the writers can never drift apart.
pub struct CacheKey;

impl CacheKey {
    pub fn schema(db: &str) -> String {
        format!("schema:{db}")
    }

    pub fn table(db: &str, table: &str) -> String {
        format!("table:{db}:{table}")
    }

    pub fn profile(db: &str, table: &str) -> String {
        format!("profile:{db}:{table}")
    }

    pub fn relationships(db: &str) -> String {
        format!("relationships:{db}")
    }

    pub fn dbinfo(db: &str) -> String {
        format!("dbinfo:{db}")
    }
}

struct CacheEntry {
    data: JsonValue,
    stored_at: Instant,
    ttl_ms: u64,
    hits: u64,
    size_bytes: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed().as_millis() as u64 > self.ttl_ms
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    total_size_bytes: u64,
}

/// Counters exposed alongside the cache contents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_size_bytes: u64,
}

pub struct SchemaCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    stats: Mutex<CacheStats>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SchemaCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
            stats: Mutex::new(CacheStats::default()),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Look up a key. Expired entries are removed and count as misses.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let mut inner = self.inner.lock().expect("cache lock");

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                drop(inner);
                self.stats.lock().expect("stats lock").misses += 1;
                return None;
            }
        };

        if expired {
            if let Some(removed) = inner.entries.remove(key) {
                inner.total_size_bytes =
                    inner.total_size_bytes.saturating_sub(removed.size_bytes);
            }
            drop(inner);
            self.stats.lock().expect("stats lock").misses += 1;
            return None;
        }

        let value = inner.entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            entry.data.clone()
        });
        drop(inner);
        self.stats.lock().expect("stats lock").hits += 1;
        value
    }

    /// Store a value under the default TTL.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        self.set_with_ttl(key, value, self.config.default_ttl_ms)
    }

    pub fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_ms: u64) -> DbResult<()> {
        let data = serde_json::to_value(value)
            .map_err(|e| DbError::internal(format!("cache serialization failed: {e}")))?;
        // Rough UTF-16-ish estimate: two bytes per serialized character.
        let size_bytes = 2 * data.to_string().len() as u64;

        let mut inner = self.inner.lock().expect("cache lock");
        if let Some(old) = inner.entries.remove(key) {
            inner.total_size_bytes = inner.total_size_bytes.saturating_sub(old.size_bytes);
        }

        let evicted = self.evict_for(&mut inner, size_bytes);
        if evicted > 0 {
            self.stats.lock().expect("stats lock").evictions += evicted;
        }

        inner.total_size_bytes += size_bytes;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
                ttl_ms,
                hits: 0,
                size_bytes,
            },
        );
        Ok(())
    }

    /// Make room for `required` bytes: drop entries ordered by
    /// (hits asc, age desc — least-hit first, oldest first on ties) until
    /// both the entry and size budgets hold.
    fn evict_for(&self, inner: &mut CacheInner, required: u64) -> u64 {
        let over_entries =
            |inner: &CacheInner| inner.entries.len() >= self.config.max_entries;
        let over_size = |inner: &CacheInner| {
            inner.total_size_bytes + required > self.config.max_size_bytes
        };

        if !over_entries(inner) && !over_size(inner) {
            return 0;
        }

        let mut candidates: Vec<(String, u64, Instant)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.hits, e.stored_at))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut evicted = 0;
        for (key, _, _) in candidates {
            if !over_entries(inner) && !over_size(inner) {
                break;
            }
            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_size_bytes =
                    inner.total_size_bytes.saturating_sub(entry.size_bytes);
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop expired entries. Called by the sweeper; safe to call directly.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock");
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_size_bytes =
                    inner.total_size_bytes.saturating_sub(entry.size_bytes);
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "cache sweep removed expired entries");
        }
        expired.len()
    }

    /// Without a pattern: clear everything and reset counters. With one:
    /// remove keys matching the regex.
    pub fn invalidate(&self, pattern: Option<&str>) -> DbResult<usize> {
        match pattern {
            None => {
                let mut inner = self.inner.lock().expect("cache lock");
                let removed = inner.entries.len();
                inner.entries.clear();
                inner.total_size_bytes = 0;
                *self.stats.lock().expect("stats lock") = CacheStats::default();
                Ok(removed)
            }
            Some(p) => {
                let re = Regex::new(p)
                    .map_err(|e| DbError::internal(format!("invalid cache pattern: {e}")))?;
                let mut inner = self.inner.lock().expect("cache lock");
                let matching: Vec<String> = inner
                    .entries
                    .keys()
                    .filter(|k| re.is_match(k))
                    .cloned()
                    .collect();
                for key in &matching {
                    if let Some(entry) = inner.entries.remove(key) {
                        inner.total_size_bytes =
                            inner.total_size_bytes.saturating_sub(entry.size_bytes);
                    }
                }
                Ok(matching.len())
            }
        }
    }

    /// Remove every cached payload for one database.
    pub fn invalidate_database(&self, db: &str) -> DbResult<usize> {
        let escaped = regex::escape(db);
        self.invalidate(Some(&format!(
            "^(schema|table|profile|relationships|dbinfo):{escaped}"
        )))
    }

    /// Remove the table-scoped payloads for one table.
    pub fn invalidate_table(&self, db: &str, table: &str) -> DbResult<usize> {
        let db = regex::escape(db);
        let table = regex::escape(table);
        self.invalidate(Some(&format!("^(table|profile):{db}:{table}")))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock");
        let mut stats = self.stats.lock().expect("stats lock").clone();
        stats.entries = inner.entries.len();
        stats.total_size_bytes = inner.total_size_bytes;
        stats
    }

    /// Spawn the periodic sweep. Call once after construction.
    pub fn start_sweeper(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.cleanup_interval_ms);
        let cache = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                cache.cleanup();
            }
        });
        *self.sweeper.lock().expect("sweeper lock") = Some(handle);
    }

    /// Stop the sweeper and drop every entry.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweeper.lock().expect("sweeper lock").take() {
            handle.abort();
        }
        let mut inner = self.inner.lock().expect("cache lock");
        inner.entries.clear();
        inner.total_size_bytes = 0;
    }

    /// Prefetch the payloads a fresh session asks for first: database info,
    /// the full schema, the relationship map, per-table info, and shallow
    /// profiles for small tables. Failures are logged, never fatal.
    pub async fn warm_up(
        &self,
        db_name: &str,
        analyzer: &SchemaAnalyzer,
        profiler: &DataProfiler,
    ) {
        match analyzer.database_info().await {
            Ok(info) => {
                let _ = self.set(&CacheKey::dbinfo(db_name), &info);
            }
            Err(e) => warn!(db = db_name, error = %e, "warm-up: database info failed"),
        }

        let tables = match analyzer.schema().await {
            Ok(schema) => {
                let names: Vec<(String, Option<u64>)> = schema
                    .tables
                    .iter()
                    .map(|t| (t.name.clone(), t.row_count))
                    .collect();
                let _ = self.set(&CacheKey::schema(db_name), &schema);
                names
            }
            Err(e) => {
                warn!(db = db_name, error = %e, "warm-up: schema fetch failed");
                Vec::new()
            }
        };

        match analyzer.relationships().await {
            Ok(map) => {
                let _ = self.set(&CacheKey::relationships(db_name), &map);
            }
            Err(e) => warn!(db = db_name, error = %e, "warm-up: relationships failed"),
        }

        for (table, row_count) in &tables {
            match analyzer.table_info(table).await {
                Ok(info) => {
                    let _ = self.set(&CacheKey::table(db_name, table), &info);
                }
                Err(e) => {
                    warn!(db = db_name, table = %table, error = %e, "warm-up: table info failed")
                }
            }

            if row_count.unwrap_or(u64::MAX) < WARMUP_PROFILE_ROW_LIMIT {
                match profiler.profile_table(table, &ProfileOptions::default()).await {
                    Ok(profile) => {
                        let _ = self.set(&CacheKey::profile(db_name, table), &profile);
                    }
                    Err(e) => {
                        warn!(db = db_name, table = %table, error = %e, "warm-up: profile failed")
                    }
                }
            }
        }
    }
}

impl Drop for SchemaCache {
    fn drop(&mut self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> SchemaCache {
        SchemaCache::with_defaults()
    }

    #[test]
    fn test_key_grammar() {
        assert_eq!(CacheKey::schema("app"), "schema:app");
        assert_eq!(CacheKey::table("app", "users"), "table:app:users");
        assert_eq!(CacheKey::profile("app", "users"), "profile:app:users");
        assert_eq!(CacheKey::relationships("app"), "relationships:app");
        assert_eq!(CacheKey::dbinfo("app"), "dbinfo:app");
    }

    #[test]
    fn test_get_set_round_trip_and_hit_count() {
        let c = cache();
        c.set("schema:app", &json!({"tables": []})).unwrap();

        let got = c.get("schema:app").unwrap();
        assert_eq!(got, json!({"tables": []}));

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_miss_counts() {
        let c = cache();
        assert!(c.get("schema:nope").is_none());
        assert_eq!(c.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let c = cache();
        c.set_with_ttl("table:app:users", &json!(1), 20).unwrap();
        assert!(c.get("table:app:users").is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(c.get("table:app:users").is_none());
        // Expired entry was removed, not just hidden.
        assert_eq!(c.stats().entries, 0);
    }

    #[test]
    fn test_entry_count_eviction_prefers_cold_entries() {
        let c = SchemaCache::new(CacheConfig {
            max_entries: 3,
            ..CacheConfig::default()
        });
        c.set("table:app:a", &json!("a")).unwrap();
        c.set("table:app:b", &json!("b")).unwrap();
        c.set("table:app:c", &json!("c")).unwrap();

        // Warm up b and c so a is the eviction candidate.
        c.get("table:app:b");
        c.get("table:app:c");

        c.set("table:app:d", &json!("d")).unwrap();
        assert!(c.get("table:app:a").is_none());
        assert!(c.get("table:app:b").is_some());
        assert!(c.get("table:app:d").is_some());
        assert!(c.stats().evictions >= 1);
    }

    #[test]
    fn test_size_eviction() {
        let c = SchemaCache::new(CacheConfig {
            max_size_bytes: 300,
            ..CacheConfig::default()
        });
        c.set("table:app:a", &json!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"))
            .unwrap();
        c.set("table:app:b", &json!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"))
            .unwrap();
        c.set("table:app:c", &json!("cccccccccccccccccccccccccccccc"))
            .unwrap();
        let stats = c.stats();
        assert!(stats.total_size_bytes <= 300, "size: {}", stats.total_size_bytes);
    }

    #[test]
    fn test_invalidate_all_resets_counters() {
        let c = cache();
        c.set("schema:app", &json!(1)).unwrap();
        c.get("schema:app");
        c.get("schema:missing");

        let removed = c.invalidate(None).unwrap();
        assert_eq!(removed, 1);
        let stats = c.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_invalidate_database_pattern() {
        let c = cache();
        c.set("schema:app", &json!(1)).unwrap();
        c.set("table:app:users", &json!(2)).unwrap();
        c.set("profile:app:users", &json!(3)).unwrap();
        c.set("schema:other", &json!(4)).unwrap();

        let removed = c.invalidate_database("app").unwrap();
        assert_eq!(removed, 3);
        assert!(c.get("schema:app").is_none());
        assert!(c.get("schema:other").is_some());
    }

    #[test]
    fn test_invalidate_table_pattern() {
        let c = cache();
        c.set("table:app:users", &json!(1)).unwrap();
        c.set("profile:app:users", &json!(2)).unwrap();
        c.set("table:app:orders", &json!(3)).unwrap();
        c.set("schema:app", &json!(4)).unwrap();

        let removed = c.invalidate_table("app", "users").unwrap();
        assert_eq!(removed, 2);
        assert!(c.get("table:app:orders").is_some());
        assert!(c.get("schema:app").is_some());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let c = cache();
        assert!(c.invalidate(Some("([unclosed")).is_err());
    }

    #[test]
    fn test_replacing_key_updates_size_accounting() {
        let c = cache();
        c.set("schema:app", &json!("short")).unwrap();
        let size_small = c.stats().total_size_bytes;
        c.set("schema:app", &json!("a much longer payload than before"))
            .unwrap();
        let size_large = c.stats().total_size_bytes;
        assert!(size_large > size_small);
        assert_eq!(c.stats().entries, 1);

        c.set("schema:app", &json!("short")).unwrap();
        assert_eq!(c.stats().total_size_bytes, size_small);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let c = cache();
        c.set_with_ttl("table:app:a", &json!(1), 10).unwrap();
        c.set_with_ttl("table:app:b", &json!(2), 60_000).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = c.cleanup();
        assert_eq!(removed, 1);
        assert!(c.get("table:app:b").is_some());
    }

    #[tokio::test]
    async fn test_destroy_empties_cache() {
        let c = Arc::new(cache());
        c.clone().start_sweeper();
        c.set("schema:app", &json!(1)).unwrap();
        c.destroy();
        assert_eq!(c.stats().entries, 0);
    }
}
