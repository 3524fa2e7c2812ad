//! Schema cache laws: TTL boundaries, hit accounting, eviction order, and
//! the invalidation helpers.

use db_broker_mcp::schema::{CacheConfig, CacheKey, SchemaCache};
use serde_json::json;
use std::time::Duration;

#[test]
fn test_set_then_get_is_deep_equal_and_counts_one_hit() {
    let cache = SchemaCache::with_defaults();
    let payload = json!({
        "tables": [{"name": "users", "columns": [{"name": "id", "type": "integer"}]}]
    });
    cache.set(&CacheKey::schema("app"), &payload).unwrap();

    let got = cache.get(&CacheKey::schema("app")).unwrap();
    assert_eq!(got, payload);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
}

#[tokio::test]
async fn test_ttl_boundary_hit_then_miss() {
    let cache = SchemaCache::with_defaults();
    cache
        .set_with_ttl(&CacheKey::table("app", "users"), &json!(1), 80)
        .unwrap();

    // Well inside the TTL: hit.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache.get(&CacheKey::table("app", "users")).is_some());

    // Past the TTL: miss, and the entry is gone.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.get(&CacheKey::table("app", "users")).is_none());
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_eviction_removes_least_hit_oldest_first() {
    let cache = SchemaCache::new(CacheConfig {
        max_entries: 2,
        ..CacheConfig::default()
    });
    cache.set("table:app:first", &json!("a")).unwrap();
    cache.set("table:app:second", &json!("b")).unwrap();
    cache.get("table:app:second");

    // Inserting a third entry evicts `first` (0 hits, oldest).
    cache.set("table:app:third", &json!("c")).unwrap();
    assert!(cache.get("table:app:first").is_none());
    assert!(cache.get("table:app:second").is_some());
    assert!(cache.get("table:app:third").is_some());
}

#[test]
fn test_invalidate_database_then_any_prefixed_key_is_null() {
    let cache = SchemaCache::with_defaults();
    for key in [
        CacheKey::schema("app"),
        CacheKey::table("app", "users"),
        CacheKey::profile("app", "users"),
        CacheKey::relationships("app"),
        CacheKey::dbinfo("app"),
    ] {
        cache.set(&key, &json!(1)).unwrap();
    }
    cache.set(&CacheKey::schema("other"), &json!(2)).unwrap();

    let removed = cache.invalidate_database("app").unwrap();
    assert_eq!(removed, 5);

    for key in [
        CacheKey::schema("app"),
        CacheKey::table("app", "users"),
        CacheKey::profile("app", "users"),
        CacheKey::relationships("app"),
        CacheKey::dbinfo("app"),
    ] {
        assert!(cache.get(&key).is_none(), "{key} should be invalidated");
    }
    assert!(cache.get(&CacheKey::schema("other")).is_some());
}

#[test]
fn test_invalidate_table_leaves_schema_alone() {
    let cache = SchemaCache::with_defaults();
    cache.set(&CacheKey::schema("app"), &json!(1)).unwrap();
    cache.set(&CacheKey::table("app", "users"), &json!(2)).unwrap();
    cache
        .set(&CacheKey::profile("app", "users"), &json!(3))
        .unwrap();

    let removed = cache.invalidate_table("app", "users").unwrap();
    assert_eq!(removed, 2);
    assert!(cache.get(&CacheKey::schema("app")).is_some());
}

#[test]
fn test_full_invalidation_resets_counters() {
    let cache = SchemaCache::with_defaults();
    cache.set(&CacheKey::schema("app"), &json!(1)).unwrap();
    cache.get(&CacheKey::schema("app"));
    cache.get("schema:missing");

    cache.invalidate(None).unwrap();
    let stats = cache.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.total_size_bytes, 0);
}

#[test]
fn test_regex_special_characters_in_names_are_escaped() {
    let cache = SchemaCache::with_defaults();
    cache.set("table:app:a.b", &json!(1)).unwrap();
    cache.set("table:app:aXb", &json!(2)).unwrap();

    // The dot must match literally, not as a wildcard.
    let removed = cache.invalidate_table("app", "a.b").unwrap();
    assert_eq!(removed, 1);
    assert!(cache.get("table:app:aXb").is_some());
}
