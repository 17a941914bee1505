//! Property-Based Tests for the Response Cache
//!
//! **Property 6: Order-Independent Keys**
//!
//! `cache_key(category, args)` does not depend on the insertion order of
//! object fields.
//!
//! **Property 7: Misses Fall Through Once**
//!
//! A read-through on an unset key runs the caller's computation exactly
//! once, even when the backing store is down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{Map, Value};
use tokio::runtime::Runtime;
use tollgate_api::{cache_key, canonical_json, CacheCategory, CacheConfig, ResponseCache};
use tollgate_storage::{KeyValueStore, MemoryStore};
use tollgate_test_utils::fixtures::manual_clock;
use tollgate_test_utils::generators::{arb_cache_args, arb_json_value};
use tollgate_test_utils::UnavailableStore;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn arb_category() -> impl Strategy<Value = CacheCategory> {
    prop::sample::select(CacheCategory::ALL.to_vec())
}

fn reversed(map: &Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    entries.reverse();
    entries.into_iter().collect()
}

fn cache_on(store: Arc<dyn KeyValueStore>) -> ResponseCache {
    ResponseCache::new(store, &CacheConfig::default()).with_clock(manual_clock())
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 6: Order-Independent Keys**
    #[test]
    fn prop_key_ignores_field_order(category in arb_category(), args in arb_cache_args()) {
        let forward = Value::Object(args.clone());
        let backward = Value::Object(reversed(&args));
        prop_assert_eq!(cache_key(category, &forward), cache_key(category, &backward));
    }

    /// Keys are `{category}:` plus 24 hex characters.
    #[test]
    fn prop_key_shape(category in arb_category(), value in arb_json_value()) {
        let key = cache_key(category, &value);
        let prefix = format!("{}:", category.as_str());
        prop_assert!(key.starts_with(&prefix));
        let digest = &key[prefix.len()..];
        prop_assert_eq!(digest.len(), 24);
        prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Canonical JSON is still valid JSON for the same value.
    #[test]
    fn prop_canonical_json_parses_back(value in arb_json_value()) {
        let parsed: Value = serde_json::from_str(&canonical_json(&value))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(parsed, value);
    }

    /// **Property 7: Misses Fall Through Once**
    #[test]
    fn prop_miss_computes_once(args in arb_cache_args(), store_up in any::<bool>()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store: Arc<dyn KeyValueStore> = if store_up {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(UnavailableStore)
            };
            let cache = cache_on(store);
            let args = Value::Object(args);
            let calls = AtomicUsize::new(0);

            prop_assert!(cache.get::<Value>(CacheCategory::ApiResponse, &args).await.is_none());

            let value = cache
                .get_or_compute(CacheCategory::ApiResponse, &args, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(serde_json::json!({"answer": 42}))
                })
                .await
                .map_err(TestCaseError::fail)?;
            prop_assert_eq!(&value["answer"], 42);
            prop_assert_eq!(calls.load(Ordering::SeqCst), 1);

            let stats = cache.stats();
            if store_up {
                prop_assert!(cache.get::<Value>(CacheCategory::ApiResponse, &args).await.is_some());
            } else {
                prop_assert!(stats.errors >= 1);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
