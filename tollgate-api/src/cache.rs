//! Response Cache
//!
//! JSON payloads stored under `"{category}:{digest}"` keys with a TTL taken
//! from the per-category table. Store failures are counted and logged, then
//! treated as a miss; callers never see them.

use crate::config::{CacheConfig, CacheTtls};
use crate::constants::CACHE_KEY_DIGEST_LEN;
use crate::telemetry::GatewayMetrics;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::{short_digest, Clock, StoreResult, SystemClock, Timestamp};
use tollgate_storage::KeyValueStore;

// ============================================================================
// CATEGORIES AND KEYS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    Translation,
    UserData,
    ApiResponse,
    HealthCheck,
    Pricing,
    Languages,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 6] = [
        CacheCategory::Translation,
        CacheCategory::UserData,
        CacheCategory::ApiResponse,
        CacheCategory::HealthCheck,
        CacheCategory::Pricing,
        CacheCategory::Languages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::Translation => "translation",
            CacheCategory::UserData => "user_data",
            CacheCategory::ApiResponse => "api_response",
            CacheCategory::HealthCheck => "health_check",
            CacheCategory::Pricing => "pricing",
            CacheCategory::Languages => "languages",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| format!("unknown cache category '{}'", s))
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// `"{category}:{sha256(canonical_json(args))[..24]}"`.
pub fn cache_key(category: CacheCategory, args: &Value) -> String {
    format!(
        "{}:{}",
        category.as_str(),
        short_digest(canonical_json(args).as_bytes(), CACHE_KEY_DIGEST_LEN)
    )
}

/// Key holding a subject's cached profile data.
pub fn subject_key(subject_id: &str) -> String {
    format!("{}:subject:{}", CacheCategory::UserData.as_str(), subject_id)
}

// ============================================================================
// RESPONSE CACHE
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    payload: T,
    cached_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Percentage of lookups served from cache.
    pub hit_rate: f64,
}

pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    ttls: CacheTtls,
    enabled: bool,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<GatewayMetrics>>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            ttls: config.ttls,
            enabled: config.enabled,
            clock: Arc::new(SystemClock),
            metrics: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self, category: CacheCategory) -> Duration {
        self.ttls.get(category)
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.store.ping().await
    }

    fn observe(&self, category: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache(category, outcome);
        }
    }

    fn fail(&self, category: &str, op: &str, key: &str, error: impl fmt::Display) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.observe(category, "error");
        tracing::warn!(key = %key, operation = op, error = %error, "Cache operation failed");
    }

    async fn read<T: DeserializeOwned>(&self, category: &str, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                self.fail(category, "get", key, e);
                return None;
            }
        };

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.observe(category, "miss");
            tracing::debug!(key = %key, "Cache miss");
            return None;
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.observe(category, "hit");
                tracing::debug!(key = %key, "Cache hit");
                Some(entry.payload)
            }
            Err(e) => {
                self.fail(category, "decode", key, e);
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, category: &str, key: &str, value: &T, ttl: Duration) -> bool {
        if !self.enabled {
            return false;
        }

        let entry = CacheEntry {
            payload: value,
            cached_at: self.clock.now(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                self.fail(category, "encode", key, e);
                return false;
            }
        };

        match self.store.set_ex(key, &raw, ttl).await {
            Ok(()) => {
                self.observe(category, "set");
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache set");
                true
            }
            Err(e) => {
                self.fail(category, "set", key, e);
                false
            }
        }
    }

    async fn remove(&self, category: &str, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                self.fail(category, "delete", key, e);
                false
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, category: CacheCategory, args: &Value) -> Option<T> {
        self.read(category.as_str(), &cache_key(category, args)).await
    }

    /// Store `value` for the category TTL, or `ttl_override` when given.
    pub async fn set<T: Serialize>(
        &self,
        category: CacheCategory,
        args: &Value,
        value: &T,
        ttl_override: Option<Duration>,
    ) -> bool {
        let ttl = ttl_override.unwrap_or_else(|| self.ttl(category));
        self.write(category.as_str(), &cache_key(category, args), value, ttl)
            .await
    }

    /// Read-through: return the cached value or run `compute` once and
    /// cache its success.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        category: CacheCategory,
        args: &Value,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(category, args).await {
            return Ok(cached);
        }
        let value = compute().await?;
        self.set(category, args, &value, None).await;
        Ok(value)
    }

    pub async fn invalidate(&self, category: CacheCategory, args: &Value) -> bool {
        self.remove(category.as_str(), &cache_key(category, args))
            .await
    }

    pub async fn get_subject<T: DeserializeOwned>(&self, subject_id: &str) -> Option<T> {
        self.read(CacheCategory::UserData.as_str(), &subject_key(subject_id))
            .await
    }

    pub async fn set_subject<T: Serialize>(&self, subject_id: &str, value: &T) -> bool {
        let ttl = self.ttl(CacheCategory::UserData);
        self.write(CacheCategory::UserData.as_str(), &subject_key(subject_id), value, ttl)
            .await
    }

    /// Drop a subject's cached profile after it changes.
    pub async fn invalidate_subject(&self, subject_id: &str) -> bool {
        self.remove(CacheCategory::UserData.as_str(), &subject_key(subject_id))
            .await
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub async fn clear_by_pattern(&self, prefix: &str) -> u64 {
        match self.store.delete_prefix(prefix).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(prefix = %prefix, removed, "Cleared cache keys");
                }
                removed
            }
            Err(e) => {
                self.fail("pattern", "delete_prefix", prefix, e);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64 * 100.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tollgate_core::ManualClock;
    use tollgate_storage::MemoryStore;
    use tollgate_test_utils::UnavailableStore;

    fn memory_cache() -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_secs(1_704_067_200));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let cache = ResponseCache::new(store, &CacheConfig::default()).with_clock(clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_key_ignores_field_order() {
        let a = cache_key(CacheCategory::Translation, &json!({"a": 1, "b": {"y": 2, "x": [1, {"q": 1, "p": 2}]}}));
        let b = cache_key(CacheCategory::Translation, &json!({"b": {"x": [1, {"p": 2, "q": 1}], "y": 2}, "a": 1}));
        assert_eq!(a, b);
        assert!(a.starts_with("translation:"));
        assert_eq!(a.len(), "translation:".len() + 24);
    }

    #[test]
    fn test_key_depends_on_category_and_values() {
        let args = json!({"language": "python"});
        assert_ne!(
            cache_key(CacheCategory::Translation, &args),
            cache_key(CacheCategory::ApiResponse, &args)
        );
        assert_ne!(
            cache_key(CacheCategory::Translation, &args),
            cache_key(CacheCategory::Translation, &json!({"language": "rust"}))
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        assert_eq!(
            canonical_json(&json!({"b": [{"d": 1, "c": null}], "a": "x"})),
            r#"{"a":"x","b":[{"c":null,"d":1}]}"#
        );
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (cache, _clock) = memory_cache();
        let args = json!({"endpoint": "/pricing"});

        assert_eq!(cache.get::<Value>(CacheCategory::Pricing, &args).await, None);
        assert!(cache.set(CacheCategory::Pricing, &args, &json!({"pro": 9}), None).await);
        assert_eq!(
            cache.get::<Value>(CacheCategory::Pricing, &args).await,
            Some(json!({"pro": 9}))
        );

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.errors), (1, 1, 0));
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_entries_expire_with_category_ttl() {
        let (cache, clock) = memory_cache();
        let args = json!({});
        cache.set(CacheCategory::HealthCheck, &args, &"ok", None).await;

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get::<String>(CacheCategory::HealthCheck, &args).await.as_deref(), Some("ok"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get::<String>(CacheCategory::HealthCheck, &args).await, None);
    }

    #[tokio::test]
    async fn test_get_or_compute_runs_fallback_once() -> Result<(), String> {
        let (cache, _clock) = memory_cache();
        let calls = AtomicUsize::new(0);
        let args = json!({"q": "languages"});

        for _ in 0..3 {
            let value: Vec<String> = cache
                .get_or_compute(CacheCategory::Languages, &args, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec!["python".to_string(), "rust".to_string()])
                })
                .await?;
            assert_eq!(value.len(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let (cache, _clock) = memory_cache();
        let args = json!({"q": 1});
        let result: Result<u32, &str> = cache
            .get_or_compute(CacheCategory::ApiResponse, &args, || async { Err("upstream down") })
            .await;
        assert_eq!(result, Err("upstream down"));
        assert_eq!(cache.get::<u32>(CacheCategory::ApiResponse, &args).await, None);
    }

    #[tokio::test]
    async fn test_subject_invalidation() {
        let (cache, _clock) = memory_cache();
        assert!(cache.set_subject("u1", &json!({"tier": "pro"})).await);
        assert!(cache.get_subject::<Value>("u1").await.is_some());

        assert!(cache.invalidate_subject("u1").await);
        assert!(cache.get_subject::<Value>("u1").await.is_none());
        assert!(!cache.invalidate_subject("u1").await);
    }

    #[tokio::test]
    async fn test_clear_by_pattern_and_invalidate() {
        let (cache, _clock) = memory_cache();
        cache.set(CacheCategory::Pricing, &json!({"a": 1}), &1, None).await;
        cache.set(CacheCategory::Pricing, &json!({"a": 2}), &2, None).await;
        cache.set(CacheCategory::Languages, &json!({}), &3, None).await;

        assert!(cache.invalidate(CacheCategory::Languages, &json!({})).await);
        assert_eq!(cache.clear_by_pattern("pricing:").await, 2);
        assert_eq!(cache.get::<u32>(CacheCategory::Pricing, &json!({"a": 1})).await, None);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_miss() {
        let cache = ResponseCache::new(Arc::new(UnavailableStore), &CacheConfig::default());
        let args = json!({"x": 1});

        assert_eq!(cache.get::<Value>(CacheCategory::Translation, &args).await, None);
        assert!(!cache.set(CacheCategory::Translation, &args, &1, None).await);
        assert!(!cache.invalidate_subject("u1").await);
        assert_eq!(cache.clear_by_pattern("translation:").await, 0);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.errors), (0, 0, 4));
    }

    #[tokio::test]
    async fn test_disabled_cache_never_touches_store() {
        let config = CacheConfig {
            enabled: false,
            ttls: CacheTtls::default(),
        };
        let cache = ResponseCache::new(Arc::new(UnavailableStore), &config);
        assert!(!cache.is_enabled());
        assert_eq!(cache.get::<Value>(CacheCategory::Pricing, &json!({})).await, None);
        assert!(!cache.set(CacheCategory::Pricing, &json!({}), &1, None).await);
        assert_eq!(cache.stats().errors, 0);
    }

    #[test]
    fn test_category_round_trip() {
        for category in CacheCategory::ALL {
            assert_eq!(category.as_str().parse::<CacheCategory>(), Ok(category));
        }
        assert!("sessions".parse::<CacheCategory>().is_err());
    }
}
