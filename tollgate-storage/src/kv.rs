//! Shared-store capabilities.
//!
//! The rate limiter needs a sliding-window log per identity and the response
//! cache needs expiring string values. Both [`MemoryStore`](crate::MemoryStore)
//! and [`RedisStore`](crate::RedisStore) implement the two capabilities so
//! callers hold an `Arc<dyn ...>` and never branch on the backend.

use async_trait::async_trait;
use std::time::Duration;
use tollgate_core::StoreResult;

/// Common surface of every shared-store backend.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Round-trip to the backend.
    async fn ping(&self) -> StoreResult<()>;
}

/// Result of a window operation, evaluated at the operation's `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowState {
    /// Timestamps inside the window after the operation.
    pub count: u64,
    /// Oldest timestamp still inside the window.
    pub oldest_ms: Option<i64>,
    /// Whether the operation appended a timestamp.
    pub admitted: bool,
}

impl WindowState {
    /// Seconds until the oldest entry leaves the window, rounded up.
    ///
    /// Zero while the window still has room.
    pub fn retry_after_secs(&self, limit: u64, now_ms: i64, window_ms: i64) -> u64 {
        if self.count < limit {
            return 0;
        }
        let Some(oldest) = self.oldest_ms else {
            return 0;
        };
        let wait_ms = (oldest + window_ms - now_ms).max(0);
        u64::try_from(wait_ms).unwrap_or(0).div_ceil(1000)
    }
}

/// Per-key sliding-window log of millisecond timestamps.
///
/// A timestamp `t` is inside the window iff `t > now_ms - window_ms`.
#[async_trait]
pub trait SlidingWindowStore: StoreBackend {
    /// Prune, count and append `now_ms` if the count is below `limit`, as one
    /// atomic step per key.
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> StoreResult<WindowState>;

    /// Prune and append `now_ms` unconditionally.
    async fn record(&self, key: &str, now_ms: i64, window_ms: i64) -> StoreResult<WindowState>;

    /// Prune and count without appending.
    async fn snapshot(&self, key: &str, now_ms: i64, window_ms: i64) -> StoreResult<WindowState>;
}

/// String values with a per-entry time-to-live.
#[async_trait]
pub trait KeyValueStore: StoreBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64>;
}
