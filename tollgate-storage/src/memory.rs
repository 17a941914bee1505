//! In-process store backend.
//!
//! Serves as the rate limiter's local fallback and as the cache store when
//! no Redis URL is configured. Each key is mutated under its `DashMap` entry
//! guard, which makes `admit` atomic per identity.

use crate::kv::{KeyValueStore, SlidingWindowStore, StoreBackend, WindowState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::{Clock, StoreResult, SystemClock};

/// Expired values are swept once every this many writes.
const VALUE_SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at_ms: i64,
}

pub struct MemoryStore {
    windows: DashMap<String, VecDeque<i64>>,
    values: DashMap<String, MemoryEntry>,
    writes: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// The clock only drives value expiry. Window operations take `now_ms`
    /// from the caller.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            values: DashMap::new(),
            writes: AtomicU64::new(0),
            clock,
        }
    }

    /// Number of identities currently holding a window.
    pub fn identity_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop identities whose newest timestamp is at or before `cutoff_ms`.
    pub fn evict_idle(&self, cutoff_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, log| log.iter().max().is_some_and(|newest| *newest > cutoff_ms));
        before.saturating_sub(self.windows.len())
    }

    /// Number of stored values, expired ones included until swept.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Drop every value past its TTL. Returns how many were dropped.
    pub fn purge_expired_values(&self) -> usize {
        let now_ms = self.clock.now_millis();
        let before = self.values.len();
        self.values.retain(|_, entry| entry.expires_at_ms > now_ms);
        before.saturating_sub(self.values.len())
    }

    fn prune(log: &mut VecDeque<i64>, now_ms: i64, window_ms: i64) {
        let floor = now_ms - window_ms;
        log.retain(|t| *t > floor);
    }

    fn state(log: &VecDeque<i64>, admitted: bool) -> WindowState {
        WindowState {
            count: log.len() as u64,
            oldest_ms: log.iter().min().copied(),
            admitted,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SlidingWindowStore for MemoryStore {
    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> StoreResult<WindowState> {
        let mut log = self.windows.entry(key.to_string()).or_default();
        Self::prune(&mut log, now_ms, window_ms);
        let admitted = (log.len() as u64) < limit;
        if admitted {
            log.push_back(now_ms);
        }
        Ok(Self::state(&log, admitted))
    }

    async fn record(&self, key: &str, now_ms: i64, window_ms: i64) -> StoreResult<WindowState> {
        let mut log = self.windows.entry(key.to_string()).or_default();
        Self::prune(&mut log, now_ms, window_ms);
        log.push_back(now_ms);
        Ok(Self::state(&log, true))
    }

    async fn snapshot(&self, key: &str, now_ms: i64, window_ms: i64) -> StoreResult<WindowState> {
        match self.windows.get_mut(key) {
            Some(mut log) => {
                Self::prune(&mut log, now_ms, window_ms);
                Ok(Self::state(&log, false))
            }
            None => Ok(WindowState::default()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now_ms = self.clock.now_millis();
        let found = self
            .values
            .get(key)
            .map(|entry| (entry.expires_at_ms > now_ms).then(|| entry.value.clone()));
        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.values
                    .remove_if(key, |_, entry| entry.expires_at_ms <= now_ms);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % VALUE_SWEEP_EVERY == 0 {
            let purged = self.purge_expired_values();
            if purged > 0 {
                tracing::debug!(purged, "Swept expired values");
            }
        }

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at_ms: self.clock.now_millis().saturating_add(ttl_ms),
        };
        self.values.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.values.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let now_ms = self.clock.now_millis();
        let mut removed = 0u64;
        self.values.retain(|key, entry| {
            if !key.starts_with(prefix) {
                return true;
            }
            if entry.expires_at_ms > now_ms {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }
}
