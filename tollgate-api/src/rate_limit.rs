//! Sliding-Window Rate Limiter
//!
//! Admission is decided per identity against a trailing window of request
//! timestamps. A distributed store is preferred; when it fails the limiter
//! marks it degraded for a short back-off and answers from the in-process
//! store. Requests are never failed because a backend is down.

use crate::config::RateLimitConfig;
use crate::telemetry::GatewayMetrics;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tollgate_core::{Clock, StoreResult};
use tollgate_storage::{MemoryStore, SlidingWindowStore, StoreBackend, WindowState};

/// Outcome of one admission check, carried into response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until a slot frees up; zero when allowed.
    pub retry_after: u64,
    /// `now + window`, epoch seconds.
    pub reset_epoch: i64,
}

/// Window snapshot for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub identity: String,
    pub limit: u64,
    pub window_secs: u64,
    pub current: u64,
    pub remaining: u64,
    pub retry_after: u64,
    pub backend: &'static str,
}

/// Lifetime counters across all identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimiterCounters {
    pub allowed: u64,
    pub rejected: u64,
    pub fallbacks: u64,
    pub idle_evicted: u64,
}

#[derive(Debug, Clone, Copy)]
enum WindowOp {
    Admit(u64),
    Record,
    Snapshot,
}

impl WindowOp {
    fn name(self) -> &'static str {
        match self {
            WindowOp::Admit(_) => "admit",
            WindowOp::Record => "record",
            WindowOp::Snapshot => "snapshot",
        }
    }

    async fn apply(
        self,
        store: &dyn SlidingWindowStore,
        identity: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> StoreResult<WindowState> {
        match self {
            WindowOp::Admit(limit) => store.admit(identity, now_ms, window_ms, limit).await,
            WindowOp::Record => store.record(identity, now_ms, window_ms).await,
            WindowOp::Snapshot => store.snapshot(identity, now_ms, window_ms).await,
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    primary: Option<Arc<dyn SlidingWindowStore>>,
    local: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<GatewayMetrics>>,
    degraded_until_ms: AtomicI64,
    last_sweep_ms: AtomicI64,
    allowed: AtomicU64,
    rejected: AtomicU64,
    fallbacks: AtomicU64,
    idle_evicted: AtomicU64,
}

impl RateLimiter {
    /// Limiter preferring `primary` when given, falling back to an in-process store.
    pub fn with_clock(
        config: RateLimitConfig,
        primary: Option<Arc<dyn SlidingWindowStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now_ms = clock.now_millis();
        Self {
            config,
            primary,
            local: Arc::new(MemoryStore::with_clock(Arc::clone(&clock))),
            clock,
            metrics: None,
            degraded_until_ms: AtomicI64::new(i64::MIN),
            last_sweep_ms: AtomicI64::new(now_ms),
            allowed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            idle_evicted: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The primary store, unless absent or inside its degraded back-off.
    ///
    /// This is the only place that chooses a backend.
    fn primary(&self, now_ms: i64) -> Option<&dyn SlidingWindowStore> {
        self.primary
            .as_deref()
            .filter(|_| now_ms >= self.degraded_until_ms.load(Ordering::Acquire))
    }

    /// Name of the backend that would serve a call right now.
    pub fn active_backend(&self) -> &'static str {
        match self.primary(self.clock.now_millis()) {
            Some(store) => store.name(),
            None => self.local.name(),
        }
    }

    /// Whether a configured primary is currently being bypassed.
    pub fn is_degraded(&self) -> bool {
        self.primary.is_some() && self.primary(self.clock.now_millis()).is_none()
    }

    fn backoff_ms(&self) -> i64 {
        i64::try_from(self.config.fallback_backoff.as_millis()).unwrap_or(i64::MAX)
    }

    async fn execute(&self, identity: &str, op: WindowOp) -> (WindowState, i64) {
        let now_ms = self.clock.now_millis();
        let window_ms = self.config.window_ms();

        if let Some(store) = self.primary(now_ms) {
            match op.apply(store, identity, now_ms, window_ms).await {
                Ok(state) => return (state, now_ms),
                Err(e) => {
                    tracing::warn!(
                        identity = %identity,
                        backend = store.name(),
                        operation = op.name(),
                        error = %e,
                        "Rate-limit backend failed, using local fallback"
                    );
                    self.degraded_until_ms
                        .store(now_ms.saturating_add(self.backoff_ms()), Ordering::Release);
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fallback(op.name());
                    }
                }
            }
        }

        let local: &dyn SlidingWindowStore = self.local.as_ref();
        match op.apply(local, identity, now_ms, window_ms).await {
            Ok(state) => (state, now_ms),
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "Local rate-limit store failed");
                (WindowState::default(), now_ms)
            }
        }
    }

    fn maybe_sweep(&self, now_ms: i64) {
        let interval_ms = i64::try_from(self.config.cleanup_interval.as_millis()).unwrap_or(i64::MAX);
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < interval_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let cutoff = now_ms.saturating_sub(self.config.window_ms().saturating_mul(2));
        let evicted = self.local.evict_idle(cutoff);
        if evicted > 0 {
            self.idle_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, "Evicted idle rate-limit identities");
        }
    }

    /// Prune, count and append in one step; the pipeline's admission call.
    pub async fn check(&self, identity: &str) -> RateLimitDecision {
        let limit = self.config.limit;
        let (state, now_ms) = self.execute(identity, WindowOp::Admit(limit)).await;
        self.maybe_sweep(now_ms);

        let window_ms = self.config.window_ms();
        let allowed = state.admitted;
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(allowed);
        }

        RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(state.count),
            retry_after: if allowed {
                0
            } else {
                state.retry_after_secs(limit, now_ms, window_ms)
            },
            reset_epoch: now_ms.div_euclid(1000) + window_ms.div_euclid(1000),
        }
    }

    /// Whether one more request would fit, without recording it.
    pub async fn is_allowed(&self, identity: &str) -> bool {
        let (state, _) = self.execute(identity, WindowOp::Snapshot).await;
        state.count < self.config.limit
    }

    /// Append a request unconditionally.
    pub async fn record(&self, identity: &str) {
        self.execute(identity, WindowOp::Record).await;
    }

    pub async fn remaining(&self, identity: &str) -> u64 {
        let (state, _) = self.execute(identity, WindowOp::Snapshot).await;
        self.config.limit.saturating_sub(state.count)
    }

    /// Seconds until the oldest entry leaves the window, or 0 if under limit.
    pub async fn retry_after(&self, identity: &str) -> u64 {
        let (state, now_ms) = self.execute(identity, WindowOp::Snapshot).await;
        state.retry_after_secs(self.config.limit, now_ms, self.config.window_ms())
    }

    pub async fn stats(&self, identity: &str) -> RateLimitStats {
        let (state, now_ms) = self.execute(identity, WindowOp::Snapshot).await;
        let limit = self.config.limit;
        RateLimitStats {
            identity: identity.to_string(),
            limit,
            window_secs: self.config.window.as_secs(),
            current: state.count,
            remaining: limit.saturating_sub(state.count),
            retry_after: state.retry_after_secs(limit, now_ms, self.config.window_ms()),
            backend: self.active_backend(),
        }
    }

    pub fn counters(&self) -> RateLimiterCounters {
        RateLimiterCounters {
            allowed: self.allowed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            idle_evicted: self.idle_evicted.load(Ordering::Relaxed),
        }
    }

    /// Identities held by the local store.
    pub fn local_identities(&self) -> usize {
        self.local.identity_count()
    }
}
