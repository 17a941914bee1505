//! Clock abstraction shared by token verification, credential expiry,
//! revocation expiry and rate-limit windows.
//!
//! Every time-dependent component takes an `Arc<dyn Clock>` so tests can
//! pin or advance time without sleeping.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch milliseconds.
    fn now_millis(&self) -> i64;

    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }

    /// Current time as a UTC timestamp.
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis()).unwrap_or_default()
    }
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Fixed clock for deterministic tests, in epoch seconds.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0 * 1000
    }
}

/// Clock that only moves when told to.
///
/// Used by rate-limit and expiry tests that need to step across window
/// boundaries.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Start the clock at the given epoch seconds.
    pub fn at_secs(secs: i64) -> Self {
        Self {
            millis: AtomicI64::new(secs * 1000),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let step = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(step, Ordering::SeqCst);
    }

    /// Jump to an absolute epoch-millisecond instant.
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
