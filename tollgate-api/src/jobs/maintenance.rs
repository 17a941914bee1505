//! Store Maintenance Background Task
//!
//! Periodically sweeps the credential store and the revocation list:
//!
//! - Credentials past `expires_at` are deactivated so lookups stop returning them
//! - Revocations whose token has expired are removed; the token would fail
//!   signature verification on expiry alone
//!
//! Both sweeps are idempotent, so running several gateway instances against
//! the same stores is safe.

use crate::constants::DEFAULT_MAINTENANCE_INTERVAL_SECS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tollgate_storage::{CredentialStore, RevocationList};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the maintenance background task.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often to sweep (default: 1 hour)
    pub interval: Duration,

    /// Sweep expired credentials (default: true)
    pub sweep_credentials: bool,

    /// Sweep stale revocations (default: true)
    pub sweep_revocations: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
            sweep_credentials: true,
            sweep_revocations: true,
        }
    }
}

impl MaintenanceConfig {
    /// Create MaintenanceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TOLLGATE_MAINTENANCE_INTERVAL_SECS`: Sweep interval (default: 3600)
    /// - `TOLLGATE_MAINTENANCE_SWEEP_CREDENTIALS`: Deactivate expired keys (default: true)
    /// - `TOLLGATE_MAINTENANCE_SWEEP_REVOCATIONS`: Drop stale revocations (default: true)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("TOLLGATE_MAINTENANCE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_MAINTENANCE_INTERVAL_SECS),
        );

        let flag = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(true)
        };

        Self {
            interval,
            sweep_credentials: flag("TOLLGATE_MAINTENANCE_SWEEP_CREDENTIALS"),
            sweep_revocations: flag("TOLLGATE_MAINTENANCE_SWEEP_REVOCATIONS"),
        }
    }

    /// Short interval for local development.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(60),
            ..Self::default()
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for maintenance activity since startup.
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    pub credentials_deactivated: AtomicU64,
    pub revocations_removed: AtomicU64,
    pub cycles: AtomicU64,
    pub errors: AtomicU64,
}

impl MaintenanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            credentials_deactivated: self.credentials_deactivated.load(Ordering::Relaxed),
            revocations_removed: self.revocations_removed.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSnapshot {
    pub credentials_deactivated: u64,
    pub revocations_removed: u64,
    pub cycles: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Runs maintenance cycles until the shutdown signal flips to `true`.
///
/// The first cycle runs immediately. Returns the metrics collected over the
/// task's lifetime.
pub async fn maintenance_task(
    credentials: Arc<dyn CredentialStore>,
    revocations: Arc<dyn RevocationList>,
    config: MaintenanceConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<MaintenanceMetrics> {
    let metrics = Arc::new(MaintenanceMetrics::new());

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        sweep_credentials = config.sweep_credentials,
        sweep_revocations = config.sweep_revocations,
        "Maintenance task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Maintenance task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                run_maintenance_cycle(credentials.as_ref(), revocations.as_ref(), &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        credentials_deactivated = snapshot.credentials_deactivated,
        revocations_removed = snapshot.revocations_removed,
        cycles = snapshot.cycles,
        errors = snapshot.errors,
        "Maintenance task completed"
    );

    metrics
}

/// Perform one maintenance cycle. Store errors are logged and counted.
pub async fn run_maintenance_cycle(
    credentials: &dyn CredentialStore,
    revocations: &dyn RevocationList,
    config: &MaintenanceConfig,
    metrics: &MaintenanceMetrics,
) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    let mut deactivated = 0u64;
    if config.sweep_credentials {
        match credentials.sweep_expired().await {
            Ok(count) => {
                deactivated = count;
                metrics
                    .credentials_deactivated
                    .fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to sweep expired credentials");
                metrics.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let mut removed = 0u64;
    if config.sweep_revocations {
        match revocations.sweep_expired().await {
            Ok(count) => {
                removed = count;
                metrics.revocations_removed.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to sweep stale revocations");
                metrics.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if deactivated > 0 || removed > 0 {
        tracing::info!(
            credentials_deactivated = deactivated,
            revocations_removed = removed,
            "Maintenance cycle completed"
        );
    } else {
        tracing::trace!("Maintenance cycle completed with nothing to sweep");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tollgate_core::{hash_api_key, Clock, Revocation, Tier, TokenType};
    use tollgate_storage::{InMemoryCredentialStore, InMemoryRevocationList};
    use tollgate_test_utils::fixtures::manual_clock;
    use tollgate_test_utils::UnavailableStore;

    #[tokio::test]
    async fn test_cycle_sweeps_both_stores() -> Result<(), String> {
        let clock = manual_clock();
        let credentials = InMemoryCredentialStore::with_clock(clock.clone());
        let revocations = InMemoryRevocationList::with_clock(clock.clone());
        let now = clock.now();

        credentials
            .create("u1", &hash_api_key("short"), "short", Tier::Free, Some(now + ChronoDuration::hours(1)))
            .await
            .map_err(|e| e.to_string())?;
        credentials
            .create("u1", &hash_api_key("forever"), "forever", Tier::Free, None)
            .await
            .map_err(|e| e.to_string())?;
        revocations
            .revoke(Revocation {
                token_id: "jti-1".to_string(),
                token_type: TokenType::Access,
                expires_at: now + ChronoDuration::minutes(30),
                revoked_at: now,
                revoked_by: None,
                reason: None,
            })
            .await
            .map_err(|e| e.to_string())?;

        clock.advance(std::time::Duration::from_secs(2 * 3600));

        let metrics = MaintenanceMetrics::new();
        let config = MaintenanceConfig::default();
        run_maintenance_cycle(&credentials, &revocations, &config, &metrics).await;
        run_maintenance_cycle(&credentials, &revocations, &config, &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.credentials_deactivated, 1);
        assert_eq!(snapshot.revocations_removed, 1);
        assert_eq!(snapshot.errors, 0);
        assert!(revocations.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cycle_counts_store_errors() {
        let metrics = MaintenanceMetrics::new();
        let credentials = InMemoryCredentialStore::new();
        run_maintenance_cycle(
            &credentials,
            &UnavailableStore,
            &MaintenanceConfig::default(),
            &metrics,
        )
        .await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 1);
        assert_eq!(snapshot.errors, 1);
    }

    #[tokio::test]
    async fn test_disabled_sweeps_are_skipped() {
        let metrics = MaintenanceMetrics::new();
        let config = MaintenanceConfig {
            sweep_credentials: false,
            sweep_revocations: false,
            ..MaintenanceConfig::default()
        };
        run_maintenance_cycle(
            &InMemoryCredentialStore::new(),
            &UnavailableStore,
            &config,
            &metrics,
        )
        .await;
        assert_eq!(metrics.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() -> Result<(), String> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(maintenance_task(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryRevocationList::new()),
            MaintenanceConfig::development(),
            shutdown_rx,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown_tx.send(true).map_err(|e| e.to_string())?;

        let metrics = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .map_err(|_| "task did not stop".to_string())?
            .map_err(|e| e.to_string())?;
        assert!(metrics.snapshot().cycles >= 1);
        Ok(())
    }
}
