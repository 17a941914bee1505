//! Token revocation denylist.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tollgate_core::{Clock, Revocation, StoreResult, SystemClock};

/// Denylist of token ids revoked before their natural expiry.
#[async_trait]
pub trait RevocationList: Send + Sync {
    /// Add (or replace) a revocation record.
    async fn revoke(&self, revocation: Revocation) -> StoreResult<()>;

    /// Whether `token_id` has a live revocation record.
    async fn is_revoked(&self, token_id: &str) -> StoreResult<bool>;

    /// Remove records past their expiry. Returns how many were removed.
    async fn sweep_expired(&self) -> StoreResult<u64>;
}

pub struct InMemoryRevocationList {
    entries: DashMap<String, Revocation>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRevocationList {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryRevocationList {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RevocationList for InMemoryRevocationList {
    async fn revoke(&self, revocation: Revocation) -> StoreResult<()> {
        tracing::debug!(
            token_id = %revocation.token_id,
            token_type = %revocation.token_type,
            reason = ?revocation.reason,
            "Token revoked"
        );
        self.entries.insert(revocation.token_id.clone(), revocation);
        Ok(())
    }

    async fn is_revoked(&self, token_id: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(token_id)
            .is_some_and(|revocation| revocation.is_live(now)))
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut removed = 0u64;
        self.entries.retain(|_, revocation| {
            let live = revocation.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        Ok(removed)
    }
}
