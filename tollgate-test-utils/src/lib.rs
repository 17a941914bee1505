//! Tollgate Test Utilities
//!
//! Shared test infrastructure for the Tollgate workspace:
//! - Fixtures for clocks, secrets and seeded stores
//! - A store that fails every call, for fallback and fail-closed paths
//! - Proptest generators for tiers, subjects and cache arguments

pub use tollgate_core::{
    Clock, Credential, ManualClock, Principal, Revocation, StoreError, StoreResult, Tier,
    TokenType, UsageRecord,
};
pub use tollgate_storage::{
    CredentialStore, InMemoryCredentialStore, InMemoryRevocationList, InMemoryUsageLog,
    KeyValueStore, MemoryStore, RevocationList, SlidingWindowStore, StoreBackend, UsageSink,
    WindowState,
};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// Signing secret used by every test token. Long enough for production
    /// validation.
    pub const TEST_SECRET: &str = "tollgate-test-secret-0123456789abcdef0123456789";

    /// 2024-01-01T00:00:00Z.
    pub const EPOCH_2024: i64 = 1_704_067_200;

    /// A manual clock pinned at [`EPOCH_2024`].
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_secs(EPOCH_2024))
    }

    /// Credential store on `clock` holding one active key for `subject_id`.
    ///
    /// Returns the store and the created credential.
    pub async fn seeded_credentials(
        clock: Arc<dyn Clock>,
        subject_id: &str,
        tier: Tier,
        raw_key: &str,
    ) -> StoreResult<(Arc<InMemoryCredentialStore>, Credential)> {
        let store = Arc::new(InMemoryCredentialStore::with_clock(clock));
        let credential = store
            .create(
                subject_id,
                &tollgate_core::hash_api_key(raw_key),
                "fixture",
                tier,
                None,
            )
            .await?;
        Ok((store, credential))
    }
}

// ============================================================================
// FAILING STORE
// ============================================================================

/// Store whose every call returns [`StoreError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn fail<T>() -> StoreResult<T> {
        Err(StoreError::unavailable("connection refused"))
    }
}

#[async_trait]
impl StoreBackend for UnavailableStore {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn ping(&self) -> StoreResult<()> {
        Self::fail()
    }
}

#[async_trait]
impl SlidingWindowStore for UnavailableStore {
    async fn admit(&self, _: &str, _: i64, _: i64, _: u64) -> StoreResult<WindowState> {
        Self::fail()
    }

    async fn record(&self, _: &str, _: i64, _: i64) -> StoreResult<WindowState> {
        Self::fail()
    }

    async fn snapshot(&self, _: &str, _: i64, _: i64) -> StoreResult<WindowState> {
        Self::fail()
    }
}

#[async_trait]
impl KeyValueStore for UnavailableStore {
    async fn get(&self, _: &str) -> StoreResult<Option<String>> {
        Self::fail()
    }

    async fn set_ex(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
        Self::fail()
    }

    async fn delete(&self, _: &str) -> StoreResult<bool> {
        Self::fail()
    }

    async fn delete_prefix(&self, _: &str) -> StoreResult<u64> {
        Self::fail()
    }
}

#[async_trait]
impl RevocationList for UnavailableStore {
    async fn revoke(&self, _: Revocation) -> StoreResult<()> {
        Self::fail()
    }

    async fn is_revoked(&self, _: &str) -> StoreResult<bool> {
        Self::fail()
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        Self::fail()
    }
}

#[async_trait]
impl UsageSink for UnavailableStore {
    async fn record(&self, _: UsageRecord) -> StoreResult<()> {
        Self::fail()
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tollgate inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    pub fn arb_tier() -> impl Strategy<Value = Tier> {
        prop_oneof![Just(Tier::Free), Just(Tier::Pro), Just(Tier::Enterprise)]
    }

    /// Subject ids as the user store would hand them out.
    pub fn arb_subject_id() -> impl Strategy<Value = String> {
        "[a-z0-9_-]{1,32}"
    }

    /// Hex key hashes, same shape as `hash_api_key` output.
    pub fn arb_key_id() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    /// Flat JSON objects with 0..8 distinct keys.
    pub fn arb_cache_args() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z_]{1,8}", arb_scalar(), 0..8)
            .prop_map(|entries| entries.into_iter().collect())
    }

    /// Nested JSON values up to three levels deep.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }
}
