//! API-key credential repository.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tollgate_core::{
    new_entity_id, Clock, Credential, EntityId, StoreError, StoreResult, SystemClock, Tier,
    Timestamp,
};

/// Persistence for hashed API keys.
///
/// Lookups by hash only ever return active credentials, so callers cannot
/// accept a deactivated key by forgetting a filter.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store a new credential. Fails with `Conflict` if the hash is taken.
    async fn create(
        &self,
        subject_id: &str,
        key_hash: &str,
        display_name: &str,
        tier: Tier,
        expires_at: Option<Timestamp>,
    ) -> StoreResult<Credential>;

    /// Active credential with this hash, if any.
    async fn find_by_hash(&self, key_hash: &str) -> StoreResult<Option<Credential>>;

    /// All credentials (active or not) owned by a subject, newest first.
    async fn list_for_subject(&self, subject_id: &str) -> StoreResult<Vec<Credential>>;

    /// Record that a credential was just used.
    async fn touch_last_used(&self, id: EntityId) -> StoreResult<()>;

    /// Deactivate a credential. Returns whether it was active before.
    async fn deactivate(&self, id: EntityId) -> StoreResult<bool>;

    /// Deactivate every credential past its expiry. Returns how many flipped.
    async fn sweep_expired(&self) -> StoreResult<u64>;
}

/// In-memory credential store backed by `DashMap`.
pub struct InMemoryCredentialStore {
    by_id: DashMap<EntityId, Credential>,
    by_hash: DashMap<String, EntityId>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            by_id: DashMap::new(),
            by_hash: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn not_found(id: EntityId) -> StoreError {
        StoreError::NotFound {
            entity: "credential",
            id,
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create(
        &self,
        subject_id: &str,
        key_hash: &str,
        display_name: &str,
        tier: Tier,
        expires_at: Option<Timestamp>,
    ) -> StoreResult<Credential> {
        // The hash index entry is held while the record is inserted so two
        // concurrent creates with the same hash cannot both succeed.
        match self.by_hash.entry(key_hash.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                entity: "credential",
                reason: "key hash already registered".to_string(),
            }),
            Entry::Vacant(slot) => {
                let credential = Credential {
                    id: new_entity_id(),
                    subject_id: subject_id.to_string(),
                    key_hash: key_hash.to_string(),
                    display_name: display_name.to_string(),
                    tier,
                    active: true,
                    created_at: self.clock.now(),
                    last_used_at: None,
                    expires_at,
                };
                self.by_id.insert(credential.id, credential.clone());
                slot.insert(credential.id);
                Ok(credential)
            }
        }
    }

    async fn find_by_hash(&self, key_hash: &str) -> StoreResult<Option<Credential>> {
        let Some(id) = self.by_hash.get(key_hash).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self
            .by_id
            .get(&id)
            .filter(|credential| credential.active)
            .map(|credential| credential.clone()))
    }

    async fn list_for_subject(&self, subject_id: &str) -> StoreResult<Vec<Credential>> {
        let mut credentials: Vec<Credential> = self
            .by_id
            .iter()
            .filter(|entry| entry.subject_id == subject_id)
            .map(|entry| entry.value().clone())
            .collect();
        credentials.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(credentials)
    }

    async fn touch_last_used(&self, id: EntityId) -> StoreResult<()> {
        let mut credential = self.by_id.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        credential.last_used_at = Some(self.clock.now());
        Ok(())
    }

    async fn deactivate(&self, id: EntityId) -> StoreResult<bool> {
        let mut credential = self.by_id.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        let was_active = credential.active;
        credential.active = false;
        Ok(was_active)
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut deactivated = 0u64;
        for mut credential in self.by_id.iter_mut() {
            if credential.active && credential.is_expired(now) {
                credential.active = false;
                deactivated += 1;
            }
        }
        if deactivated > 0 {
            tracing::info!(count = deactivated, "Deactivated expired credentials");
        }
        Ok(deactivated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tollgate_core::{hash_api_key, ManualClock};

    fn store_at(secs: i64) -> (InMemoryCredentialStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_secs(secs));
        (InMemoryCredentialStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_create_and_find_by_hash() -> StoreResult<()> {
        let (store, _) = store_at(1_704_067_200);
        let hash = hash_api_key("tg_key_one");
        let created = store.create("u1", &hash, "laptop", Tier::Pro, None).await?;

        let found = store.find_by_hash(&hash).await?;
        assert_eq!(found.as_ref().map(|c| c.id), Some(created.id));
        assert_eq!(found.map(|c| c.tier), Some(Tier::Pro));
        assert!(store.find_by_hash("unknown").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_hash_conflicts() -> StoreResult<()> {
        let (store, _) = store_at(1_704_067_200);
        store.create("u1", "h", "a", Tier::Free, None).await?;
        let err = store.create("u2", "h", "b", Tier::Free, None).await;
        assert!(matches!(err, Err(StoreError::Conflict { .. })));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_deactivated_credential_is_invisible_to_lookup() -> StoreResult<()> {
        let (store, _) = store_at(1_704_067_200);
        let credential = store.create("u1", "h", "a", Tier::Free, None).await?;

        assert!(store.deactivate(credential.id).await?);
        assert!(store.find_by_hash("h").await?.is_none());
        // one-way: a second deactivate reports it was already inactive
        assert!(!store.deactivate(credential.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_id_is_not_found() {
        let (store, _) = store_at(1_704_067_200);
        let id = new_entity_id();
        assert!(matches!(
            store.deactivate(id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.touch_last_used(id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_touch_last_used_uses_clock() -> StoreResult<()> {
        let (store, clock) = store_at(1_704_067_200);
        let credential = store.create("u1", "h", "a", Tier::Free, None).await?;
        clock.advance(std::time::Duration::from_secs(30));

        store.touch_last_used(credential.id).await?;
        let found = store.find_by_hash("h").await?;
        assert_eq!(
            found.and_then(|c| c.last_used_at).map(|t| t.timestamp()),
            Some(1_704_067_230)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_expired_is_idempotent() -> StoreResult<()> {
        let (store, clock) = store_at(1_704_067_200);
        let soon = clock.now() + Duration::seconds(10);
        store.create("u1", "short", "a", Tier::Free, Some(soon)).await?;
        store.create("u1", "forever", "b", Tier::Free, None).await?;

        assert_eq!(store.sweep_expired().await?, 0);
        clock.advance(std::time::Duration::from_secs(11));
        assert_eq!(store.sweep_expired().await?, 1);
        assert_eq!(store.sweep_expired().await?, 0);

        assert!(store.find_by_hash("short").await?.is_none());
        assert!(store.find_by_hash("forever").await?.is_some());
        // soft-deactivated, not deleted
        assert_eq!(store.list_for_subject("u1").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_for_subject_filters_owner() -> StoreResult<()> {
        let (store, clock) = store_at(1_704_067_200);
        store.create("u1", "h1", "first", Tier::Free, None).await?;
        clock.advance(std::time::Duration::from_secs(1));
        store.create("u1", "h2", "second", Tier::Free, None).await?;
        store.create("u2", "h3", "other", Tier::Free, None).await?;

        let names: Vec<String> = store
            .list_for_subject("u1")
            .await?
            .into_iter()
            .map(|c| c.display_name)
            .collect();
        assert_eq!(names, vec!["second".to_string(), "first".to_string()]);
        Ok(())
    }
}
