//! Credentials and revocations on [`RedisStore`].
//!
//! Key layout under the store namespace:
//!
//! ```text
//! {ns}:cred:{id}              hash: record (JSON), active (1/0), last_used_at (ms)
//! {ns}:cred-hash:{key_hash}   string: credential id
//! {ns}:cred-subject:{subject} set: credential ids
//! {ns}:cred-expiry            sorted set: credential id scored by expires_at (ms)
//! {ns}:revoked:{jti}          string: revocation JSON, expiring at expires_at
//! ```
//!
//! Mutable fields sit in their own hash fields so `touch_last_used` can never
//! write back a stale `active` flag.

use async_trait::async_trait;
use std::collections::HashMap;
use tollgate_core::{
    new_entity_id, Credential, EntityId, Revocation, StoreError, StoreResult, Tier, Timestamp,
};
use uuid::Uuid;

use crate::credentials::CredentialStore;
use crate::redis_store::RedisStore;
use crate::revocations::RevocationList;

// Returns the previous `active` flag (0/1), or -1 when the credential is missing.
const DEACTIVATE_SCRIPT: &str = r"
local old = redis.call('HGET', KEYS[1], 'active')
if not old then
    return -1
end
redis.call('HSET', KEYS[1], 'active', '0')
redis.call('ZREM', KEYS[2], ARGV[1])
return tonumber(old)
";

// Returns 1 when touched, 0 when the credential is missing.
const TOUCH_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'last_used_at', ARGV[1])
return 1
";

fn serialization(e: serde_json::Error) -> StoreError {
    StoreError::Serialization {
        reason: e.to_string(),
    }
}

fn not_found(id: EntityId) -> StoreError {
    StoreError::NotFound {
        entity: "credential",
        id,
    }
}

impl RedisStore {
    fn credential_key(&self, id: EntityId) -> String {
        format!("{}:cred:{}", self.namespace, id)
    }

    fn credential_hash_key(&self, key_hash: &str) -> String {
        format!("{}:cred-hash:{}", self.namespace, key_hash)
    }

    fn credential_subject_key(&self, subject_id: &str) -> String {
        format!("{}:cred-subject:{}", self.namespace, subject_id)
    }

    fn credential_expiry_key(&self) -> String {
        format!("{}:cred-expiry", self.namespace)
    }

    fn revocation_key(&self, token_id: &str) -> String {
        format!("{}:revoked:{}", self.namespace, token_id)
    }

    /// Rebuild a credential from its hash fields. `None` if the hash is gone.
    fn credential_from_fields(fields: HashMap<String, String>) -> StoreResult<Option<Credential>> {
        let Some(record) = fields.get("record") else {
            return Ok(None);
        };
        let mut credential: Credential = serde_json::from_str(record).map_err(serialization)?;
        credential.active = fields.get("active").is_some_and(|v| v == "1");
        credential.last_used_at = fields
            .get("last_used_at")
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(chrono::DateTime::from_timestamp_millis);
        Ok(Some(credential))
    }

    async fn load_credential(&self, id: EntityId) -> StoreResult<Option<Credential>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = self
            .run(
                "hgetall",
                redis::cmd("HGETALL")
                    .arg(self.credential_key(id))
                    .query_async(&mut conn),
            )
            .await?;
        Self::credential_from_fields(fields)
    }

    async fn deactivate_credential(&self, id: EntityId) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(DEACTIVATE_SCRIPT);
        let mut invocation = script.key(self.credential_key(id));
        invocation
            .key(self.credential_expiry_key())
            .arg(id.to_string());
        self.run("deactivate", invocation.invoke_async(&mut conn))
            .await
    }
}

#[async_trait]
impl CredentialStore for RedisStore {
    async fn create(
        &self,
        subject_id: &str,
        key_hash: &str,
        display_name: &str,
        tier: Tier,
        expires_at: Option<Timestamp>,
    ) -> StoreResult<Credential> {
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
        let id = credential.id.to_string();
        let record = serde_json::to_string(&credential).map_err(serialization)?;
        let mut conn = self.conn.clone();

        // The hash index is claimed first so concurrent creates cannot both win.
        let claimed: Option<String> = self
            .run(
                "create",
                redis::cmd("SET")
                    .arg(self.credential_hash_key(key_hash))
                    .arg(&id)
                    .arg("NX")
                    .query_async(&mut conn),
            )
            .await?;
        if claimed.is_none() {
            return Err(StoreError::Conflict {
                entity: "credential",
                reason: "key hash already registered".to_string(),
            });
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(self.credential_key(credential.id))
            .arg("record")
            .arg(&record)
            .arg("active")
            .arg("1")
            .ignore()
            .cmd("SADD")
            .arg(self.credential_subject_key(subject_id))
            .arg(&id)
            .ignore();
        if let Some(expires_at) = expires_at {
            pipe.cmd("ZADD")
                .arg(self.credential_expiry_key())
                .arg(expires_at.timestamp_millis())
                .arg(&id)
                .ignore();
        }
        let _: () = self.run("create", pipe.query_async(&mut conn)).await?;

        Ok(credential)
    }

    async fn find_by_hash(&self, key_hash: &str) -> StoreResult<Option<Credential>> {
        let mut conn = self.conn.clone();
        let id: Option<String> = self
            .run(
                "get",
                redis::cmd("GET")
                    .arg(self.credential_hash_key(key_hash))
                    .query_async(&mut conn),
            )
            .await?;
        let Some(id) = id.and_then(|id| Uuid::parse_str(&id).ok()) else {
            return Ok(None);
        };
        Ok(self.load_credential(id).await?.filter(|c| c.active))
    }

    async fn list_for_subject(&self, subject_id: &str) -> StoreResult<Vec<Credential>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = self
            .run(
                "smembers",
                redis::cmd("SMEMBERS")
                    .arg(self.credential_subject_key(subject_id))
                    .query_async(&mut conn),
            )
            .await?;

        let mut credentials = Vec::with_capacity(ids.len());
        for id in ids.iter().filter_map(|id| Uuid::parse_str(id).ok()) {
            if let Some(credential) = self.load_credential(id).await? {
                credentials.push(credential);
            }
        }
        credentials.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(credentials)
    }

    async fn touch_last_used(&self, id: EntityId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(TOUCH_SCRIPT);
        let mut invocation = script.key(self.credential_key(id));
        invocation.arg(self.clock.now_millis());
        let touched: i64 = self.run("touch", invocation.invoke_async(&mut conn)).await?;
        if touched == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn deactivate(&self, id: EntityId) -> StoreResult<bool> {
        match self.deactivate_credential(id).await? {
            -1 => Err(not_found(id)),
            previous => Ok(previous == 1),
        }
    }

    async fn sweep_expired(&self) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = self
            .run(
                "zrangebyscore",
                redis::cmd("ZRANGEBYSCORE")
                    .arg(self.credential_expiry_key())
                    .arg("-inf")
                    .arg(self.clock.now_millis())
                    .query_async(&mut conn),
            )
            .await?;

        let mut deactivated = 0u64;
        for id in due.iter().filter_map(|id| Uuid::parse_str(id).ok()) {
            if self.deactivate_credential(id).await? == 1 {
                deactivated += 1;
            }
        }
        Ok(deactivated)
    }
}

#[async_trait]
impl RevocationList for RedisStore {
    async fn revoke(&self, revocation: Revocation) -> StoreResult<()> {
        let record = serde_json::to_string(&revocation).map_err(serialization)?;
        let mut conn = self.conn.clone();
        let _: () = self
            .run(
                "revoke",
                redis::cmd("SET")
                    .arg(self.revocation_key(&revocation.token_id))
                    .arg(record)
                    .arg("PXAT")
                    .arg(revocation.expires_at.timestamp_millis())
                    .query_async(&mut conn),
            )
            .await?;

        tracing::debug!(
            token_id = %revocation.token_id,
            token_type = %revocation.token_type,
            reason = ?revocation.reason,
            "Token revoked"
        );
        Ok(())
    }

    async fn is_revoked(&self, token_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let exists: u64 = self
            .run(
                "exists",
                redis::cmd("EXISTS")
                    .arg(self.revocation_key(token_id))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(exists > 0)
    }

    /// Redis expires revocation keys itself.
    async fn sweep_expired(&self) -> StoreResult<u64> {
        Ok(0)
    }
}
