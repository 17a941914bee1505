//! Identity types and hashing helpers

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Hash a raw API key for storage and lookup. Raw keys are never stored.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// First `len` hex chars of the SHA-256 of `input`.
pub fn short_digest(input: &[u8], len: usize) -> String {
    let mut digest = hex::encode(Sha256::digest(input));
    digest.truncate(len);
    digest
}
