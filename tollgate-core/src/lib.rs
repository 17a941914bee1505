//! Tollgate Core - Entity Types
//!
//! Pure data structures shared by every Tollgate crate: tiers, principals,
//! credentials, revocations, usage records, clocks and the error taxonomy.
//! Storage and HTTP concerns live in `tollgate-storage` and `tollgate-api`.

pub mod clock;
pub mod entities;
pub mod error;
pub mod health;
pub mod identity;
pub mod tier;

pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use entities::{Credential, Principal, Revocation, TokenType, UsageRecord};
pub use error::{ConfigError, GateError, GateResult, StoreError, StoreResult};
pub use health::{HealthCheck, HealthStatus};
pub use identity::{hash_api_key, new_entity_id, short_digest, EntityId, Timestamp};
pub use tier::Tier;
