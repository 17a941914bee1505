//! Tollgate Storage - Store Traits and Backends
//!
//! Repository traits for credentials, revocations and usage accounting,
//! plus the key-value and sliding-window capabilities shared by the rate
//! limiter and response cache.
//!
//! Two backends implement the shared-store capabilities:
//! - [`RedisStore`]: distributed, used as the primary in production
//! - [`MemoryStore`]: in-process, used as the rate-limit fallback and in tests
//!
//! [`RedisStore`] also implements [`CredentialStore`] and [`RevocationList`]
//! so every gateway replica sees the same keys and logouts.

pub mod credentials;
pub mod kv;
pub mod memory;
pub mod redis_records;
pub mod redis_store;
pub mod revocations;
pub mod usage;

pub use credentials::{CredentialStore, InMemoryCredentialStore};
pub use kv::{KeyValueStore, SlidingWindowStore, StoreBackend, WindowState};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use revocations::{InMemoryRevocationList, RevocationList};
pub use usage::{InMemoryUsageLog, TracingUsageSink, UsageSink};
