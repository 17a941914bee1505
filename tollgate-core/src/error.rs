//! Error types for Tollgate operations

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by credential, revocation, usage and key-value stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Conflict on {entity}: {reason}")]
    Conflict { entity: &'static str, reason: String },

    #[error("Store backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

impl StoreError {
    /// Shorthand for an unavailable-backend error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }

    /// Whether the error means the backend could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tollgate errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for Tollgate operations.
pub type GateResult<T> = Result<T, GateError>;
