//! Entity types for the admission pipeline.

use crate::identity::{EntityId, Timestamp};
use crate::tier::Tier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TOKENS
// ============================================================================

/// Bearer token flavour, carried in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenType::Access),
            "refresh" => Ok(TokenType::Refresh),
            other => Err(format!("unknown token type '{}'", other)),
        }
    }
}

// ============================================================================
// PRINCIPAL
// ============================================================================

/// Authenticated caller, rebuilt from a verified access token on every
/// request and dropped when the request ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: String,
    pub tier: Tier,
    /// Opaque key identifier (the credential's key hash).
    pub key_id: String,
    /// `jti` of the access token that authenticated the request.
    pub token_id: String,
}

impl Principal {
    pub fn has_tier(&self, minimum: Tier) -> bool {
        self.tier.satisfies(minimum)
    }
}

// ============================================================================
// CREDENTIAL
// ============================================================================

/// Hashed API-key record owned by a single subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: EntityId,
    pub subject_id: String,
    pub key_hash: String,
    pub display_name: String,
    pub tier: Tier,
    pub active: bool,
    pub created_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl Credential {
    /// A credential can authenticate iff it is active and not past expiry.
    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.active && self.expires_at.map_or(true, |exp| exp > now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

// ============================================================================
// REVOCATION
// ============================================================================

/// Denylist entry for a token revoked before its natural expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub token_id: String,
    pub token_type: TokenType,
    pub expires_at: Timestamp,
    pub revoked_at: Timestamp,
    pub revoked_by: Option<String>,
    pub reason: Option<String>,
}

impl Revocation {
    /// Only meaningful while the revoked token could still verify.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

// ============================================================================
// USAGE
// ============================================================================

/// One accounted request against a metered endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub subject_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub recorded_at: Timestamp,
}

impl UsageRecord {
    /// Error classification for a status code, `HTTP_<status>` for 4xx/5xx.
    pub fn classify_status(status_code: u16) -> Option<String> {
        (status_code >= 400).then(|| format!("HTTP_{}", status_code))
    }
}
