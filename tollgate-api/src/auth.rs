//! Token Codec
//!
//! Issues and verifies the signed access/refresh token pairs that carry a
//! caller's identity through the pipeline.
//!
//! Signature checks are delegated to `jsonwebtoken`; expiry is checked here
//! against an injected [`Clock`] so tests can move time and a broken system
//! clock cannot panic inside the library.

use crate::constants::{
    ACCESS_TOKEN_TTL_SECS, API_KEY_PREFIX, API_KEY_RANDOM_BYTES, INSECURE_DEFAULT_SECRET,
    MIN_JWT_SECRET_LENGTH, REFRESH_TOKEN_TTL_SECS,
};
use crate::error::{ApiError, ApiResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tollgate_core::{
    Clock, ConfigError, Principal, Revocation, SystemClock, Tier, Timestamp, TokenType,
};
use uuid::Uuid;

// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// Signing secret that never shows up in logs.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// Create a new secret.
    ///
    /// # Errors
    /// Returns error if the secret is empty.
    pub fn new(secret: String) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "jwt_secret".to_string(),
            });
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Expose the secret value (only for key construction).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

fn build_jwt_secret(secret_str: String) -> JwtSecret {
    let normalized = if secret_str.trim().is_empty() {
        INSECURE_DEFAULT_SECRET.to_string()
    } else {
        secret_str
    };

    match JwtSecret::new(normalized) {
        Ok(secret) => secret,
        Err(_) => JwtSecret(SecretString::new(INSECURE_DEFAULT_SECRET.to_string().into())),
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Token signing configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: JwtSecret,

    /// Seconds a token is still accepted after its `exp` (default: 0)
    pub jwt_clock_skew_secs: i64,

    /// Time source for issuance and expiry checks
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("clock", &"<Clock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: build_jwt_secret(INSECURE_DEFAULT_SECRET.to_string()),
            jwt_clock_skew_secs: 0,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Config with an explicit secret and clock.
    pub fn new(secret: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            jwt_secret: build_jwt_secret(secret.into()),
            jwt_clock_skew_secs: 0,
            clock,
        }
    }

    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `TOLLGATE_JWT_SECRET`: signing secret
    /// - `TOLLGATE_JWT_CLOCK_SKEW_SECS`: expiry tolerance (default: 0)
    pub fn from_env() -> Self {
        let secret_str = std::env::var("TOLLGATE_JWT_SECRET")
            .unwrap_or_else(|_| INSECURE_DEFAULT_SECRET.to_string());

        Self {
            jwt_secret: build_jwt_secret(secret_str),
            jwt_clock_skew_secs: std::env::var("TOLLGATE_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Refuse insecure secrets when `TOLLGATE_ENVIRONMENT` is production.
    ///
    /// Outside production the same findings are logged as warnings.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("TOLLGATE_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();

        let is_production = environment == "production" || environment == "prod";

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "Cannot start server in production with insecure JWT secret. \
                     Set TOLLGATE_JWT_SECRET to a secure value. \
                     TOLLGATE_ENVIRONMENT={}",
                    environment
                )));
            }
            tracing::warn!(
                "SECURITY WARNING: Using insecure default JWT secret. \
                 Set TOLLGATE_JWT_SECRET to a random value of at least {} characters \
                 before deploying.",
                MIN_JWT_SECRET_LENGTH
            );
        }

        if self.jwt_secret.len() < MIN_JWT_SECRET_LENGTH {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars). \
                     It must be at least {} characters long.",
                    self.jwt_secret.len(),
                    MIN_JWT_SECRET_LENGTH
                )));
            } else if !self.jwt_secret.is_insecure_default() {
                tracing::warn!(
                    "SECURITY WARNING: JWT secret is short ({} chars). \
                     For production, use at least {} characters.",
                    self.jwt_secret.len(),
                    MIN_JWT_SECRET_LENGTH
                );
            }
        }

        Ok(())
    }
}

// ============================================================================
// CLAIMS AND TOKEN PAIRS
// ============================================================================

/// Claims carried by every Tollgate token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    pub tier: Tier,

    /// Hash of the API key the session was opened with
    pub key_id: String,

    /// Unique token id, the revocation lookup key
    pub jti: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl Claims {
    fn new(subject_id: &str, tier: Tier, key_id: &str, token_type: TokenType, now: i64) -> Self {
        let ttl = match token_type {
            TokenType::Access => ACCESS_TOKEN_TTL_SECS,
            TokenType::Refresh => REFRESH_TOKEN_TTL_SECS,
        };
        Self {
            sub: subject_id.to_string(),
            tier,
            key_id: key_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl,
            token_type,
        }
    }

    /// Principal bound into the request after authentication.
    pub fn to_principal(&self) -> Principal {
        Principal {
            subject_id: self.sub.clone(),
            tier: self.tier,
            key_id: self.key_id.clone(),
            token_id: self.jti.clone(),
        }
    }
}

/// Response body for token issuance and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Signature, expiry, type or shape check failed.
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// Signing failed.
    #[error("Token encoding failed: {0}")]
    Encoding(String),

    /// The clock reported a pre-epoch time.
    #[error("Clock returned pre-epoch time {0}")]
    Clock(i64),
}

// ============================================================================
// TOKEN CODEC
// ============================================================================

/// HS256 codec for access and refresh tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    skew_secs: i64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("skew_secs", &self.skew_secs)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.expose().as_bytes();

        // Signature only; `exp` is checked against our clock in `verify`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            skew_secs: config.jwt_clock_skew_secs,
            clock: Arc::clone(&config.clock),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn now(&self) -> Result<i64, TokenError> {
        let now = self.clock.now_epoch_secs();
        if now < 0 {
            tracing::error!(
                timestamp = now,
                "System clock returned pre-epoch time - server time is broken"
            );
            return Err(TokenError::Clock(now));
        }
        Ok(now)
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Issue a fresh access/refresh pair.
    pub fn issue(&self, subject_id: &str, tier: Tier, key_id: &str) -> Result<TokenPair, TokenError> {
        let now = self.now()?;
        let access = Claims::new(subject_id, tier, key_id, TokenType::Access, now);
        let refresh = Claims::new(subject_id, tier, key_id, TokenType::Refresh, now);

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            token_type: "bearer".to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECS,
        })
    }

    /// Verify signature, expiry and token type.
    ///
    /// Revocation is not consulted here.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    TokenError::Invalid("Token signature is invalid".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    TokenError::Invalid("Token is invalid".to_string())
                }
                _ => TokenError::Invalid(format!("Token validation failed: {}", e)),
            })?
            .claims;

        let now = self.now()?;
        if claims.exp < now - self.skew_secs {
            return Err(TokenError::Invalid("Token has expired".to_string()));
        }

        if claims.token_type != expected {
            return Err(TokenError::Invalid(format!(
                "Expected {} token, got {}",
                expected, claims.token_type
            )));
        }

        Ok(claims)
    }

    /// First instant at which `verify` refuses `claims` on expiry alone.
    pub fn rejects_from(&self, claims: &Claims) -> Timestamp {
        let last_accepted = claims.exp.saturating_add(self.skew_secs.max(0));
        chrono::DateTime::from_timestamp(last_accepted.saturating_add(1), 0).unwrap_or_default()
    }

    /// Denylist record that stays live for as long as `claims` can verify.
    pub fn revocation(&self, claims: &Claims, revoked_at: Timestamp, reason: &str) -> Revocation {
        Revocation {
            token_id: claims.jti.clone(),
            token_type: claims.token_type,
            expires_at: self.rejects_from(claims),
            revoked_at,
            revoked_by: Some(claims.sub.clone()),
            reason: Some(reason.to_string()),
        }
    }

    /// Mint a new access token from a refresh token.
    ///
    /// The refresh token is echoed back unchanged and stays valid.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = self.verify(refresh_token, TokenType::Refresh)?;
        let access = Claims::new(
            &claims.sub,
            claims.tier,
            &claims.key_id,
            TokenType::Access,
            self.now()?,
        );

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: refresh_token.to_string(),
            token_type: "bearer".to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECS,
        })
    }
}

// ============================================================================
// API KEYS
// ============================================================================

/// Generate a new raw API key: `tg_` plus 32 random bytes, URL-safe base64.
pub fn generate_api_key() -> String {
    let bytes: [u8; API_KEY_RANDOM_BYTES] = rand::random();
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}
