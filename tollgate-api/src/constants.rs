//! Constants for Tollgate API
//!
//! Centralized defaults for token lifetimes, rate limiting, cache TTLs and
//! request monitoring.

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Access token lifetime in seconds (30 minutes). Not configurable.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 30 * 60;

/// Refresh token lifetime in seconds (30 days). Not configurable.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Minimum required length for signing secrets in production.
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Placeholder secret used when none is configured.
pub const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

/// Prefix carried by every generated API key.
pub const API_KEY_PREFIX: &str = "tg_";

/// Random bytes behind each generated API key.
pub const API_KEY_RANDOM_BYTES: usize = 32;

/// Shortest operator-supplied bootstrap key accepted at startup.
pub const MIN_BOOTSTRAP_KEY_LENGTH: usize = 24;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Default request ceiling per identity per window.
pub const DEFAULT_RATE_LIMIT_REQUESTS: u64 = 100;

/// Default sliding window length in seconds (1 hour).
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 3600;

/// Minimum spacing between idle-identity sweeps of the local store.
pub const DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// How long the primary store is bypassed after a failure.
pub const DEFAULT_FALLBACK_BACKOFF_SECS: u64 = 5;

/// Characters of the key id used in a `key:` identity.
pub const IDENTITY_KEY_PREFIX_LEN: usize = 16;

/// Hex characters of the bearer digest used in a `token:` identity.
pub const IDENTITY_TOKEN_DIGEST_LEN: usize = 16;

// ============================================================================
// CACHE
// ============================================================================

/// Hex characters of the argument digest in a cache key.
pub const CACHE_KEY_DIGEST_LEN: usize = 24;

pub const DEFAULT_TTL_TRANSLATION_SECS: u64 = 3600;
pub const DEFAULT_TTL_USER_DATA_SECS: u64 = 300;
pub const DEFAULT_TTL_API_RESPONSE_SECS: u64 = 900;
pub const DEFAULT_TTL_HEALTH_CHECK_SECS: u64 = 60;
pub const DEFAULT_TTL_PRICING_SECS: u64 = 1800;
pub const DEFAULT_TTL_LANGUAGES_SECS: u64 = 3600;

// ============================================================================
// MONITORING
// ============================================================================

/// Requests slower than this are logged at warn.
pub const SLOW_REQUEST_THRESHOLD_MS: u128 = 2000;

/// Length of generated correlation ids.
pub const CORRELATION_ID_LEN: usize = 8;

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// MAINTENANCE
// ============================================================================

/// How often expired credentials and revocations are swept (1 hour).
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 3600;

// ============================================================================
// HEADERS
// ============================================================================

pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
pub const HEADER_RESPONSE_TIME: &str = "x-response-time";
pub const HEADER_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";
