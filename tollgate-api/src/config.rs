//! Gateway Configuration Module
//!
//! Configuration for the admission pipeline: CORS, public paths, rate
//! limiting, cache TTLs and the shared store. Every struct has development
//! defaults and a `from_env()` constructor reading `TOLLGATE_*` variables.

use crate::cache::CacheCategory;
use crate::constants::{
    DEFAULT_CORS_MAX_AGE_SECS, DEFAULT_FALLBACK_BACKOFF_SECS,
    DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS, DEFAULT_RATE_LIMIT_REQUESTS,
    DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_TTL_API_RESPONSE_SECS, DEFAULT_TTL_HEALTH_CHECK_SECS,
    DEFAULT_TTL_LANGUAGES_SECS, DEFAULT_TTL_PRICING_SECS, DEFAULT_TTL_TRANSLATION_SECS,
    DEFAULT_TTL_USER_DATA_SECS,
};
use secrecy::SecretString;
use std::time::Duration;
use tollgate_core::Tier;

/// Paths that skip authentication and rate limiting (exact match).
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/",
    "/health",
    "/docs",
    "/redoc",
    "/openapi.json",
    "/supported-languages",
    "/webhook",
    "/pricing",
    "/auth/login",
    "/auth/register",
    "/auth/refresh",
    "/auth/forgot-password",
    "/auth/reset-password",
];

/// Public only while `debug` is on.
pub const DEV_TOKEN_PATH: &str = "/dev/create-token";

/// Endpoints whose calls are accounted to the caller.
pub const DEFAULT_USAGE_ENDPOINTS: &[&str] = &[
    "/translate",
    "/create-checkout-session",
    "/create-portal-session",
];

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

// ============================================================================
// GATEWAY CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Pipeline Configuration
    // ========================================================================
    /// Enables `/dev/create-token`.
    pub debug: bool,

    pub public_paths: Vec<String>,

    pub usage_endpoints: Vec<String>,

    /// Require the token's key id to match an active credential.
    pub verify_credentials: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            debug: false,
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            usage_endpoints: DEFAULT_USAGE_ENDPOINTS.iter().map(|p| p.to_string()).collect(),
            verify_credentials: true,
        }
    }
}

impl GatewayConfig {
    /// Create GatewayConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TOLLGATE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `TOLLGATE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `TOLLGATE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `TOLLGATE_DEBUG`: Enables dev routes (default: false)
    /// - `TOLLGATE_PUBLIC_PATHS`: Extra public paths, added to the defaults
    /// - `TOLLGATE_USAGE_ENDPOINTS`: Replaces the accounted endpoint list
    /// - `TOLLGATE_VERIFY_CREDENTIALS`: Check key ids against the store (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut public_paths = defaults.public_paths;
        for path in env_list("TOLLGATE_PUBLIC_PATHS").unwrap_or_default() {
            if !public_paths.contains(&path) {
                public_paths.push(path);
            }
        }

        Self {
            cors_origins: env_list("TOLLGATE_CORS_ORIGINS").unwrap_or_default(),
            cors_allow_credentials: env_flag("TOLLGATE_CORS_ALLOW_CREDENTIALS", false),
            cors_max_age_secs: std::env::var("TOLLGATE_CORS_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CORS_MAX_AGE_SECS),
            debug: env_flag("TOLLGATE_DEBUG", false),
            public_paths,
            usage_endpoints: env_list("TOLLGATE_USAGE_ENDPOINTS")
                .unwrap_or(defaults.usage_endpoints),
            verify_credentials: env_flag("TOLLGATE_VERIFY_CREDENTIALS", true),
        }
    }

    /// Exact-match public path check.
    pub fn is_public(&self, path: &str) -> bool {
        (self.debug && path == DEV_TOKEN_PATH) || self.public_paths.iter().any(|p| p == path)
    }

    pub fn is_usage_endpoint(&self, path: &str) -> bool {
        self.usage_endpoints.iter().any(|p| p == path)
    }
}

// ============================================================================
// RATE LIMIT CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Requests admitted per identity per window.
    pub limit: u64,

    pub window: Duration,

    /// Minimum spacing between idle sweeps of the local store.
    pub cleanup_interval: Duration,

    /// How long the primary store is skipped after it fails.
    pub fallback_backoff: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: DEFAULT_RATE_LIMIT_REQUESTS,
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS),
            fallback_backoff: Duration::from_secs(DEFAULT_FALLBACK_BACKOFF_SECS),
        }
    }
}

impl RateLimitConfig {
    /// Environment variables:
    /// - `TOLLGATE_RATE_LIMIT_ENABLED` (default: true)
    /// - `TOLLGATE_RATE_LIMIT_REQUESTS` (default: 100)
    /// - `TOLLGATE_RATE_LIMIT_WINDOW` in seconds (default: 3600)
    /// - `TOLLGATE_RATE_LIMIT_CLEANUP_INTERVAL` in seconds (default: 300)
    /// - `TOLLGATE_RATE_LIMIT_FALLBACK_BACKOFF` in seconds (default: 5)
    pub fn from_env() -> Self {
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                std::env::var(key)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default),
            )
        };

        Self {
            enabled: env_flag("TOLLGATE_RATE_LIMIT_ENABLED", true),
            limit: std::env::var("TOLLGATE_RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS),
            window: secs("TOLLGATE_RATE_LIMIT_WINDOW", DEFAULT_RATE_LIMIT_WINDOW_SECS),
            cleanup_interval: secs(
                "TOLLGATE_RATE_LIMIT_CLEANUP_INTERVAL",
                DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS,
            ),
            fallback_backoff: secs(
                "TOLLGATE_RATE_LIMIT_FALLBACK_BACKOFF",
                DEFAULT_FALLBACK_BACKOFF_SECS,
            ),
        }
    }

    /// Limiter with a fixed ceiling and window, other settings default.
    pub fn with_limit(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            ..Self::default()
        }
    }

    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Per-category time-to-live table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub translation: Duration,
    pub user_data: Duration,
    pub api_response: Duration,
    pub health_check: Duration,
    pub pricing: Duration,
    pub languages: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            translation: Duration::from_secs(DEFAULT_TTL_TRANSLATION_SECS),
            user_data: Duration::from_secs(DEFAULT_TTL_USER_DATA_SECS),
            api_response: Duration::from_secs(DEFAULT_TTL_API_RESPONSE_SECS),
            health_check: Duration::from_secs(DEFAULT_TTL_HEALTH_CHECK_SECS),
            pricing: Duration::from_secs(DEFAULT_TTL_PRICING_SECS),
            languages: Duration::from_secs(DEFAULT_TTL_LANGUAGES_SECS),
        }
    }
}

impl CacheTtls {
    pub fn get(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Translation => self.translation,
            CacheCategory::UserData => self.user_data,
            CacheCategory::ApiResponse => self.api_response,
            CacheCategory::HealthCheck => self.health_check,
            CacheCategory::Pricing => self.pricing,
            CacheCategory::Languages => self.languages,
        }
    }

    fn slot(&mut self, category: CacheCategory) -> &mut Duration {
        match category {
            CacheCategory::Translation => &mut self.translation,
            CacheCategory::UserData => &mut self.user_data,
            CacheCategory::ApiResponse => &mut self.api_response,
            CacheCategory::HealthCheck => &mut self.health_check,
            CacheCategory::Pricing => &mut self.pricing,
            CacheCategory::Languages => &mut self.languages,
        }
    }

    /// Defaults overridden by `TOLLGATE_CACHE_TTL_<CATEGORY>` (seconds),
    /// e.g. `TOLLGATE_CACHE_TTL_USER_DATA=60`.
    pub fn from_env() -> Self {
        let mut ttls = Self::default();
        for category in CacheCategory::ALL {
            let key = format!("TOLLGATE_CACHE_TTL_{}", category.as_str().to_uppercase());
            if let Some(secs) = std::env::var(&key).ok().and_then(|s| s.parse().ok()) {
                *ttls.slot(category) = Duration::from_secs(secs);
            }
        }
        ttls
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttls: CacheTtls,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttls: CacheTtls::default(),
        }
    }
}

impl CacheConfig {
    /// Environment variables:
    /// - `TOLLGATE_CACHE_ENABLED` (default: true)
    /// - `TOLLGATE_CACHE_TTL_<CATEGORY>` (see [`CacheTtls::from_env`])
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("TOLLGATE_CACHE_ENABLED", true),
            ttls: CacheTtls::from_env(),
        }
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis connection string. `None` runs on the in-process store only.
    pub redis_url: Option<String>,

    /// Refuse to start when Redis is configured but unreachable.
    pub redis_required: bool,

    pub namespace: String,

    /// Per-operation timeout for Redis calls.
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_required: false,
            namespace: "tollgate".to_string(),
            op_timeout: Duration::from_millis(250),
        }
    }
}

impl StoreConfig {
    /// Environment variables:
    /// - `TOLLGATE_REDIS_URL` (falls back to `REDIS_URL`)
    /// - `TOLLGATE_REDIS_REQUIRED` (default: false)
    /// - `TOLLGATE_REDIS_NAMESPACE` (default: "tollgate")
    /// - `TOLLGATE_REDIS_OP_TIMEOUT_MS` (default: 250)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("TOLLGATE_REDIS_URL")
                .or_else(|_| std::env::var("REDIS_URL"))
                .ok()
                .filter(|url| !url.trim().is_empty()),
            redis_required: env_flag("TOLLGATE_REDIS_REQUIRED", false),
            namespace: std::env::var("TOLLGATE_REDIS_NAMESPACE").unwrap_or(defaults.namespace),
            op_timeout: std::env::var("TOLLGATE_REDIS_OP_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.op_timeout),
        }
    }
}

// ============================================================================
// BOOTSTRAP CREDENTIAL
// ============================================================================

/// Operator API key seeded at startup so a fresh deployment has a first
/// credential to log in with.
#[derive(Clone)]
pub struct BootstrapConfig {
    pub api_key: Option<SecretString>,
    pub subject_id: String,
    pub tier: Tier,
}

impl std::fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("subject_id", &self.subject_id)
            .field("tier", &self.tier)
            .finish()
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            subject_id: "admin".to_string(),
            tier: Tier::Enterprise,
        }
    }
}

impl BootstrapConfig {
    /// Environment variables:
    /// - `TOLLGATE_BOOTSTRAP_API_KEY` (unset: nothing is seeded)
    /// - `TOLLGATE_BOOTSTRAP_SUBJECT` (default: "admin")
    /// - `TOLLGATE_BOOTSTRAP_TIER` (default: enterprise)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("TOLLGATE_BOOTSTRAP_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .map(|key| SecretString::new(key.into())),
            subject_id: std::env::var("TOLLGATE_BOOTSTRAP_SUBJECT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.subject_id),
            tier: std::env::var("TOLLGATE_BOOTSTRAP_TIER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.tier),
        }
    }
}
