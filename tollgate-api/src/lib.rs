//! Tollgate API - Admission Pipeline for a Multi-Tenant API Gateway
//!
//! Every request passes correlation, authentication, rate limiting and usage
//! accounting before reaching the business handler. Handlers get a response
//! cache and the authenticated [`tollgate_core::Principal`].
//!
//! Shared state is assembled once with [`GatewayState::builder`] and wired
//! around the business routes by [`build_router`].

pub mod auth;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{generate_api_key, AuthConfig, Claims, JwtSecret, TokenCodec, TokenError, TokenPair};
pub use bootstrap::seed_bootstrap_credential;
pub use cache::{cache_key, canonical_json, CacheCategory, CacheStats, ResponseCache};
pub use config::{
    BootstrapConfig, CacheConfig, CacheTtls, GatewayConfig, RateLimitConfig, StoreConfig,
};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{AuthExtractor, CorrelationId, RateLimitRejection};
pub use pipeline::{build_router, GatewayState, GatewayStateBuilder};
pub use rate_limit::{RateLimitDecision, RateLimitStats, RateLimiter, RateLimiterCounters};
