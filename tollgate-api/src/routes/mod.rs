//! Gateway Routes
//!
//! Routes owned by the gateway itself rather than the business handler:
//! - `auth`: API-key login, token refresh, logout and key management
//! - `health`: component health for the admission pipeline
//! - `dev`: token minting for local development (debug builds of config only)
//!
//! Also builds the CORS layer applied around the whole pipeline.

pub mod auth;
pub mod dev;
pub mod health;

use std::time::Duration;

use axum::http::{header, header::HeaderName, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

use crate::config::GatewayConfig;
use crate::constants::{
    HEADER_CORRELATION_ID, HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING,
    HEADER_RATELIMIT_RESET, HEADER_RESPONSE_TIME, HEADER_RETRY_AFTER,
};
use crate::error::{ApiError, ApiResult};

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

/// Check if running in a production environment.
pub fn is_production_environment() -> bool {
    std::env::var("TOLLGATE_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

/// Validate gateway configuration for production use.
pub fn validate_gateway_config_for_production(config: &GatewayConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set TOLLGATE_CORS_ORIGINS.",
        ));
    }
    if config.debug {
        return Err(ApiError::invalid_input(
            "Debug mode exposes /dev/create-token and cannot be enabled in production. \
             Unset TOLLGATE_DEBUG.",
        ));
    }
    if !config.verify_credentials {
        tracing::warn!(
            "Credential verification is disabled in production - deactivated API keys \
             keep working until their tokens expire.\n\
             Set TOLLGATE_VERIFY_CREDENTIALS=true to enable it."
        );
    }
    Ok(())
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from GatewayConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
pub fn build_cors_layer(config: &GatewayConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(HEADER_CORRELATION_ID),
        ])
        .expose_headers([
            HeaderName::from_static(HEADER_RATELIMIT_LIMIT),
            HeaderName::from_static(HEADER_RATELIMIT_REMAINING),
            HeaderName::from_static(HEADER_RATELIMIT_RESET),
            HeaderName::from_static(HEADER_RETRY_AFTER),
            HeaderName::from_static(HEADER_CORRELATION_ID),
            HeaderName::from_static(HEADER_RESPONSE_TIME),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any).expose_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_requires_cors_origins() {
        let config = GatewayConfig::default();
        assert!(validate_gateway_config_for_production(&config).is_err());

        let config = GatewayConfig {
            cors_origins: vec!["https://app.example.com".to_string()],
            ..GatewayConfig::default()
        };
        assert!(validate_gateway_config_for_production(&config).is_ok());
    }

    #[test]
    fn test_production_rejects_debug() {
        let config = GatewayConfig {
            cors_origins: vec!["https://app.example.com".to_string()],
            debug: true,
            ..GatewayConfig::default()
        };
        let err = validate_gateway_config_for_production(&config);
        assert!(matches!(err, Err(e) if e.message.contains("TOLLGATE_DEBUG")));
    }
}
