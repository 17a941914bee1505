//! Health Check Endpoint
//!
//! `GET /health` reports each admission component. No authentication, no
//! rate limiting. Responds 503 only when a component would make every
//! authenticated request fail.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use tollgate_core::{HealthCheck, HealthStatus};

use crate::cache::CacheStats;
use crate::pipeline::GatewayState;
use crate::rate_limit::RateLimiterCounters;

/// Token id that is never issued; used to exercise the revocation read path.
const HEALTH_CHECK_JTI: &str = "health-check";

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub components: Vec<HealthCheck>,
    pub rate_limit: RateLimitHealth,
    pub cache: CacheHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitHealth {
    pub enabled: bool,
    pub backend: &'static str,
    pub degraded: bool,
    pub limit: u64,
    pub window_secs: u64,
    pub local_identities: usize,
    pub counters: RateLimiterCounters,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub enabled: bool,
    pub backend: &'static str,
    pub stats: CacheStats,
}

// ============================================================================
// CHECKS
// ============================================================================

fn check_rate_limiter(state: &GatewayState) -> HealthCheck {
    let limiter = &state.rate_limiter;
    let check = if limiter.is_degraded() {
        HealthCheck::degraded("rate_limiter", "Primary store unavailable, using local fallback")
    } else {
        HealthCheck::healthy("rate_limiter")
    };
    check
        .with_metadata("backend", json!(limiter.active_backend()))
        .with_metadata("fallbacks", json!(limiter.counters().fallbacks))
}

async fn check_cache(state: &GatewayState) -> HealthCheck {
    if !state.cache.is_enabled() {
        return HealthCheck::healthy("response_cache").with_metadata("enabled", json!(false));
    }
    let check = match state.cache.ping().await {
        Ok(()) => HealthCheck::healthy("response_cache"),
        // Cache misses are served by the handler, so an outage only degrades.
        Err(e) => HealthCheck::degraded("response_cache", e.to_string()),
    };
    check.with_metadata("backend", json!(state.cache.backend_name()))
}

async fn check_revocations(state: &GatewayState) -> HealthCheck {
    match state.revocations.is_revoked(HEALTH_CHECK_JTI).await {
        Ok(_) => HealthCheck::healthy("revocation_list"),
        Err(e) => HealthCheck::unhealthy("revocation_list", e.to_string()),
    }
}

async fn check_credentials(state: &GatewayState) -> HealthCheck {
    if !state.config.verify_credentials {
        return HealthCheck::healthy("credential_store").with_metadata("verified", json!(false));
    }
    match state.credentials.find_by_hash("").await {
        Ok(_) => HealthCheck::healthy("credential_store"),
        Err(e) => HealthCheck::unhealthy("credential_store", e.to_string()),
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let components = vec![
        check_rate_limiter(&state),
        check_cache(&state).await,
        check_revocations(&state).await,
        check_credentials(&state).await,
    ];
    let status = components
        .iter()
        .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

    let limiter = &state.rate_limiter;
    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_secs(),
        components,
        rate_limit: RateLimitHealth {
            enabled: limiter.is_enabled(),
            backend: limiter.active_backend(),
            degraded: limiter.is_degraded(),
            limit: limiter.config().limit,
            window_secs: limiter.config().window.as_secs(),
            local_identities: limiter.local_identities(),
            counters: limiter.counters(),
        },
        cache: CacheHealth {
            enabled: state.cache.is_enabled(),
            backend: state.cache.backend_name(),
            stats: state.cache.stats(),
        },
    };

    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response))
}

pub fn create_router() -> axum::Router<GatewayState> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::config::{GatewayConfig, RateLimitConfig};
    use axum::body::Body;
    use std::sync::Arc;
    use tollgate_test_utils::fixtures::{manual_clock, TEST_SECRET};
    use tollgate_test_utils::UnavailableStore;
    use tower::ServiceExt;

    async fn get_health(state: GatewayState) -> Result<(StatusCode, serde_json::Value), String> {
        let app = create_router().with_state(state);
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        let response = app
            .oneshot(request)
            .await
            .map_err(|e| format!("Request failed: {:?}", e))?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let body = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
        Ok((status, body))
    }

    #[tokio::test]
    async fn test_all_healthy_on_memory_backends() -> Result<(), String> {
        let state = GatewayState::builder(
            GatewayConfig::default(),
            &AuthConfig::new(TEST_SECRET, manual_clock()),
        )
        .build()
        .map_err(|e| e.to_string())?;

        let (status, body) = get_health(state).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["rate_limit"]["backend"], "memory");
        assert_eq!(body["cache"]["stats"]["hits"], 0);
        assert_eq!(body["components"].as_array().map(Vec::len), Some(4));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_outages_are_reported() -> Result<(), String> {
        let state = GatewayState::builder(
            GatewayConfig::default(),
            &AuthConfig::new(TEST_SECRET, manual_clock()),
        )
        .cache(Default::default(), Some(Arc::new(UnavailableStore)))
        .build()
        .map_err(|e| e.to_string())?;

        let (status, body) = get_health(state).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");

        let state = GatewayState::builder(
            GatewayConfig::default(),
            &AuthConfig::new(TEST_SECRET, manual_clock()),
        )
        .revocations(Arc::new(UnavailableStore))
        .build()
        .map_err(|e| e.to_string())?;

        let (status, body) = get_health(state).await?;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        Ok(())
    }

    #[tokio::test]
    async fn test_reports_degraded_rate_limiter() -> Result<(), String> {
        let state = GatewayState::builder(
            GatewayConfig::default(),
            &AuthConfig::new(TEST_SECRET, manual_clock()),
        )
        .rate_limit(RateLimitConfig::default(), Some(Arc::new(UnavailableStore)))
        .build()
        .map_err(|e| e.to_string())?;
        state.rate_limiter.check("ip:1.2.3.4").await;

        let (_, body) = get_health(state).await?;
        assert_eq!(body["rate_limit"]["degraded"], true);
        assert_eq!(body["rate_limit"]["backend"], "memory");
        assert_eq!(body["rate_limit"]["counters"]["fallbacks"], 1);
        Ok(())
    }
}
