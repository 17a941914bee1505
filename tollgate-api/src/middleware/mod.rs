//! Admission Middleware
//!
//! One module per pipeline stage:
//!
//! - `correlation`: correlation id, request span, HTTP metrics
//! - `auth`: bearer verification, revocation and credential checks, tier guard
//! - `rate_limit`: sliding-window admission per client identity
//! - `usage`: accounting for metered endpoints
//!
//! # Middleware Order
//!
//! Layers added later wrap earlier ones, so registration reads inner to outer:
//!
//! ```ignore
//! router
//!     .layer(from_fn_with_state(state.clone(), usage_middleware))
//!     .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
//!     .layer(from_fn_with_state(state.clone(), auth_middleware))
//!     .layer(from_fn_with_state(state.clone(), correlation_middleware))
//! ```

mod auth;
mod correlation;
mod rate_limit;
mod usage;

pub use auth::{auth_middleware, tier_guard, AuthExtractor, AuthMiddlewareError};
pub(crate) use auth::{ensure_not_revoked, usable_credential};
pub use correlation::{correlation_middleware, CorrelationId};
pub use rate_limit::{derive_identity, rate_limit_middleware, RateLimitRejection};
pub use usage::usage_middleware;

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, Method};
use std::net::SocketAddr;

use crate::config::GatewayConfig;

/// Requests that skip auth and rate limiting: CORS preflights and public paths.
pub(crate) fn bypasses_admission(config: &GatewayConfig, request: &Request) -> bool {
    request.method() == Method::OPTIONS || config.is_public(request.uri().path())
}

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub(crate) fn client_ip(request: &Request) -> Option<String> {
    if let Some(first_hop) = header_str(request, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(first_hop.to_string());
    }

    if let Some(real_ip) = header_str(request, "x-real-ip") {
        return Some(real_ip.to_string());
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Bearer token from `Authorization`, if the header uses the Bearer scheme.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri("/translate");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("request should build")
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let req = request(&[
            ("x-forwarded-for", "1.2.3.4, 10.0.0.1"),
            ("x-real-ip", "9.9.9.9"),
        ]);
        assert_eq!(client_ip(&req).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_peer() {
        let req = request(&[("x-real-ip", "9.9.9.9")]);
        assert_eq!(client_ip(&req).as_deref(), Some("9.9.9.9"));

        let mut req = request(&[]);
        assert_eq!(client_ip(&req), None);
        let peer: SocketAddr = ([127, 0, 0, 1], 4000).into();
        req.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(client_ip(&req).as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_bearer_token_requires_scheme() {
        assert_eq!(bearer_token(request(&[("authorization", "Bearer abc")]).headers()), Some("abc"));
        assert_eq!(bearer_token(request(&[("authorization", "Basic abc")]).headers()), None);
        assert_eq!(bearer_token(request(&[]).headers()), None);
    }

    #[test]
    fn test_options_and_public_paths_bypass() {
        let config = GatewayConfig::default();
        let preflight = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/translate")
            .body(Body::empty())
            .expect("request should build");
        assert!(bypasses_admission(&config, &preflight));

        let health = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request should build");
        assert!(bypasses_admission(&config, &health));
        assert!(!bypasses_admission(&config, &request(&[])));
    }
}
