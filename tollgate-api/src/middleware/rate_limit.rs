//! Sliding-window admission per client identity.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tollgate_core::{short_digest, Principal};

use super::{bearer_token, bypasses_admission, client_ip};
use crate::constants::{
    HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING, HEADER_RATELIMIT_RESET,
    HEADER_RETRY_AFTER, IDENTITY_KEY_PREFIX_LEN, IDENTITY_TOKEN_DIGEST_LEN,
};
use crate::pipeline::GatewayState;
use crate::rate_limit::RateLimitDecision;

/// Rate-limit identity for a request.
///
/// Priority: bound principal's key id, then a digest of the bearer token,
/// then the client address, then `ip:unknown`.
pub fn derive_identity(request: &Request) -> String {
    if let Some(principal) = request.extensions().get::<Principal>() {
        let prefix: String = principal.key_id.chars().take(IDENTITY_KEY_PREFIX_LEN).collect();
        return format!("key:{}", prefix);
    }

    if let Some(token) = bearer_token(request.headers()).filter(|t| !t.is_empty()) {
        return format!("token:{}", short_digest(token.as_bytes(), IDENTITY_TOKEN_DIGEST_LEN));
    }

    format!("ip:{}", client_ip(request).unwrap_or_else(|| "unknown".to_string()))
}

/// 429 body. Keeps the flat legacy shape rather than the auth envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitRejection {
    pub error: &'static str,
    pub limit: u64,
    /// Window length in seconds.
    pub window: u64,
    pub retry_after: u64,
}

impl RateLimitRejection {
    pub fn new(limit: u64, window: u64, retry_after: u64) -> Self {
        Self {
            error: "Rate limit exceeded",
            limit,
            window,
            retry_after,
        }
    }
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response();
        response.headers_mut().insert(
            HeaderName::from_static(HEADER_RETRY_AFTER),
            HeaderValue::from(retry_after),
        );
        response
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        HeaderName::from_static(HEADER_RATELIMIT_LIMIT),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RATELIMIT_REMAINING),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RATELIMIT_RESET),
        HeaderValue::from(decision.reset_epoch),
    );
}

/// Rate limiting middleware.
///
/// Runs after auth so a bound principal keys the window by API key. Shares
/// the auth bypass set. `X-RateLimit-*` headers are set on admitted and
/// rejected responses alike.
pub async fn rate_limit_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.rate_limiter.is_enabled() || bypasses_admission(&state.config, &request) {
        return next.run(request).await;
    }

    let identity = derive_identity(&request);
    let decision = state.rate_limiter.check(&identity).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(
            identity = %identity,
            limit = decision.limit,
            retry_after = decision.retry_after,
            "Rate limit exceeded"
        );
        RateLimitRejection::new(
            decision.limit,
            state.rate_limiter.config().window.as_secs(),
            decision.retry_after,
        )
        .into_response()
    };

    apply_headers(response.headers_mut(), &decision);
    response
}
