//! Bearer authentication and tier gating.
//!
//! The auth stage verifies the access token, consults the revocation list,
//! optionally confirms the token's key id against the credential store, and
//! binds the resulting [`Principal`] into request extensions. Any store error
//! on this path rejects the request.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tollgate_core::{Credential, Principal, Tier, TokenType};

use super::{bearer_token, bypasses_admission};
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::GatewayState;

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Axum middleware for bearer authentication.
///
/// Public paths and `OPTIONS` preflights pass through untouched. Otherwise:
/// 1. `Authorization: Bearer <token>` must be present (`MISSING_AUTH_HEADER`)
/// 2. The token must verify as an access token (`INVALID_TOKEN`)
/// 3. Its `jti` must not be revoked (`INVALID_TOKEN`, or `AUTH_ERROR` if the
///    list cannot be read)
/// 4. With credential verification on, its key id must match a usable
///    credential (`INVALID_TOKEN`)
///
/// On success the [`Principal`] is inserted into request extensions and the
/// credential's last-used time is touched in the background.
pub async fn auth_middleware(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    if bypasses_admission(&state.config, &request) {
        return Ok(next.run(request).await);
    }

    let token = bearer_token(request.headers()).map(str::to_string);
    let principal = match token {
        Some(token) => authenticate(&state, &token).await,
        None => Err(ApiError::missing_auth_header()),
    }
    .map_err(|e| {
        state.metrics.record_auth_failure(&e.code.to_string());
        tracing::debug!(
            code = %e.code,
            path = %request.uri().path(),
            message = %e.message,
            "Authentication rejected"
        );
        AuthMiddlewareError(e)
    })?;

    tracing::debug!(
        subject_id = %principal.subject_id,
        tier = %principal.tier,
        "Authenticated request"
    );
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

async fn authenticate(state: &GatewayState, token: &str) -> ApiResult<Principal> {
    let claims = state.codec.verify(token, TokenType::Access)?;
    ensure_not_revoked(state, &claims.jti).await?;

    if state.config.verify_credentials {
        let credential = usable_credential(state, &claims).await?;
        let credentials = Arc::clone(&state.credentials);
        tokio::spawn(async move {
            if let Err(e) = credentials.touch_last_used(credential.id).await {
                tracing::warn!(credential_id = %credential.id, error = %e, "Failed to touch credential");
            }
        });
    }

    Ok(claims.to_principal())
}

/// Reject a revoked `jti`. An unreadable revocation list rejects too.
pub(crate) async fn ensure_not_revoked(state: &GatewayState, jti: &str) -> ApiResult<()> {
    match state.revocations.is_revoked(jti).await {
        Ok(false) => Ok(()),
        Ok(true) => Err(ApiError::invalid_token("Token has been revoked")),
        Err(e) => {
            tracing::error!(error = %e, "Revocation list unavailable, rejecting request");
            Err(ApiError::auth_error("Authentication failed"))
        }
    }
}

/// The active, unexpired credential the token was issued from.
///
/// The credential must belong to the token's subject.
pub(crate) async fn usable_credential(state: &GatewayState, claims: &Claims) -> ApiResult<Credential> {
    let found = state
        .credentials
        .find_by_hash(&claims.key_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Credential store unavailable, rejecting request");
            ApiError::auth_error("Authentication failed")
        })?;

    let now = state.clock().now();
    found
        .filter(|c| c.subject_id == claims.sub && c.is_usable(now))
        .ok_or_else(|| ApiError::invalid_token("API key is inactive or expired"))
}

// ============================================================================
// TIER GUARD
// ============================================================================

/// Route layer rejecting principals below `minimum` with 403.
///
/// ```ignore
/// Router::new()
///     .route("/metrics", get(metrics_handler))
///     .route_layer(from_fn_with_state(Tier::Enterprise, tier_guard))
/// ```
pub async fn tier_guard(
    State(minimum): State<Tier>,
    request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let allowed = request
        .extensions()
        .get::<Principal>()
        .map(|p| p.has_tier(minimum));

    match allowed {
        Some(true) => Ok(next.run(request).await),
        Some(false) => Err(AuthMiddlewareError(ApiError::forbidden(format!(
            "This endpoint requires {} tier or higher",
            minimum
        )))),
        None => Err(AuthMiddlewareError(ApiError::missing_auth_header())),
    }
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Rejection from the auth stage, rendered with the standard error envelope.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Handler argument yielding the bound [`Principal`].
///
/// Only valid behind `auth_middleware`; on a public route it rejects with 500.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "Principal not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = Principal;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
