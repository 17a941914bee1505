//! Auth Routes
//!
//! - `POST /auth/login`: exchange an API key for a token pair (public)
//! - `POST /auth/refresh`: new access token from a refresh token (public)
//! - `POST /auth/logout`: revoke the presented tokens
//! - `POST /auth/validate`: confirm the bearer token and describe its subject
//! - `POST /auth/keys`, `GET /auth/keys`, `DELETE /auth/keys/:id`: key management

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, post},
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_core::{hash_api_key, Credential, EntityId, Tier, Timestamp, TokenType};

use crate::auth::{generate_api_key, TokenPair};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{bearer_token, ensure_not_revoked, usable_credential, AuthExtractor};
use crate::pipeline::GatewayState;

const MAX_KEY_LIFETIME_DAYS: i64 = 3650;
const MAX_KEY_NAME_LEN: usize = 100;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub revoked: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedUser {
    pub user_id: String,
    pub tier: Tier,
    /// Creation time of the API key the session was opened with.
    pub created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user: ValidatedUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

/// Credential as shown to its owner. Never carries the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyResponse {
    pub id: EntityId,
    pub name: String,
    pub tier: Tier,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub last_used_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

impl From<Credential> for ApiKeyResponse {
    fn from(credential: Credential) -> Self {
        Self {
            id: credential.id,
            name: credential.display_name,
            tier: credential.tier,
            is_active: credential.active,
            created_at: credential.created_at,
            last_used_at: credential.last_used_at,
            expires_at: credential.expires_at,
        }
    }
}

/// Returned once at creation; the raw key cannot be recovered later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApiKeyResponse {
    pub api_key: String,
    pub key: ApiKeyResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateKeyResponse {
    pub id: EntityId,
    pub was_active: bool,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Exchange an API key for a token pair.
pub async fn login(
    State(state): State<GatewayState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenPair>> {
    let raw_key = req.api_key.trim();
    if raw_key.is_empty() {
        return Err(ApiError::missing_field("api_key"));
    }

    let now = state.clock().now();
    let credential = state
        .credentials
        .find_by_hash(&hash_api_key(raw_key))
        .await?
        .filter(|c| c.is_usable(now))
        .ok_or_else(|| ApiError::invalid_token("Invalid or expired API key"))?;

    let pair = state
        .codec
        .issue(&credential.subject_id, credential.tier, &credential.key_hash)?;

    let credentials = Arc::clone(&state.credentials);
    let credential_id = credential.id;
    tokio::spawn(async move {
        if let Err(e) = credentials.touch_last_used(credential_id).await {
            tracing::warn!(credential_id = %credential_id, error = %e, "Failed to touch credential");
        }
    });

    tracing::info!(subject_id = %credential.subject_id, tier = %credential.tier, "Issued token pair");
    Ok(Json(pair))
}

/// New access token for a live refresh token. The refresh token is echoed.
pub async fn refresh(
    State(state): State<GatewayState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let claims = state
        .codec
        .verify(&req.refresh_token, TokenType::Refresh)
        .map_err(|e| match e {
            crate::auth::TokenError::Invalid(_) => {
                ApiError::invalid_token("Invalid or expired refresh token")
            }
            other => other.into(),
        })?;
    ensure_not_revoked(&state, &claims.jti).await?;

    if state.config.verify_credentials {
        usable_credential(&state, &claims).await?;
    }

    Ok(Json(state.codec.refresh(&req.refresh_token)?))
}

/// Revoke the presented access token and, if supplied, a refresh token of
/// the same subject.
pub async fn logout(
    State(state): State<GatewayState>,
    AuthExtractor(principal): AuthExtractor,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> ApiResult<Json<LogoutResponse>> {
    let token = bearer_token(&headers).ok_or_else(ApiError::missing_auth_header)?;
    let access = state.codec.verify(token, TokenType::Access)?;
    let now = state.clock().now();

    let mut revoked = vec![state.codec.revocation(&access, now, "logout")];

    if let Some(refresh_token) = body.and_then(|Json(b)| b.refresh_token) {
        let claims = state.codec.verify(&refresh_token, TokenType::Refresh)?;
        if claims.sub != principal.subject_id {
            return Err(ApiError::forbidden("Refresh token belongs to another subject"));
        }
        revoked.push(state.codec.revocation(&claims, now, "logout"));
    }

    let count = revoked.len();
    for record in revoked {
        state.revocations.revoke(record).await?;
    }
    state.cache.invalidate_subject(&principal.subject_id).await;

    tracing::info!(subject_id = %principal.subject_id, revoked = count, "Logged out");
    Ok(Json(LogoutResponse { revoked: count }))
}

/// Echo the authenticated subject. Reaching the handler means the token passed
/// the auth stage.
pub async fn validate(
    State(state): State<GatewayState>,
    AuthExtractor(principal): AuthExtractor,
) -> ApiResult<Json<ValidateResponse>> {
    let created_at = state
        .credentials
        .find_by_hash(&principal.key_id)
        .await?
        .map(|c| c.created_at);

    Ok(Json(ValidateResponse {
        valid: true,
        user: ValidatedUser {
            user_id: principal.subject_id,
            tier: principal.tier,
            created_at,
        },
    }))
}

/// Issue a new API key for the caller at the caller's tier.
pub async fn create_key(
    State(state): State<GatewayState>,
    AuthExtractor(principal): AuthExtractor,
    Json(req): Json<CreateKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::missing_field("name"));
    }
    if name.len() > MAX_KEY_NAME_LEN {
        return Err(ApiError::invalid_input(format!(
            "Key name must be at most {} characters",
            MAX_KEY_NAME_LEN
        )));
    }

    let expires_at = match req.expires_in_days {
        None => None,
        Some(days) if (1..=MAX_KEY_LIFETIME_DAYS).contains(&days) => {
            Some(state.clock().now() + Duration::days(days))
        }
        Some(days) => {
            return Err(ApiError::invalid_input(format!(
                "expires_in_days must be between 1 and {}, got {}",
                MAX_KEY_LIFETIME_DAYS, days
            ))
            .with_details(serde_json::json!({
                "field": "expires_in_days",
                "min": 1,
                "max": MAX_KEY_LIFETIME_DAYS,
            })))
        }
    };

    let raw_key = generate_api_key();
    let credential = state
        .credentials
        .create(
            &principal.subject_id,
            &hash_api_key(&raw_key),
            name,
            principal.tier,
            expires_at,
        )
        .await?;
    state.cache.invalidate_subject(&principal.subject_id).await;

    tracing::info!(
        subject_id = %principal.subject_id,
        credential_id = %credential.id,
        "Created API key"
    );
    Ok((
        StatusCode::CREATED,
        Json(NewApiKeyResponse {
            api_key: raw_key,
            key: credential.into(),
        }),
    ))
}

/// The caller's keys, newest first. Served from the user-data cache when warm.
pub async fn list_keys(
    State(state): State<GatewayState>,
    AuthExtractor(principal): AuthExtractor,
) -> ApiResult<Json<Vec<ApiKeyResponse>>> {
    if let Some(cached) = state
        .cache
        .get_subject::<Vec<ApiKeyResponse>>(&principal.subject_id)
        .await
    {
        return Ok(Json(cached));
    }

    let keys: Vec<ApiKeyResponse> = state
        .credentials
        .list_for_subject(&principal.subject_id)
        .await?
        .into_iter()
        .map(ApiKeyResponse::from)
        .collect();
    state.cache.set_subject(&principal.subject_id, &keys).await;

    Ok(Json(keys))
}

/// Deactivate one of the caller's keys.
pub async fn deactivate_key(
    State(state): State<GatewayState>,
    AuthExtractor(principal): AuthExtractor,
    Path(id): Path<EntityId>,
) -> ApiResult<Json<DeactivateKeyResponse>> {
    let owned = state
        .credentials
        .list_for_subject(&principal.subject_id)
        .await?
        .iter()
        .any(|c| c.id == id);
    if !owned {
        return Err(ApiError::entity_not_found("api_key", id));
    }

    let was_active = state.credentials.deactivate(id).await?;
    state.cache.invalidate_subject(&principal.subject_id).await;

    tracing::info!(subject_id = %principal.subject_id, credential_id = %id, was_active, "Deactivated API key");
    Ok(Json(DeactivateKeyResponse { id, was_active }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/validate", post(validate))
        .route("/auth/keys", post(create_key).get(list_keys))
        .route("/auth/keys/:id", delete(deactivate_key))
}
