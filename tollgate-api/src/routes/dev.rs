//! Development Token Endpoint
//!
//! `POST /dev/create-token` mints a credential and token pair for any
//! subject and tier. Only mounted, and only public, when
//! `GatewayConfig::debug` is set.
//!
//! NEVER enable debug in production - this bypasses key issuance entirely!

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tollgate_core::{hash_api_key, Tier};

use crate::auth::{generate_api_key, TokenPair};
use crate::config::DEV_TOKEN_PATH;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::pipeline::GatewayState;

#[derive(Debug, Clone, Deserialize)]
pub struct DevTokenRequest {
    pub subject_id: String,
    #[serde(default)]
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevTokenResponse {
    /// Raw key backing the tokens, usable with `/auth/login`.
    pub api_key: String,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

pub async fn create_dev_token(
    State(state): State<GatewayState>,
    Json(req): Json<DevTokenRequest>,
) -> ApiResult<Json<DevTokenResponse>> {
    // Mounting is already gated; this guards a router assembled by hand.
    if !state.config.debug {
        return Err(ApiError::new(
            ErrorCode::EntityNotFound,
            "Endpoint not available in production",
        ));
    }

    let subject_id = req.subject_id.trim();
    if subject_id.is_empty() {
        return Err(ApiError::missing_field("subject_id"));
    }

    let api_key = generate_api_key();
    let key_hash = hash_api_key(&api_key);
    state
        .credentials
        .create(subject_id, &key_hash, "dev token", req.tier, None)
        .await?;
    let tokens = state.codec.issue(subject_id, req.tier, &key_hash)?;

    tracing::warn!(subject_id = %subject_id, tier = %req.tier, "Issued development token");
    Ok(Json(DevTokenResponse { api_key, tokens }))
}

pub fn create_router() -> Router<GatewayState> {
    Router::new().route(DEV_TOKEN_PATH, post(create_dev_token))
}
