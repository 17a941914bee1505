//! Error Types for Tollgate API
//!
//! This module defines error handling for the HTTP layer:
//! - ErrorCode enum for machine-readable failure codes
//! - ApiError struct for structured error responses
//! - IntoResponse implementation emitting the `{"error": {...}}` envelope
//!
//! Rate-limit rejections use their own body shape, see
//! [`crate::middleware::RateLimitRejection`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tollgate_core::{ConfigError, GateError, StoreError};

use crate::auth::TokenError;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each code maps to one HTTP status and is serialized in
/// SCREAMING_SNAKE_CASE inside the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401, 403)
    // ========================================================================
    /// No `Authorization: Bearer` header on a protected path
    MissingAuthHeader,

    /// Token failed signature, expiry, type or shape checks
    InvalidToken,

    /// Authentication could not be completed (revoked token, store failure)
    AuthError,

    /// Authenticated but the tier is too low
    Forbidden,

    // ========================================================================
    // Client Errors (400, 404, 409, 429)
    // ========================================================================
    InvalidInput,

    MissingField,

    EntityNotFound,

    EntityAlreadyExists,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    InternalError,

    /// Token signing failed; the secret is misconfigured
    EncodingError,

    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MissingAuthHeader | ErrorCode::InvalidToken | ErrorCode::AuthError => {
                StatusCode::UNAUTHORIZED
            }

            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::InvalidInput | ErrorCode::MissingField => StatusCode::BAD_REQUEST,

            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::EntityAlreadyExists => StatusCode::CONFLICT,

            ErrorCode::InternalError | ErrorCode::EncodingError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::MissingAuthHeader => "Missing or invalid authorization header",
            ErrorCode::InvalidToken => "Invalid or expired token",
            ErrorCode::AuthError => "Authentication failed",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::EntityAlreadyExists => "Entity already exists",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::EncodingError => "Failed to encode token",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn missing_auth_header() -> Self {
        Self::from_code(ErrorCode::MissingAuthHeader)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthError, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn entity_already_exists(entity_type: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityAlreadyExists,
            format!("{} already exists: {}", entity_type, reason),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EncodingError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Wire shape: `{"error": {"code", "message", "status_code"}}`.
#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: ErrorCode,
    message: &'a str,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: &self.message,
                status_code: status.as_u16(),
                details: self.details.as_ref(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => ApiError::entity_not_found(entity, id),
            StoreError::Conflict { entity, reason } => {
                ApiError::entity_already_exists(entity, reason)
            }
            StoreError::Unavailable { reason } => {
                tracing::error!(reason = %reason, "Store unavailable");
                ApiError::service_unavailable("Backing store unavailable")
            }
            StoreError::Serialization { reason } => {
                tracing::error!(reason = %reason, "Store serialization error");
                ApiError::internal_error("Stored data could not be decoded")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid(reason) => ApiError::invalid_token(reason),
            TokenError::Encoding(reason) => {
                tracing::error!(reason = %reason, "Token signing failed");
                ApiError::encoding_error("Failed to encode token")
            }
            TokenError::Clock(_) => {
                ApiError::internal_error("Server time configuration error - please contact support")
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::invalid_input(err.to_string())
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Store(e) => e.into(),
            GateError::Config(e) => e.into(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::MissingAuthHeader.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::AuthError.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::EncodingError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::ServiceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_code_serializes_screaming_snake() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_string(&ErrorCode::MissingAuthHeader)?,
            "\"MISSING_AUTH_HEADER\""
        );
        assert_eq!(serde_json::to_string(&ErrorCode::AuthError)?, "\"AUTH_ERROR\"");
        Ok(())
    }

    #[tokio::test]
    async fn test_envelope_shape() -> Result<(), String> {
        let response = ApiError::invalid_token("Invalid or expired token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let json: serde_json::Value = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
        assert_eq!(json["error"]["code"], "INVALID_TOKEN");
        assert_eq!(json["error"]["message"], "Invalid or expired token");
        assert_eq!(json["error"]["status_code"], 401);
        assert!(json["error"].get("details").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_details_are_rendered() -> Result<(), String> {
        let response = ApiError::invalid_input("out of range")
            .with_details(serde_json::json!({"field": "expires_in_days"}))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let json: serde_json::Value = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
        assert_eq!(json["error"]["details"]["field"], "expires_in_days");
        Ok(())
    }

    #[test]
    fn test_store_error_conversion() {
        let id = Uuid::now_v7();
        let err: ApiError = StoreError::NotFound {
            entity: "credential",
            id,
        }
        .into();
        assert_eq!(err.code, ErrorCode::EntityNotFound);
        assert!(err.message.contains(&id.to_string()));

        let err: ApiError = StoreError::unavailable("down").into();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
        assert!(!err.message.contains("down"));
    }

    #[test]
    fn test_token_error_conversion() {
        let err: ApiError = TokenError::Invalid("Token has expired".to_string()).into();
        assert_eq!(err.code, ErrorCode::InvalidToken);
        let err: ApiError = TokenError::Encoding("bad key".to_string()).into();
        assert_eq!(err.code, ErrorCode::EncodingError);
    }
}
