//! Correlation and request monitoring.

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::constants::{
    CORRELATION_ID_LEN, HEADER_CORRELATION_ID, HEADER_RESPONSE_TIME, SLOW_REQUEST_THRESHOLD_MS,
};
use crate::pipeline::GatewayState;
use crate::telemetry::normalize_path;

const MAX_INBOUND_ID_LEN: usize = 64;

/// Correlation id for the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(CORRELATION_ID_LEN);
        Self(id)
    }

    /// Caller-supplied ids are honoured when they are short and header-safe.
    fn from_request(request: &Request) -> Option<Self> {
        request
            .headers()
            .get(HEADER_CORRELATION_ID)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|id| {
                !id.is_empty()
                    && id.len() <= MAX_INBOUND_ID_LEN
                    && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            })
            .map(|id| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outermost admission stage.
///
/// Tags the request with a correlation id, runs the rest of the chain inside
/// an `http_request` span, records Prometheus request metrics and echoes
/// `X-Correlation-ID` / `X-Response-Time` on the response.
pub async fn correlation_middleware(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let correlation_id =
        CorrelationId::from_request(&request).unwrap_or_else(CorrelationId::generate);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = normalize_path(&path);

    request.extensions_mut().insert(correlation_id.clone());

    let span = info_span!(
        "http_request",
        correlation_id = %correlation_id.as_str(),
        http.method = %method,
        http.route = %route,
    );
    let mut response = next.run(request).instrument(span).await;

    let elapsed = start.elapsed();
    let status = response.status();
    state
        .metrics
        .record_http_request(method.as_str(), &route, status.as_u16(), elapsed.as_secs_f64());

    let elapsed_ms = elapsed.as_millis();
    if elapsed_ms > SLOW_REQUEST_THRESHOLD_MS {
        tracing::warn!(
            correlation_id = %correlation_id.as_str(),
            method = %method,
            path = %path,
            duration_ms = elapsed_ms,
            "Slow request"
        );
    }
    tracing::info!(
        correlation_id = %correlation_id.as_str(),
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "Request completed"
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        headers.insert(HeaderName::from_static(HEADER_CORRELATION_ID), value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed_ms)) {
        headers.insert(HeaderName::from_static(HEADER_RESPONSE_TIME), value);
    }

    response
}
