//! Usage accounting for metered endpoints.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tollgate_core::{Principal, UsageRecord};

use super::{client_ip, CorrelationId};
use crate::pipeline::GatewayState;

/// Records a [`UsageRecord`] for authenticated calls to accounted endpoints.
///
/// The sink write is spawned after the response is produced; sink errors are
/// logged and never reach the caller.
pub async fn usage_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.config.is_usage_endpoint(&path) {
        return next.run(request).await;
    }
    let Some(subject_id) = request
        .extensions()
        .get::<Principal>()
        .map(|p| p.subject_id.clone())
    else {
        return next.run(request).await;
    };

    let method = request.method().to_string();
    let ip = client_ip(&request);
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.as_str().to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let status_code = response.status().as_u16();

    let record = UsageRecord {
        subject_id,
        endpoint: path,
        method,
        status_code,
        response_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        client_ip: ip,
        user_agent,
        error_type: UsageRecord::classify_status(status_code),
        correlation_id,
        recorded_at: state.clock().now(),
    };

    let sink = Arc::clone(&state.usage);
    tokio::spawn(async move {
        let subject_id = record.subject_id.clone();
        if let Err(e) = sink.record(record).await {
            tracing::error!(subject_id = %subject_id, error = %e, "Failed to record usage");
        }
    });

    response
}
