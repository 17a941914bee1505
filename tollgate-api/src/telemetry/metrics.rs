//! Prometheus Metrics Definitions
//!
//! Each [`GatewayMetrics`] owns its own registry, so tests and multiple
//! gateways in one process never collide on metric names.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use regex::Regex;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::GatewayState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

static UUID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}").ok()
});

static NUMERIC_ID_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/\d+(/|$)").ok());

/// Replace UUIDs and numeric ids with `{id}` to keep label cardinality bounded.
pub fn normalize_path(path: &str) -> String {
    let mut result = path.to_string();
    if let Some(pattern) = UUID_PATTERN.as_ref() {
        result = pattern.replace_all(&result, "{id}").into_owned();
    }
    if let Some(pattern) = NUMERIC_ID_PATTERN.as_ref() {
        result = pattern.replace_all(&result, "/{id}$1").into_owned();
    }
    result
}

fn register<C>(registry: &Registry, collector: C, name: &str) -> ApiResult<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| ApiError::internal_error(format!("Failed to register {}: {}", name, e)))?;
    Ok(collector)
}

/// Container for all gateway metrics.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Rate-limit decisions - labels: outcome (allowed/rejected)
    pub rate_limit_decisions_total: CounterVec,

    /// Primary-store failures answered locally - labels: operation
    pub rate_limit_fallbacks_total: CounterVec,

    /// Cache lookups and writes - labels: category, outcome
    pub cache_operations_total: CounterVec,

    /// Rejected authentications - labels: code
    pub auth_failures_total: CounterVec,
}

impl GatewayMetrics {
    /// Create a registry and register every metric in it.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new();

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(
                prometheus::process_collector::ProcessCollector::for_self(),
            ))
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to register process_collector: {}", e))
            })?;

        let http_requests_total = register(
            &registry,
            CounterVec::new(
                Opts::new("tollgate_http_requests_total", "Total number of HTTP requests"),
                &["method", "path", "status"],
            )
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
            "http_requests_total",
        )?;

        let http_request_duration_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "tollgate_http_request_duration_seconds",
                    "HTTP request duration in seconds",
                )
                .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
                &["method", "path"],
            )
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
            "http_request_duration_seconds",
        )?;

        let rate_limit_decisions_total = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "tollgate_rate_limit_decisions_total",
                    "Rate-limit admission decisions",
                ),
                &["outcome"],
            )
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
            "rate_limit_decisions_total",
        )?;

        let rate_limit_fallbacks_total = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "tollgate_rate_limit_fallbacks_total",
                    "Rate-limit operations answered by the local store after a primary failure",
                ),
                &["operation"],
            )
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
            "rate_limit_fallbacks_total",
        )?;

        let cache_operations_total = register(
            &registry,
            CounterVec::new(
                Opts::new("tollgate_cache_operations_total", "Response cache operations"),
                &["category", "outcome"],
            )
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
            "cache_operations_total",
        )?;

        let auth_failures_total = register(
            &registry,
            CounterVec::new(
                Opts::new("tollgate_auth_failures_total", "Rejected authentications"),
                &["code"],
            )
            .map_err(|e| ApiError::internal_error(e.to_string()))?,
            "auth_failures_total",
        )?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            rate_limit_decisions_total,
            rate_limit_fallbacks_total,
            cache_operations_total,
            auth_failures_total,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_rate_limit(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "rejected" };
        self.rate_limit_decisions_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_fallback(&self, operation: &str) {
        self.rate_limit_fallbacks_total
            .with_label_values(&[operation])
            .inc();
    }

    /// `outcome` is one of hit, miss, set, error.
    pub fn record_cache(&self, category: &str, outcome: &str) {
        self.cache_operations_total
            .with_label_values(&[category, outcome])
            .inc();
    }

    pub fn record_auth_failure(&self, code: &str) {
        self.auth_failures_total.with_label_values(&[code]).inc();
    }

    /// Encode this registry in the Prometheus text format.
    pub fn encode(&self) -> ApiResult<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

/// Handler for GET /metrics.
pub async fn metrics_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message.into_bytes(),
            )
        }
    }
}
