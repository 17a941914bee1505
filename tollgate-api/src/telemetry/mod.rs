//! Tollgate Telemetry - Observability Infrastructure
//!
//! Structured logging via `tracing-subscriber` and per-gateway Prometheus
//! metrics. The request span itself is opened by the correlation middleware.

pub mod metrics;
pub mod tracer;

pub use metrics::{metrics_handler, normalize_path, GatewayMetrics};
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
