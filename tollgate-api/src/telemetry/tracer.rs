//! Tracing Subscriber Initialization

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "tollgate_api=debug,tower_http=debug,info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        })
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// production, staging, development
    pub environment: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tollgate-api".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `TOLLGATE_SERVICE_NAME` (default: "tollgate-api")
    /// - `TOLLGATE_ENVIRONMENT` (default: "development")
    /// - `TOLLGATE_LOG_FORMAT`: "json" or "compact" (default: compact)
    /// - `TOLLGATE_METRICS_ENABLED` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("TOLLGATE_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: defaults.service_version,
            environment: std::env::var("TOLLGATE_ENVIRONMENT").unwrap_or(defaults.environment),
            log_format: std::env::var("TOLLGATE_LOG_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            metrics_enabled: std::env::var("TOLLGATE_METRICS_ENABLED")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(true),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. `RUST_LOG` overrides the default filter.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        environment = %config.environment,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}
