//! Tollgate Gateway Entry Point
//!
//! Bootstraps configuration, connects the shared store, and serves the
//! admission pipeline over Axum.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::sync::watch;
use tollgate_storage::{
    CredentialStore, KeyValueStore, RedisStore, RevocationList, SlidingWindowStore,
};

use tollgate_api::jobs::{maintenance_task, MaintenanceConfig};
use tollgate_api::routes::{is_production_environment, validate_gateway_config_for_production};
use tollgate_api::telemetry::{init_tracing, TelemetryConfig};
use tollgate_api::{
    build_router, seed_bootstrap_credential, ApiError, ApiResult, AuthConfig, BootstrapConfig,
    CacheConfig, GatewayConfig, GatewayState, RateLimitConfig, StoreConfig,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracing(&telemetry_config)?;

    let auth_config = AuthConfig::from_env();
    auth_config.validate_for_production()?;

    let gateway_config = GatewayConfig::from_env();
    if is_production_environment() {
        validate_gateway_config_for_production(&gateway_config)?;
    }

    let store_config = StoreConfig::from_env();
    let redis = connect_store(&store_config).await?;

    let mut builder = GatewayState::builder(gateway_config, &auth_config);
    let (window_store, cache_store) = match redis {
        Some(store) => {
            // Keys and logouts must be visible to every replica.
            builder = builder
                .credentials(Arc::clone(&store) as Arc<dyn CredentialStore>)
                .revocations(Arc::clone(&store) as Arc<dyn RevocationList>);
            (
                Some(Arc::clone(&store) as Arc<dyn SlidingWindowStore>),
                Some(store as Arc<dyn KeyValueStore>),
            )
        }
        None => {
            tracing::warn!("Credentials and revocations are local to this process");
            (None, None)
        }
    };

    let state = builder
        .rate_limit(RateLimitConfig::from_env(), window_store)
        .cache(CacheConfig::from_env(), cache_store)
        .build()?;

    seed_bootstrap_credential(state.credentials.as_ref(), &BootstrapConfig::from_env()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = tokio::spawn(maintenance_task(
        Arc::clone(&state.credentials),
        Arc::clone(&state.revocations),
        MaintenanceConfig::from_env(),
        shutdown_rx,
    ));

    let handlers = Router::new().route("/", get(service_info));
    let app = build_router(state, handlers);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Tollgate gateway");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    // Client IPs fall back to the socket address when no proxy header is set.
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = maintenance.await {
        tracing::warn!(error = %e, "Maintenance task did not stop cleanly");
    }

    Ok(())
}

/// Redis when configured and reachable. An unreachable Redis is fatal only
/// when `TOLLGATE_REDIS_REQUIRED` is set; otherwise the gateway runs on
/// in-process stores.
async fn connect_store(config: &StoreConfig) -> ApiResult<Option<Arc<RedisStore>>> {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("No Redis URL configured, using in-process stores");
        return Ok(None);
    };

    match RedisStore::connect(url).await {
        Ok(store) => {
            tracing::info!(namespace = %config.namespace, "Connected to Redis");
            Ok(Some(Arc::new(
                store
                    .with_namespace(config.namespace.clone())
                    .with_op_timeout(config.op_timeout),
            )))
        }
        Err(e) if config.redis_required => Err(ApiError::service_unavailable(format!(
            "Redis is required but unreachable: {}",
            e
        ))),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unreachable, falling back to in-process stores");
            Ok(None)
        }
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "tollgate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("TOLLGATE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("TOLLGATE_API_PORT").ok())
        .unwrap_or_else(|| "8000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
