//! Gateway State and Router Composition
//!
//! [`GatewayState`] holds every shared component behind an `Arc` and is
//! built once at the composition root. [`build_router`] wires the admission
//! stages around the caller's business routes in a fixed order:
//!
//! ```text
//! compression -> cors -> correlation -> auth -> rate limit -> usage -> handler
//! ```

use axum::{middleware::from_fn_with_state, routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tollgate_core::{Clock, Tier};
use tollgate_storage::{
    CredentialStore, InMemoryCredentialStore, InMemoryRevocationList, KeyValueStore, MemoryStore,
    RevocationList, SlidingWindowStore, TracingUsageSink, UsageSink,
};
use tower_http::compression::CompressionLayer;

use crate::auth::{AuthConfig, TokenCodec};
use crate::cache::ResponseCache;
use crate::config::{CacheConfig, GatewayConfig, RateLimitConfig};
use crate::error::ApiResult;
use crate::middleware::{
    auth_middleware, correlation_middleware, rate_limit_middleware, tier_guard, usage_middleware,
};
use crate::rate_limit::RateLimiter;
use crate::routes;
use crate::telemetry::{metrics_handler, GatewayMetrics};

// ============================================================================
// STATE
// ============================================================================

/// Shared components for every admission stage and gateway route.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub codec: Arc<TokenCodec>,
    pub credentials: Arc<dyn CredentialStore>,
    pub revocations: Arc<dyn RevocationList>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub usage: Arc<dyn UsageSink>,
    pub metrics: Arc<GatewayMetrics>,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn builder(config: GatewayConfig, auth: &AuthConfig) -> GatewayStateBuilder {
        GatewayStateBuilder::new(config, auth)
    }

    /// Clock shared by the token codec and every store built by the builder.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.codec.clock()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Assembles a [`GatewayState`], filling unset components with in-process
/// defaults that share the auth clock.
pub struct GatewayStateBuilder {
    config: GatewayConfig,
    codec: TokenCodec,
    credentials: Option<Arc<dyn CredentialStore>>,
    revocations: Option<Arc<dyn RevocationList>>,
    rate_limit: RateLimitConfig,
    window_store: Option<Arc<dyn SlidingWindowStore>>,
    cache: CacheConfig,
    cache_store: Option<Arc<dyn KeyValueStore>>,
    usage: Option<Arc<dyn UsageSink>>,
}

impl GatewayStateBuilder {
    fn new(config: GatewayConfig, auth: &AuthConfig) -> Self {
        Self {
            config,
            codec: TokenCodec::new(auth),
            credentials: None,
            revocations: None,
            rate_limit: RateLimitConfig::default(),
            window_store: None,
            cache: CacheConfig::default(),
            cache_store: None,
            usage: None,
        }
    }

    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn revocations(mut self, list: Arc<dyn RevocationList>) -> Self {
        self.revocations = Some(list);
        self
    }

    /// Rate-limit settings. `primary` is the distributed window store; the
    /// limiter always keeps its own local fallback.
    pub fn rate_limit(
        mut self,
        config: RateLimitConfig,
        primary: Option<Arc<dyn SlidingWindowStore>>,
    ) -> Self {
        self.rate_limit = config;
        self.window_store = primary;
        self
    }

    pub fn cache(mut self, config: CacheConfig, store: Option<Arc<dyn KeyValueStore>>) -> Self {
        self.cache = config;
        self.cache_store = store;
        self
    }

    pub fn usage(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(sink);
        self
    }

    pub fn build(self) -> ApiResult<GatewayState> {
        let clock = Arc::clone(self.codec.clock());
        let metrics = Arc::new(GatewayMetrics::new()?);

        let credentials = self.credentials.unwrap_or_else(|| {
            Arc::new(InMemoryCredentialStore::with_clock(Arc::clone(&clock)))
        });
        let revocations = self.revocations.unwrap_or_else(|| {
            Arc::new(InMemoryRevocationList::with_clock(Arc::clone(&clock)))
        });
        let rate_limiter =
            RateLimiter::with_clock(self.rate_limit, self.window_store, Arc::clone(&clock))
                .with_metrics(Arc::clone(&metrics));
        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(MemoryStore::with_clock(Arc::clone(&clock))));
        let cache = ResponseCache::new(cache_store, &self.cache)
            .with_clock(Arc::clone(&clock))
            .with_metrics(Arc::clone(&metrics));
        let usage = self.usage.unwrap_or_else(|| Arc::new(TracingUsageSink));

        tracing::info!(
            rate_limit_backend = rate_limiter.active_backend(),
            cache_backend = cache.backend_name(),
            verify_credentials = self.config.verify_credentials,
            debug = self.config.debug,
            "Gateway state assembled"
        );

        Ok(GatewayState {
            config: Arc::new(self.config),
            codec: Arc::new(self.codec),
            credentials,
            revocations,
            rate_limiter: Arc::new(rate_limiter),
            cache: Arc::new(cache),
            usage,
            metrics,
            start_time: Instant::now(),
        })
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Wrap `handlers` (the business routes) and the gateway's own routes in the
/// admission pipeline.
///
/// Layers added later run earlier, so the stack below reads inner to outer.
pub fn build_router(state: GatewayState, handlers: Router<GatewayState>) -> Router {
    let metrics_route = Router::new()
        .route("/metrics", get(metrics_handler))
        .route_layer(from_fn_with_state(Tier::Enterprise, tier_guard));

    let mut router = Router::new()
        .merge(routes::auth::create_router())
        .merge(routes::health::create_router())
        .merge(metrics_route)
        .merge(handlers);

    if state.config.debug {
        router = router.merge(routes::dev::create_router());
    }

    let cors = routes::build_cors_layer(&state.config);

    router
        .layer(from_fn_with_state(state.clone(), usage_middleware))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(from_fn_with_state(state.clone(), correlation_middleware))
        .layer(cors)
        .layer(CompressionLayer::new())
        .with_state(state)
}
