//! End-to-end tests for the assembled admission pipeline.
//!
//! Every request goes through `build_router`, so these exercise the layer
//! order as deployed: correlation, auth, rate limiting, usage, handler.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tollgate_api::auth::TokenPair;
use tollgate_api::{build_router, AuthConfig, AuthExtractor, GatewayConfig, GatewayState, RateLimitConfig};
use tollgate_core::{hash_api_key, ManualClock, Principal, Tier};
use tollgate_storage::{CredentialStore, InMemoryCredentialStore, InMemoryUsageLog};
use tollgate_test_utils::fixtures::{manual_clock, seeded_credentials, EPOCH_2024, TEST_SECRET};
use tower::ServiceExt;

const RAW_KEY: &str = "tg_pipeline_key";

// ============================================================================
// HARNESS
// ============================================================================

struct Gateway {
    app: Router,
    state: GatewayState,
    credentials: Arc<InMemoryCredentialStore>,
    usage: Arc<InMemoryUsageLog>,
    clock: Arc<ManualClock>,
}

fn business_routes() -> Router<GatewayState> {
    Router::new()
        .route(
            "/whoami",
            get(|AuthExtractor(principal): AuthExtractor| async move { Json(principal) }),
        )
        .route("/translate", post(|| async { Json(json!({"translated": true})) }))
}

async fn gateway_with(config: GatewayConfig, rate_limit: RateLimitConfig) -> Result<Gateway, String> {
    let clock = manual_clock();
    let (credentials, _) = seeded_credentials(clock.clone(), "u1", Tier::Pro, RAW_KEY)
        .await
        .map_err(|e| e.to_string())?;
    let usage = Arc::new(InMemoryUsageLog::new());

    let state = GatewayState::builder(config, &AuthConfig::new(TEST_SECRET, clock.clone()))
        .credentials(credentials.clone())
        .rate_limit(rate_limit, None)
        .usage(usage.clone())
        .build()
        .map_err(|e| e.to_string())?;

    Ok(Gateway {
        app: build_router(state.clone(), business_routes()),
        state,
        credentials,
        usage,
        clock,
    })
}

async fn gateway() -> Result<Gateway, String> {
    gateway_with(GatewayConfig::default(), RateLimitConfig::default()).await
}

fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Result<Request<Body>, String> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).map_err(|e| e.to_string())
}

async fn send(app: &Router, request: Request<Body>) -> Result<Response, String> {
    app.clone()
        .oneshot(request)
        .await
        .map_err(|e| format!("Request failed: {:?}", e))
}

async fn json_body(response: Response) -> Result<Value, String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn login(gw: &Gateway) -> Result<TokenPair, String> {
    let response = send(
        &gw.app,
        request("POST", "/auth/login", None, Some(json!({"api_key": RAW_KEY})))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_value(json_body(response).await?).map_err(|e| e.to_string())
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[tokio::test]
async fn test_missing_garbage_and_valid_tokens() -> Result<(), String> {
    let gw = gateway().await?;

    let response = send(&gw.app, request("GET", "/whoami", None, None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["error"]["code"], "MISSING_AUTH_HEADER");

    let response = send(&gw.app, request("GET", "/whoami", Some("garbage"), None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await?;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    assert_eq!(body["error"]["status_code"], 401);

    let pair = gw
        .state
        .codec
        .issue("u1", Tier::Pro, &hash_api_key(RAW_KEY))
        .map_err(|e| e.to_string())?;
    let response = send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let principal: Principal =
        serde_json::from_value(json_body(response).await?).map_err(|e| e.to_string())?;
    assert_eq!(principal.subject_id, "u1");
    assert_eq!(principal.tier, Tier::Pro);
    Ok(())
}

#[tokio::test]
async fn test_deactivated_credential_is_rejected() -> Result<(), String> {
    let gw = gateway().await?;
    let pair = login(&gw).await?;

    let credential = gw
        .credentials
        .list_for_subject("u1")
        .await
        .map_err(|e| e.to_string())?
        .into_iter()
        .next()
        .ok_or("seeded credential missing")?;
    gw.credentials
        .deactivate(credential.id)
        .await
        .map_err(|e| e.to_string())?;

    let response = send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["error"]["code"], "INVALID_TOKEN");
    Ok(())
}

#[tokio::test]
async fn test_expired_access_token_is_rejected() -> Result<(), String> {
    let gw = gateway().await?;
    let pair = login(&gw).await?;

    gw.clock.advance(Duration::from_secs(31 * 60));
    let response = send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

// ============================================================================
// RATE LIMITING
// ============================================================================

#[tokio::test]
async fn test_rate_limit_countdown_then_429() -> Result<(), String> {
    let gw = gateway_with(
        GatewayConfig::default(),
        RateLimitConfig::with_limit(5, Duration::from_secs(60)),
    )
    .await?;
    let pair = gw
        .state
        .codec
        .issue("u1", Tier::Pro, &hash_api_key(RAW_KEY))
        .map_err(|e| e.to_string())?;

    for expected in (0..5).rev() {
        let response =
            send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-limit").as_deref(), Some("5"));
        assert_eq!(
            header(&response, "x-ratelimit-remaining"),
            Some(expected.to_string())
        );
        gw.clock.advance(Duration::from_millis(100));
    }

    let response = send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-ratelimit-remaining").as_deref(), Some("0"));
    // 500ms have passed since the first admitted request.
    assert_eq!(header(&response, "retry-after").as_deref(), Some("60"));
    let body = json_body(response).await?;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["limit"], 5);
    assert_eq!(body["window"], 60);
    assert_eq!(body["retry_after"], 60);

    // Public paths are never limited.
    let response = send(&gw.app, request("GET", "/health", None, None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-ratelimit-limit").is_none());

    gw.clock.advance(Duration::from_secs(60));
    let response = send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

// ============================================================================
// AUTH ROUTES
// ============================================================================

#[tokio::test]
async fn test_login_refresh_and_logout() -> Result<(), String> {
    let gw = gateway().await?;

    let response = send(
        &gw.app,
        request("POST", "/auth/login", None, Some(json!({"api_key": "tg_wrong"})))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let pair = login(&gw).await?;
    assert_eq!(pair.token_type, "bearer");
    assert_eq!(pair.expires_in, 1800);

    gw.clock.advance(Duration::from_secs(10));
    let response = send(
        &gw.app,
        request(
            "POST",
            "/auth/refresh",
            None,
            Some(json!({"refresh_token": pair.refresh_token})),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed: TokenPair =
        serde_json::from_value(json_body(response).await?).map_err(|e| e.to_string())?;
    assert_eq!(refreshed.refresh_token, pair.refresh_token);
    assert_ne!(refreshed.access_token, pair.access_token);

    // An access token is not accepted where a refresh token is expected.
    let response = send(
        &gw.app,
        request(
            "POST",
            "/auth/refresh",
            None,
            Some(json!({"refresh_token": pair.access_token})),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &gw.app,
        request(
            "POST",
            "/auth/logout",
            Some(&refreshed.access_token),
            Some(json!({"refresh_token": pair.refresh_token})),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["revoked"], 2);

    let response = send(
        &gw.app,
        request("GET", "/whoami", Some(&refreshed.access_token), None)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &gw.app,
        request(
            "POST",
            "/auth/refresh",
            None,
            Some(json!({"refresh_token": pair.refresh_token})),
        )?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Tokens issued before the logout but never presented still work.
    let response = send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_logged_out_token_stays_rejected_at_expiry() -> Result<(), String> {
    let gw = gateway().await?;
    let pair = login(&gw).await?;

    let response = send(&gw.app, request("POST", "/auth/logout", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["revoked"], 1);

    // At exactly `exp` the signature and expiry still check out.
    gw.clock.advance(Duration::from_secs(1800));
    let response = send(&gw.app, request("GET", "/whoami", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["error"]["code"], "INVALID_TOKEN");
    Ok(())
}

#[tokio::test]
async fn test_validate_describes_subject() -> Result<(), String> {
    let gw = gateway().await?;

    let response = send(&gw.app, request("POST", "/auth/validate", None, None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let pair = login(&gw).await?;
    let response = send(&gw.app, request("POST", "/auth/validate", Some(&pair.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["valid"], true);
    assert_eq!(body["user"]["user_id"], "u1");
    assert_eq!(body["user"]["tier"], "pro");
    assert!(body["user"]["created_at"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_key_management_lifecycle() -> Result<(), String> {
    let gw = gateway().await?;
    let pair = login(&gw).await?;
    let token = pair.access_token.as_str();

    let response = send(
        &gw.app,
        request("POST", "/auth/keys", Some(token), Some(json!({"name": "ci", "expires_in_days": 30})))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await?;
    let new_key = created["api_key"].as_str().ok_or("api_key missing")?.to_string();
    let new_id = created["key"]["id"].as_str().ok_or("id missing")?.to_string();
    assert!(new_key.starts_with("tg_"));
    assert_eq!(created["key"]["tier"], "pro");
    assert_eq!(
        created["key"]["expires_at"].as_str().map(|s| s.starts_with("2024-01-31")),
        Some(true)
    );

    let response = send(&gw.app, request("GET", "/auth/keys", Some(token), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let keys = json_body(response).await?;
    assert_eq!(keys.as_array().map(Vec::len), Some(2));
    assert!(!keys.to_string().contains(&hash_api_key(&new_key)));

    let response = send(
        &gw.app,
        request("POST", "/auth/keys", Some(token), Some(json!({"name": "bad", "expires_in_days": 0})))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let rejected = json_body(response).await?;
    assert_eq!(rejected["error"]["details"]["field"], "expires_in_days");
    assert_eq!(rejected["error"]["details"]["max"], 3650);

    let response = send(
        &gw.app,
        request("DELETE", &format!("/auth/keys/{}", new_id), Some(token), None)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["was_active"], true);

    // The deactivated key can no longer log in.
    let response = send(
        &gw.app,
        request("POST", "/auth/login", None, Some(json!({"api_key": new_key})))?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Another subject's key id is reported as missing.
    let foreign = gw
        .credentials
        .create("u2", &hash_api_key("tg_foreign"), "foreign", Tier::Free, None)
        .await
        .map_err(|e| e.to_string())?;
    let response = send(
        &gw.app,
        request("DELETE", &format!("/auth/keys/{}", foreign.id), Some(token), None)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

// ============================================================================
// SURROUNDING STAGES
// ============================================================================

#[tokio::test]
async fn test_correlation_and_usage_accounting() -> Result<(), String> {
    let gw = gateway().await?;
    let pair = login(&gw).await?;

    let mut req = request("POST", "/translate", Some(&pair.access_token), None)?;
    req.headers_mut()
        .insert("x-correlation-id", "trace-abc".parse().map_err(|_| "bad header")?);
    let response = send(&gw.app, req).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-correlation-id").as_deref(), Some("trace-abc"));
    assert!(header(&response, "x-response-time").is_some_and(|v| v.ends_with("ms")));

    let mut records = Vec::new();
    for _ in 0..50 {
        records = gw.usage.records_for("u1").await;
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].endpoint, "/translate");
    assert_eq!(records[0].status_code, 200);
    assert_eq!(records[0].correlation_id.as_deref(), Some("trace-abc"));
    assert_eq!(records[0].recorded_at.timestamp(), EPOCH_2024);
    Ok(())
}

#[tokio::test]
async fn test_metrics_require_enterprise_tier() -> Result<(), String> {
    let gw = gateway().await?;
    let pro = login(&gw).await?;

    let response = send(&gw.app, request("GET", "/metrics", Some(&pro.access_token), None)?).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await?["error"]["code"], "FORBIDDEN");

    let enterprise = gw
        .state
        .codec
        .issue("ops", Tier::Enterprise, "unchecked")
        .map_err(|e| e.to_string())?;
    gw.credentials
        .create("ops", "unchecked", "ops", Tier::Enterprise, None)
        .await
        .map_err(|e| e.to_string())?;
    let response = send(
        &gw.app,
        request("GET", "/metrics", Some(&enterprise.access_token), None)?,
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("tollgate_http_requests_total"));
    Ok(())
}

#[tokio::test]
async fn test_dev_token_route_only_in_debug() -> Result<(), String> {
    let body = json!({"subject_id": "dev", "tier": "enterprise"});

    let gw = gateway().await?;
    let response = send(&gw.app, request("POST", "/dev/create-token", None, Some(body.clone()))?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let gw = gateway_with(
        GatewayConfig {
            debug: true,
            ..GatewayConfig::default()
        },
        RateLimitConfig::default(),
    )
    .await?;
    let response = send(&gw.app, request("POST", "/dev/create-token", None, Some(body))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let minted = json_body(response).await?;
    let token = minted["access_token"].as_str().ok_or("access_token missing")?;

    let response = send(&gw.app, request("GET", "/metrics", Some(token), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
