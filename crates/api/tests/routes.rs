use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use async_trait::async_trait;
use axum::Router;
use prisma_api::{build_router, AppState};
use prisma_brokers_common::simulated::{
    sample_candles, CandleFailure, SimulatedConfig, SimulatedConnector,
};
use prisma_core::{AccountMode, ClientError, Connector, Credentials, TradingClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

const EMAIL: &str = "trader@example.com";
const PASSWORD: &str = "secret";

fn app_with(config: SimulatedConfig) -> (Router, Arc<SimulatedConnector>) {
    let connector = Arc::new(SimulatedConnector::new(SimulatedConfig {
        credentials: Some(Credentials::new(EMAIL, PASSWORD)),
        ..config
    }));
    let state = Arc::new(AppState::new(connector.clone()));
    (build_router(state), connector)
}

fn app() -> (Router, Arc<SimulatedConnector>) {
    app_with(SimulatedConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn post_connect(app: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/connect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn login(app: &Router) {
    let (status, _) = post_connect(app, json!({ "email": EMAIL, "senha": PASSWORD })).await;
    assert_eq!(status, StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_credentials_rejected_before_upstream() {
    let (app, connector) = app();

    for body in [
        json!({ "email": "", "senha": PASSWORD }),
        json!({ "email": EMAIL, "senha": "" }),
        json!({ "email": EMAIL }),
        json!({ "senha": PASSWORD, "account_type": "REAL" }),
        json!({ "account_type": "not-a-mode" }),
    ] {
        let (status, response) = post_connect(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "Email and password are required");
    }
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, connector) = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/connect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, response) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"].is_string());
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn test_connect_defaults_to_practice() {
    let (app, connector) = app();
    let (status, response) = post_connect(&app, json!({ "email": EMAIL, "senha": PASSWORD })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["message"], "Connected successfully!");
    assert_eq!(response["balance"], 10_000.0);
    assert_eq!(response["currency"], "USD");

    let session = connector.last_session().unwrap();
    assert_eq!(session.balance_changes(), vec![AccountMode::Practice]);
}

#[tokio::test]
async fn test_connect_account_type_is_case_insensitive() {
    let mut balances = HashMap::new();
    balances.insert(AccountMode::Real, 42.5);
    let (app, connector) = app_with(SimulatedConfig {
        balances,
        currency: "BRL".to_string(),
        ..Default::default()
    });

    let (status, response) = post_connect(
        &app,
        json!({ "email": EMAIL, "senha": PASSWORD, "account_type": "real" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["balance"], 42.5);
    assert_eq!(response["currency"], "BRL");
    assert_eq!(
        connector.last_session().unwrap().active_mode(),
        AccountMode::Real
    );
}

#[tokio::test]
async fn test_unknown_account_type_rejected() {
    let (app, connector) = app();
    let (status, response) = post_connect(
        &app,
        json!({ "email": EMAIL, "senha": PASSWORD, "account_type": "demo" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "Unknown account type: demo");
    assert!(connector.attempts().is_empty());
}

#[tokio::test]
async fn test_invalid_credentials_are_unauthorized() {
    let (app, _) = app();
    let (status, response) =
        post_connect(&app, json!({ "email": EMAIL, "senha": "wrong" })).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response["error"],
        "Invalid credentials or connection error: invalid_credentials"
    );

    let (status, _) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = get(&app, "/api/candles/EURUSD/1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_failed_reconnect_clears_existing_session() {
    let (app, _) = app();
    login(&app).await;
    let (status, _) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_connect(&app, json!({ "email": EMAIL, "senha": "wrong" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, response) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"], "Not authenticated.");
}

#[tokio::test]
async fn test_balance_failure_after_login_keeps_session() {
    let (app, connector) = app_with(SimulatedConfig {
        balance_error: Some("balances unavailable".to_string()),
        ..Default::default()
    });

    let (status, response) = post_connect(&app, json!({ "email": EMAIL, "senha": PASSWORD })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["error"], "Failed to load account balance.");
    assert_eq!(
        connector.last_session().unwrap().balance_changes(),
        vec![AccountMode::Practice]
    );

    let (status, _) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::OK);
}

/// Holds every login until the gate is opened once per attempt.
struct GatedConnector {
    gate: Arc<Notify>,
    inner: SimulatedConnector,
}

#[async_trait]
impl Connector for GatedConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn TradingClient>, ClientError> {
        self.gate.notified().await;
        self.inner.connect(credentials).await
    }
}

#[tokio::test]
async fn test_slow_reconnect_does_not_block_readers() {
    let gate = Arc::new(Notify::new());
    let connector = Arc::new(GatedConnector {
        gate: Arc::clone(&gate),
        inner: SimulatedConnector::with_credentials(EMAIL, PASSWORD),
    });
    let app = build_router(Arc::new(AppState::new(connector)));

    gate.notify_one();
    login(&app).await;

    let pending = {
        let app = app.clone();
        tokio::spawn(async move {
            post_connect(&app, json!({ "email": EMAIL, "senha": PASSWORD })).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, _) = tokio::time::timeout(Duration::from_secs(1), get(&app, "/api/open-pairs"))
        .await
        .expect("open-pairs waited on the in-flight login");
    assert_eq!(status, StatusCode::OK);

    gate.notify_one();
    let (status, _) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let (app, connector) = app();
    login(&app).await;
    let first = connector.last_session().unwrap();
    first.set_connected(false);

    login(&app).await;
    let (status, _) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(connector.attempts().len(), 2);
}

// ---------------------------------------------------------------------------
// Open pairs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_open_pairs_requires_session() {
    let (app, _) = app();
    let (status, response) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"], "Not authenticated.");
}

#[tokio::test]
async fn test_open_pairs_dropped_connection_is_unauthorized() {
    let (app, connector) = app();
    login(&app).await;
    connector.last_session().unwrap().set_connected(false);

    let (status, _) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The liveness check does not discard the session.
    connector.last_session().unwrap().set_connected(true);
    let (status, _) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_open_pairs_single_entry() {
    let (app, _) = app_with(SimulatedConfig {
        snapshot: json!({
            "binary": { "actives": { "1": {
                "name": "front.EURUSD", "enabled": true, "is_suspended": false,
                "option": { "profit": { "commission": 20 } }
            } } }
        }),
        ..Default::default()
    });
    login(&app).await;

    let (status, response) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!([{ "name": "EURUSD", "payout": 80 }]));
}

#[tokio::test]
async fn test_open_pairs_filters_and_deduplicates() {
    let (app, _) = app_with(SimulatedConfig {
        snapshot: json!({
            "binary": { "actives": {
                "1": { "name": "front.EURUSD", "enabled": true, "is_suspended": false,
                       "option": { "profit": { "commission": 50 } } },
                "2": { "name": "front.RANDOMPAIR", "enabled": true, "is_suspended": false,
                       "option": { "profit": { "commission": 10 } } },
                "3": { "name": "front.GBPUSD", "enabled": true, "is_suspended": true,
                       "option": { "profit": { "commission": 10 } } },
                "4": { "name": "front.USDCAD", "enabled": false, "is_suspended": false,
                       "option": { "profit": { "commission": 10 } } }
            } },
            "turbo": { "actives": {
                "1": { "name": "front.EURUSD", "enabled": true, "is_suspended": false,
                       "option": { "profit": { "commission": 20 } } }
            } }
        }),
        ..Default::default()
    });
    login(&app).await;

    let (status, response) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!([{ "name": "EURUSD", "payout": 80 }]));
}

#[tokio::test]
async fn test_open_pairs_malformed_snapshot_is_server_error() {
    let (app, _) = app_with(SimulatedConfig {
        snapshot: json!({ "binary": { "actives": ["not", "a", "mapping"] } }),
        ..Default::default()
    });
    login(&app).await;

    let (status, response) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["error"], "Failed to fetch assets.");
}

#[tokio::test]
async fn test_open_pairs_null_commission_is_server_error() {
    let (app, _) = app_with(SimulatedConfig {
        snapshot: json!({
            "binary": { "actives": { "1": {
                "name": "front.EURUSD", "enabled": true, "is_suspended": false,
                "option": { "profit": { "commission": null } }
            } } }
        }),
        ..Default::default()
    });
    login(&app).await;

    let (status, response) = get(&app, "/api/open-pairs").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["error"], "Failed to fetch assets.");
}

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_candles_request_parameters() {
    let (app, connector) = app();
    login(&app).await;

    let (status, response) = get(&app, "/api/candles/EURUSD/5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, Value::Array(sample_candles(1_700_000_000, 60, 3)));

    let requests = connector.last_session().unwrap().candle_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].pair, "EURUSD");
    assert_eq!(requests[0].timeframe_secs, 300);
    assert_eq!(requests[0].count, 300);
    assert!(requests[0].end_time > 1_600_000_000.0);
}

#[tokio::test]
async fn test_candles_pair_is_url_decoded() {
    let mut candles = HashMap::new();
    candles.insert("BTCUSD-OTC-op".to_string(), sample_candles(1_000, 60, 2));
    let (app, connector) = app_with(SimulatedConfig {
        candles,
        ..Default::default()
    });
    login(&app).await;

    // Double-encoded by the front-end: "-" → "%2D" → "%252D".
    let (status, response) = get(&app, "/api/candles/BTCUSD%252DOTC%252Dop/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.as_array().unwrap().len(), 2);
    assert_eq!(
        connector.last_session().unwrap().candle_requests()[0].pair,
        "BTCUSD-OTC-op"
    );
}

#[tokio::test]
async fn test_candles_empty_result_is_not_found() {
    let (app, _) = app();
    login(&app).await;

    let (status, response) = get(&app, "/api/candles/GBPJPY/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Could not fetch candles for pair GBPJPY");
}

#[tokio::test]
async fn test_candles_unknown_instrument_is_not_found() {
    let (app, _) = app_with(SimulatedConfig {
        candle_failures: HashMap::from([("XYZ".to_string(), CandleFailure::UnknownInstrument)]),
        ..Default::default()
    });
    login(&app).await;

    let (status, response) = get(&app, "/api/candles/XYZ/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response["error"], "Could not fetch candles for pair XYZ");
}

#[tokio::test]
async fn test_candles_upstream_error_is_server_error() {
    let (app, _) = app_with(SimulatedConfig {
        candle_failures: HashMap::from([(
            "EURUSD".to_string(),
            CandleFailure::Upstream("rate limited".to_string()),
        )]),
        ..Default::default()
    });
    login(&app).await;

    let (status, response) = get(&app, "/api/candles/EURUSD/1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["error"], "Failed to fetch candles.");
}

#[tokio::test]
async fn test_candles_requires_session() {
    let (app, connector) = app();
    let (status, _) = get(&app, "/api/candles/EURUSD/5").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(connector.last_session().is_none());
}

#[tokio::test]
async fn test_candles_non_integer_timeframe_is_not_found() {
    let (app, connector) = app();
    login(&app).await;

    for uri in ["/api/candles/EURUSD/five", "/api/candles/EURUSD/-5", "/api/candles/EURUSD/1.5"] {
        let (status, _) = get(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
    }
    assert!(connector.last_session().unwrap().candle_requests().is_empty());
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, response) = get(&app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "ok");
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let (app, _) = app();
    let request = Request::builder()
        .uri("/api/health")
        .header(header::ORIGIN, "null")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}
