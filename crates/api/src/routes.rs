use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prisma_core::{AccountMode, Candle, CandleQuery, ClientError, Credentials, OpenPair};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Session
        .route("/connect", post(connect))
        // Market data
        .route("/open-pairs", get(list_open_pairs))
        .route("/candles/{pair}/{timeframe}", get(get_candles))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub email: Option<String>,
    /// Password ("senha" is the field name the front-end sends).
    #[serde(default)]
    pub senha: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub message: String,
    pub balance: f64,
    pub currency: String,
}

async fn connect(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let credentials = Credentials::new(
        req.email.unwrap_or_default(),
        req.senha.unwrap_or_default(),
    );
    if !credentials.is_complete() {
        return Err(ApiError::BadRequest(
            "Email and password are required".to_string(),
        ));
    }

    let mode: AccountMode = match req.account_type.as_deref() {
        None => AccountMode::default(),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Unknown account type: {}", raw)))?,
    };

    info!(email = %credentials.email, account_type = %mode, "Connecting to broker");

    // Any previous session is replaced, or cleared if this attempt fails.
    // It keeps serving readers until then.
    let _connecting = state.connect_lock.lock().await;
    let client = match state.connector.connect(&credentials).await {
        Ok(client) => client,
        Err(e) => {
            *state.session.write().await = None;
            error!(email = %credentials.email, "Connection failed: {}", e);
            return Err(ApiError::Unauthorized(format!(
                "Invalid credentials or connection error: {}",
                e
            )));
        }
    };
    *state.session.write().await = Some(Arc::clone(&client));
    info!("Connected to broker");

    let account = async {
        client.change_balance(mode).await?;
        let balance = client.balance().await?;
        let currency = client.currency().await?;
        Ok::<_, ClientError>((balance, currency))
    };
    let (balance, currency) = account.await.map_err(|e| {
        error!(account_type = %mode, "Failed to load account: {}", e);
        ApiError::Internal("Failed to load account balance.".to_string())
    })?;

    Ok(Json(ConnectResponse {
        message: "Connected successfully!".to_string(),
        balance,
        currency,
    }))
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

const FETCH_ASSETS_FAILED: &str = "Failed to fetch assets.";

async fn list_open_pairs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OpenPair>>, ApiError> {
    let client = state.live_session().await?;
    info!("Fetching and filtering allowed assets");

    let snapshot = client.instrument_snapshot().await.map_err(|e| {
        error!("Failed to fetch assets: {}", e);
        ApiError::Internal(FETCH_ASSETS_FAILED.to_string())
    })?;
    let pairs = prisma_core::open_pairs(&snapshot).map_err(|e| {
        error!("Failed to fetch assets: {}", e);
        ApiError::Internal(FETCH_ASSETS_FAILED.to_string())
    })?;

    info!(count = pairs.len(), "Found allowed open assets");
    Ok(Json(pairs))
}

async fn get_candles(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, u64)>, PathRejection>,
) -> Result<Json<Vec<Candle>>, ApiError> {
    // Unmatched shapes (e.g. a non-integer timeframe) are simply not a route.
    let Path((pair, timeframe)) = path.map_err(|e| {
        debug!("Rejected candles path: {}", e);
        ApiError::NotFound("Not found".to_string())
    })?;
    let client = state.live_session().await?;

    let query = CandleQuery::latest(decode_pair(&pair), timeframe, now_secs());
    let result = client
        .candles(&query.pair, query.timeframe_secs, query.count, query.end_time)
        .await;

    match result {
        Ok(candles) if !candles.is_empty() => Ok(Json(candles)),
        Ok(_) | Err(ClientError::UnknownInstrument(_)) => {
            warn!(pair = %query.pair, "No candles returned");
            Err(ApiError::NotFound(format!(
                "Could not fetch candles for pair {}",
                query.pair
            )))
        }
        Err(e) => {
            error!(pair = %query.pair, "Failed to fetch candles: {}", e);
            Err(ApiError::Internal("Failed to fetch candles.".to_string()))
        }
    }
}

/// The router already percent-decoded the segment once; the front-end encodes
/// pair names before building the URL, so decode again.
fn decode_pair(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Wall clock as fractional Unix seconds.
fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
