use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use prisma_core::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ExnovaConfig;
use crate::protocol::*;

type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Pending-request key for the `profile` frame that answers the ssid handshake.
const PROFILE_KEY: &str = "profile";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens [`ExnovaClient`] sessions.
pub struct ExnovaConnector {
    config: ExnovaConfig,
    http: reqwest::Client,
}

impl ExnovaConnector {
    pub fn new(config: ExnovaConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Exchange credentials for a session id.
    async fn login(&self, credentials: &Credentials) -> Result<String, ClientError> {
        let response = self
            .http
            .post(&self.config.auth_url)
            .timeout(self.config.request_timeout())
            .json(&json!({
                "identifier": credentials.email,
                "password": credentials.password,
            }))
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("Login request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("Login read failed: {}", e)))?;

        let parsed: LoginResponse = serde_json::from_str(&body).unwrap_or_default();
        match parsed.ssid {
            Some(ssid) if status.is_success() && !ssid.is_empty() => Ok(ssid),
            _ => {
                let reason = parsed
                    .message
                    .or(parsed.code)
                    .unwrap_or_else(|| body.trim().to_string());
                Err(ClientError::AuthenticationFailed(reason))
            }
        }
    }
}

impl Default for ExnovaConnector {
    fn default() -> Self {
        Self::new(ExnovaConfig::default())
    }
}

#[async_trait]
impl Connector for ExnovaConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn TradingClient>, ClientError> {
        info!(email = %credentials.email, "Logging in to Exnova");
        let ssid = self.login(credentials).await?;
        let client = ExnovaClient::open(self.config.clone(), &ssid).await?;
        Ok(Arc::new(client))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// State shared between the client and its reader task.
struct Shared {
    pending: Mutex<HashMap<String, oneshot::Sender<InboundFrame>>>,
    connected: AtomicBool,
    /// Last server clock reported by `timeSync`, in milliseconds.
    server_time_ms: AtomicI64,
}

/// An authenticated Exnova WebSocket session.
///
/// A writer task drains an mpsc queue into the socket; a reader task routes
/// replies back to waiting requests by `request_id`.
pub struct ExnovaClient {
    config: ExnovaConfig,
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    /// Balance id selected by `change_balance`.
    active_balance: Mutex<Option<i64>>,
    /// Instrument name → active id, filled from the initialization data.
    active_ids: Mutex<HashMap<String, i64>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ExnovaClient {
    /// Connect the WebSocket and authenticate it with `ssid`.
    pub async fn open(config: ExnovaConfig, ssid: &str) -> Result<Self, ClientError> {
        let (stream, _) = tokio::time::timeout(
            config.request_timeout(),
            connect_async(config.ws_url.as_str()),
        )
        .await
        .map_err(|_| ClientError::Timeout("WebSocket connect".to_string()))?
        .map_err(|e| ClientError::ConnectionFailed(format!("WebSocket connect failed: {}", e)))?;

        let (mut sink, source) = stream.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("Exnova write error: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            server_time_ms: AtomicI64::new(0),
        });
        let reader = tokio::spawn(read_loop(source, Arc::clone(&shared), outbound.clone()));

        let client = Self {
            config,
            outbound,
            shared,
            active_balance: Mutex::new(None),
            active_ids: Mutex::new(HashMap::new()),
            tasks: vec![writer, reader],
        };

        let profile = client
            .exchange(
                PROFILE_KEY.to_string(),
                OutboundMessage::Ssid {
                    msg: ssid.to_string(),
                    request_id: String::new(),
                },
            )
            .await?;

        match &profile.msg {
            Value::Object(profile) => {
                *lock(&client.active_balance) = profile.get("balance_id").and_then(Value::as_i64);
                info!("Exnova session authenticated");
                Ok(client)
            }
            _ => Err(ClientError::AuthenticationFailed("invalid ssid".to_string())),
        }
    }

    /// Server clock from the most recent `timeSync` frame (milliseconds, 0 if none yet).
    pub fn server_time_ms(&self) -> i64 {
        self.shared.server_time_ms.load(Ordering::Relaxed)
    }

    /// Send `message` and wait for the frame routed to `key`.
    async fn exchange(&self, key: String, message: OutboundMessage) -> Result<InboundFrame, ClientError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(key.clone(), tx);
        // The reader may have exited and cleared `pending` before the insert.
        if !self.shared.connected.load(Ordering::SeqCst) {
            lock(&self.shared.pending).remove(&key);
            return Err(ClientError::NotConnected);
        }

        let text = encode(&message)?;
        trace!(key = %key, "-> {}", text);
        if self.outbound.send(Message::Text(text.into())).is_err() {
            lock(&self.shared.pending).remove(&key);
            return Err(ClientError::NotConnected);
        }

        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(frame)) => Ok(frame),
            // Reader task ended and dropped the sender.
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                lock(&self.shared.pending).remove(&key);
                Err(ClientError::Timeout(key))
            }
        }
    }

    /// Issue a `sendMessage` request and return the reply frame.
    async fn request(&self, request: Request) -> Result<InboundFrame, ClientError> {
        let name = request.name.clone();
        let request_id = Uuid::new_v4().simple().to_string();
        let frame = self
            .exchange(
                request_id.clone(),
                OutboundMessage::SendMessage {
                    request_id,
                    msg: request,
                },
            )
            .await?;

        if frame.is_error() {
            return Err(ClientError::Protocol(format!(
                "{} rejected with status {:?}: {}",
                name, frame.status, frame.msg
            )));
        }
        Ok(frame)
    }

    async fn balances(&self) -> Result<Vec<BalanceEntry>, ClientError> {
        let frame = self.request(Request::get_balances()).await?;
        serde_json::from_value(frame.msg)
            .map_err(|e| ClientError::Protocol(format!("Malformed balances: {}", e)))
    }

    /// The balance currently selected, as reported by the broker right now.
    async fn active_balance(&self) -> Result<BalanceEntry, ClientError> {
        let selected = *lock(&self.active_balance);
        let balances = self.balances().await?;
        let entry = match selected {
            Some(id) => balances.into_iter().find(|b| b.id == id),
            None => balances
                .into_iter()
                .find(|b| b.kind == balance_kind(AccountMode::default())),
        };
        entry.ok_or_else(|| ClientError::Other("No active balance".to_string()))
    }

    async fn resolve_active_id(&self, pair: &str) -> Result<i64, ClientError> {
        if let Some(id) = lock(&self.active_ids).get(pair) {
            return Ok(*id);
        }
        // Refreshes the cache as a side effect.
        self.instrument_snapshot().await?;
        lock(&self.active_ids)
            .get(pair)
            .copied()
            .ok_or_else(|| ClientError::UnknownInstrument(pair.to_string()))
    }
}

impl Drop for ExnovaClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl TradingClient for ExnovaClient {
    async fn change_balance(&self, mode: AccountMode) -> Result<(), ClientError> {
        let balances = self.balances().await?;
        let entry = balances
            .iter()
            .find(|b| b.kind == balance_kind(mode))
            .ok_or_else(|| ClientError::UnknownAccountMode(mode.to_string()))?;
        *lock(&self.active_balance) = Some(entry.id);
        debug!(mode = %mode, balance_id = entry.id, "Active balance changed");
        Ok(())
    }

    async fn balance(&self) -> Result<f64, ClientError> {
        Ok(self.active_balance().await?.amount)
    }

    async fn currency(&self) -> Result<String, ClientError> {
        Ok(self.active_balance().await?.currency)
    }

    async fn check_connect(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn instrument_snapshot(&self) -> Result<Value, ClientError> {
        let frame = self.request(Request::get_initialization_data()).await?;
        let ids = active_ids(&frame.msg);
        if !ids.is_empty() {
            *lock(&self.active_ids) = ids;
        }
        Ok(frame.msg)
    }

    async fn candles(
        &self,
        pair: &str,
        timeframe_secs: u64,
        count: usize,
        end_time: f64,
    ) -> Result<Vec<Candle>, ClientError> {
        let active_id = self.resolve_active_id(pair).await?;
        let frame = self
            .request(Request::get_candles(active_id, timeframe_secs, end_time as i64, count))
            .await?;
        match frame.msg.get("candles") {
            Some(Value::Array(candles)) => Ok(candles.clone()),
            _ => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

async fn read_loop(mut source: WsSource, shared: Arc<Shared>, outbound: mpsc::UnboundedSender<Message>) {
    while let Some(item) = source.next().await {
        match item {
            Ok(Message::Text(text)) => handle_frame(&text, &shared, &outbound),
            Ok(Message::Close(frame)) => {
                info!("Exnova closed the connection: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Exnova read error: {}", e);
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with an error.
    lock(&shared.pending).clear();
}

fn handle_frame(text: &str, shared: &Shared, outbound: &mpsc::UnboundedSender<Message>) {
    let frame = match decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Skipping frame: {}", e);
            return;
        }
    };

    match frame.name.as_str() {
        "heartbeat" => {
            let ack = OutboundMessage::Heartbeat {
                msg: HeartbeatAck {
                    heartbeat_time: frame.msg.as_i64().unwrap_or_default(),
                    user_time: chrono::Utc::now().timestamp_millis(),
                },
                request_id: String::new(),
            };
            if let Ok(text) = encode(&ack) {
                let _ = outbound.send(Message::Text(text.into()));
            }
            return;
        }
        "timeSync" => {
            if let Some(ms) = frame.msg.as_i64() {
                shared.server_time_ms.store(ms, Ordering::Relaxed);
            }
            return;
        }
        _ => {}
    }

    let key = frame.request_id().or_else(|| {
        (frame.name == PROFILE_KEY).then(|| PROFILE_KEY.to_string())
    });
    let waiter = key.and_then(|key| lock(&shared.pending).remove(&key));
    match waiter {
        Some(tx) => {
            let _ = tx.send(frame);
        }
        None => trace!(name = %frame.name, "Unsolicited frame"),
    }
}
