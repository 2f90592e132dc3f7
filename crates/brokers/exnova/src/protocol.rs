use prisma_core::{clean_name, AccountMode, ClientError, SNAPSHOT_CATEGORIES};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Frames sent from the client TO Exnova.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name")]
pub enum OutboundMessage {
    /// Authenticate the socket with the session id obtained at login.
    #[serde(rename = "ssid")]
    Ssid { msg: String, request_id: String },
    /// Answer to a server heartbeat.
    #[serde(rename = "heartbeat")]
    Heartbeat { msg: HeartbeatAck, request_id: String },
    /// Request/response call; the reply echoes `request_id`.
    #[serde(rename = "sendMessage")]
    SendMessage { request_id: String, msg: Request },
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    #[serde(rename = "heartbeatTime")]
    pub heartbeat_time: i64,
    #[serde(rename = "userTime")]
    pub user_time: i64,
}

/// Body of a `sendMessage` frame.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub name: String,
    pub version: String,
    pub body: Value,
}

impl Request {
    pub fn get_balances() -> Self {
        Self {
            name: "get-balances".to_string(),
            version: "1.0".to_string(),
            body: json!({}),
        }
    }

    pub fn get_initialization_data() -> Self {
        Self {
            name: "get-initialization-data".to_string(),
            version: "3.0".to_string(),
            body: json!({}),
        }
    }

    /// `count` candles of `size` seconds for `active_id`, the newest closing at `to`.
    pub fn get_candles(active_id: i64, size: u64, to: i64, count: usize) -> Self {
        Self {
            name: "get-candles".to_string(),
            version: "2.0".to_string(),
            body: json!({
                "active_id": active_id,
                "size": size,
                "to": to,
                "count": count,
            }),
        }
    }
}

/// Any frame received FROM Exnova.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub name: String,
    #[serde(default)]
    pub request_id: Option<Value>,
    #[serde(default)]
    pub msg: Value,
    #[serde(default)]
    pub status: Option<i64>,
}

impl InboundFrame {
    /// The echoed request id, if the frame carries a non-empty one.
    pub fn request_id(&self) -> Option<String> {
        match self.request_id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Status codes from 4000 up signal a rejected request.
    pub fn is_error(&self) -> bool {
        self.status.is_some_and(|s| s >= 4000)
    }
}

/// Login endpoint response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One entry of a `balances` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceEntry {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: i64,
    pub amount: f64,
    pub currency: String,
}

/// Balance type code used by the broker for each account mode.
pub fn balance_kind(mode: AccountMode) -> i64 {
    match mode {
        AccountMode::Real => 1,
        AccountMode::Tournament => 2,
        AccountMode::Practice => 4,
    }
}

pub fn encode(msg: &OutboundMessage) -> Result<String, ClientError> {
    serde_json::to_string(msg).map_err(|e| ClientError::Protocol(format!("Serialization error: {}", e)))
}

pub fn decode(text: &str) -> Result<InboundFrame, ClientError> {
    serde_json::from_str(text).map_err(|e| ClientError::Protocol(format!("Deserialization error: {}", e)))
}

/// Map cleaned instrument names to the broker's numeric active ids.
///
/// The id is the record's `id` field, or failing that its key in `actives`.
pub fn active_ids(snapshot: &Value) -> HashMap<String, i64> {
    let mut ids = HashMap::new();
    for category in SNAPSHOT_CATEGORIES {
        let Some(actives) = snapshot
            .get(category)
            .and_then(|bucket| bucket.get("actives"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        for (key, record) in actives {
            let Some(name) = record.get("name").and_then(Value::as_str) else {
                continue;
            };
            let id = record
                .get("id")
                .and_then(Value::as_i64)
                .or_else(|| key.parse().ok());
            if let Some(id) = id {
                ids.entry(clean_name(name)).or_insert(id);
            }
        }
    }
    ids
}
