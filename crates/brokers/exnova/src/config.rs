use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for connecting to Exnova.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExnovaConfig {
    /// HTTPS endpoint that exchanges credentials for a session id.
    pub auth_url: String,
    /// Trading WebSocket endpoint.
    pub ws_url: String,
    /// Upper bound on any single request/response exchange, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ExnovaConfig {
    fn default() -> Self {
        Self {
            auth_url: "https://api.trade.exnova.com/v2/login".to_string(),
            ws_url: "wss://ws.trade.exnova.com/echo/websocket".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ExnovaConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
