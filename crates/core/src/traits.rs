use crate::models::*;
use async_trait::async_trait;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Upstream client errors
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the upstream trading API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    AuthenticationFailed(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),
    #[error("Unknown account mode: {0}")]
    UnknownAccountMode(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Client error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Connector Trait
// ---------------------------------------------------------------------------

/// Opens authenticated sessions against the upstream trading API.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Log in with the given credentials.
    ///
    /// The error's `Display` text is the reason reported back to the user.
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn TradingClient>, ClientError>;
}

// ---------------------------------------------------------------------------
// Trading Client Trait
// ---------------------------------------------------------------------------

/// An authenticated upstream session.
#[async_trait]
pub trait TradingClient: Send + Sync {
    /// Select which account balance subsequent calls refer to.
    async fn change_balance(&self, mode: AccountMode) -> Result<(), ClientError>;

    /// Amount held in the active balance.
    async fn balance(&self) -> Result<f64, ClientError>;

    /// Currency of the active balance.
    async fn currency(&self) -> Result<String, ClientError>;

    /// Whether the upstream connection is still alive.
    async fn check_connect(&self) -> bool;

    /// Full instrument metadata, keyed by category (`binary`, `turbo`, `digital-option`).
    async fn instrument_snapshot(&self) -> Result<serde_json::Value, ClientError>;

    /// Historical candles for `pair`. An empty vec means nothing was returned.
    async fn candles(
        &self,
        pair: &str,
        timeframe_secs: u64,
        count: usize,
        end_time: f64,
    ) -> Result<Vec<Candle>, ClientError>;
}
