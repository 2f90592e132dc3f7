use crate::error::ApiError;
use prisma_core::{Connector, TradingClient};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// Opens upstream sessions on `/api/connect`.
    pub connector: Arc<dyn Connector>,
    /// The single upstream session, if any.
    ///
    /// Readers hold the lock only long enough to clone the handle; writers
    /// only long enough to store the outcome of a connect.
    pub session: RwLock<Option<Arc<dyn TradingClient>>>,
    /// Held for a whole connect attempt so concurrent connects are serialised
    /// without blocking readers of `session`.
    pub connect_lock: Mutex<()>,
}

impl AppState {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            session: RwLock::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    /// The current session, provided the upstream still reports it connected.
    ///
    /// A dead session is left in place; only the next connect replaces it.
    pub async fn live_session(&self) -> Result<Arc<dyn TradingClient>, ApiError> {
        let client = self.session.read().await.clone();
        match client {
            Some(client) if client.check_connect().await => Ok(client),
            _ => Err(ApiError::not_authenticated()),
        }
    }
}
