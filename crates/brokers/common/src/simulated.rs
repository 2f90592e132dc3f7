use async_trait::async_trait;
use prisma_core::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Configuration for the simulated upstream.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Credentials accepted by `connect`. `None` accepts any login.
    pub credentials: Option<Credentials>,
    /// Reason reported when a login is refused.
    pub rejection_reason: String,
    /// Amount held in each account balance.
    pub balances: HashMap<AccountMode, f64>,
    pub currency: String,
    /// Returned verbatim by `instrument_snapshot`.
    pub snapshot: Value,
    /// Candle history per pair. Pairs not listed yield no candles.
    pub candles: HashMap<String, Vec<Candle>>,
    /// When set, `balance` and `currency` fail with this reason.
    pub balance_error: Option<String>,
    /// Pairs whose candle requests fail, checked before `candles`.
    pub candle_failures: HashMap<String, CandleFailure>,
}

/// How a simulated candle request fails.
#[derive(Debug, Clone, PartialEq)]
pub enum CandleFailure {
    /// The broker does not know the instrument.
    UnknownInstrument,
    /// Any other upstream error, with its reason.
    Upstream(String),
}

impl CandleFailure {
    fn to_error(&self, pair: &str) -> ClientError {
        match self {
            CandleFailure::UnknownInstrument => ClientError::UnknownInstrument(pair.to_string()),
            CandleFailure::Upstream(reason) => ClientError::Protocol(reason.clone()),
        }
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        let balances = HashMap::from([
            (AccountMode::Practice, 10_000.0),
            (AccountMode::Real, 0.0),
            (AccountMode::Tournament, 0.0),
        ]);
        let candles = HashMap::from([
            ("EURUSD".to_string(), sample_candles(1_700_000_000, 60, 3)),
            ("EURUSD-OTC".to_string(), sample_candles(1_700_000_000, 60, 3)),
        ]);
        Self {
            credentials: None,
            rejection_reason: "invalid_credentials".to_string(),
            balances,
            currency: "USD".to_string(),
            snapshot: default_snapshot(),
            candles,
            balance_error: None,
            candle_failures: HashMap::new(),
        }
    }
}

/// A small snapshot shaped like the broker's initialization data.
pub fn default_snapshot() -> Value {
    json!({
        "binary": {
            "actives": {
                "1": {
                    "name": "front.EURUSD",
                    "enabled": true,
                    "is_suspended": false,
                    "option": { "profit": { "commission": 20 } }
                },
                "76": {
                    "name": "front.EURUSD-OTC",
                    "enabled": true,
                    "is_suspended": false,
                    "option": { "profit": { "commission": 12 } }
                },
                "5": {
                    "name": "front.GBPUSD",
                    "enabled": false,
                    "is_suspended": false,
                    "option": { "profit": { "commission": 18 } }
                }
            }
        },
        "turbo": {
            "actives": {
                "1": {
                    "name": "front.EURUSD",
                    "enabled": true,
                    "is_suspended": false,
                    "option": { "profit": { "commission": 15 } }
                },
                "816": {
                    "name": "front.XAUUSD",
                    "enabled": true,
                    "is_suspended": true,
                    "option": { "profit": { "commission": 25 } }
                }
            }
        },
        "digital-option": {
            "actives": {
                "1000": {
                    "name": "front.DOGECOIN",
                    "enabled": true,
                    "is_suspended": false,
                    "option": { "profit": { "commission": 10 } }
                }
            }
        }
    })
}

/// `count` flat candles of `size` seconds, the last one opening at `to`.
pub fn sample_candles(to: i64, size: i64, count: i64) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let from = to - (count - 1 - i) * size;
            let base = 1.08 + i as f64 * 0.0001;
            json!({
                "id": i + 1,
                "from": from,
                "at": from * 1_000_000_000,
                "to": from + size,
                "open": base,
                "close": base + 0.00005,
                "min": base - 0.0001,
                "max": base + 0.0001,
                "volume": 0
            })
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Hands out [`SimulatedClient`] sessions without touching the network.
pub struct SimulatedConnector {
    config: Arc<SimulatedConfig>,
    attempts: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Arc<SimulatedClient>>>,
}

impl SimulatedConnector {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config: Arc::new(config),
            attempts: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Accept only the given credentials.
    pub fn with_credentials(email: &str, password: &str) -> Self {
        Self::new(SimulatedConfig {
            credentials: Some(Credentials::new(email, password)),
            ..Default::default()
        })
    }

    /// Emails of every login attempt, in order.
    pub fn attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }

    /// The most recently opened session.
    pub fn last_session(&self) -> Option<Arc<SimulatedClient>> {
        lock(&self.sessions).last().cloned()
    }
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn TradingClient>, ClientError> {
        lock(&self.attempts).push(credentials.email.clone());

        if let Some(expected) = &self.config.credentials {
            if expected != credentials {
                return Err(ClientError::AuthenticationFailed(
                    self.config.rejection_reason.clone(),
                ));
            }
        }

        debug!(email = %credentials.email, "Simulated login accepted");
        let client = Arc::new(SimulatedClient::new(Arc::clone(&self.config)));
        lock(&self.sessions).push(Arc::clone(&client));
        Ok(client as Arc<dyn TradingClient>)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// An in-memory upstream session that records the calls made against it.
pub struct SimulatedClient {
    config: Arc<SimulatedConfig>,
    connected: AtomicBool,
    mode: Mutex<AccountMode>,
    balance_changes: Mutex<Vec<AccountMode>>,
    candle_requests: Mutex<Vec<CandleQuery>>,
}

impl SimulatedClient {
    pub fn new(config: Arc<SimulatedConfig>) -> Self {
        Self {
            config,
            connected: AtomicBool::new(true),
            mode: Mutex::new(AccountMode::default()),
            balance_changes: Mutex::new(Vec::new()),
            candle_requests: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the upstream dropping (or restoring) the connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn active_mode(&self) -> AccountMode {
        *lock(&self.mode)
    }

    /// Every `change_balance` call, in order.
    pub fn balance_changes(&self) -> Vec<AccountMode> {
        lock(&self.balance_changes).clone()
    }

    /// Every candle request, in order.
    pub fn candle_requests(&self) -> Vec<CandleQuery> {
        lock(&self.candle_requests).clone()
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn ensure_balance_readable(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        match &self.config.balance_error {
            Some(reason) => Err(ClientError::Protocol(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TradingClient for SimulatedClient {
    async fn change_balance(&self, mode: AccountMode) -> Result<(), ClientError> {
        self.ensure_connected()?;
        *lock(&self.mode) = mode;
        lock(&self.balance_changes).push(mode);
        Ok(())
    }

    async fn balance(&self) -> Result<f64, ClientError> {
        self.ensure_balance_readable()?;
        let mode = self.active_mode();
        Ok(self.config.balances.get(&mode).copied().unwrap_or(0.0))
    }

    async fn currency(&self) -> Result<String, ClientError> {
        self.ensure_balance_readable()?;
        Ok(self.config.currency.clone())
    }

    async fn check_connect(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn instrument_snapshot(&self) -> Result<Value, ClientError> {
        self.ensure_connected()?;
        Ok(self.config.snapshot.clone())
    }

    async fn candles(
        &self,
        pair: &str,
        timeframe_secs: u64,
        count: usize,
        end_time: f64,
    ) -> Result<Vec<Candle>, ClientError> {
        self.ensure_connected()?;
        lock(&self.candle_requests).push(CandleQuery {
            pair: pair.to_string(),
            timeframe_secs,
            count,
            end_time,
        });
        if let Some(failure) = self.config.candle_failures.get(pair) {
            return Err(failure.to_error(pair));
        }
        Ok(self.config.candles.get(pair).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_wrong_password() {
        let connector = SimulatedConnector::with_credentials("trader@example.com", "secret");
        let err = connector
            .connect(&Credentials::new("trader@example.com", "wrong"))
            .await
            .err()
            .expect("login should fail");
        assert_eq!(err.to_string(), "invalid_credentials");
        assert!(connector.last_session().is_none());
        assert_eq!(connector.attempts(), vec!["trader@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_balance_follows_account_mode() {
        let connector = SimulatedConnector::default();
        let client = connector
            .connect(&Credentials::new("a@b.c", "pw"))
            .await
            .unwrap();

        client.change_balance(AccountMode::Practice).await.unwrap();
        assert_eq!(client.balance().await.unwrap(), 10_000.0);
        client.change_balance(AccountMode::Real).await.unwrap();
        assert_eq!(client.balance().await.unwrap(), 0.0);
        assert_eq!(client.currency().await.unwrap(), "USD");

        let session = connector.last_session().unwrap();
        assert_eq!(
            session.balance_changes(),
            vec![AccountMode::Practice, AccountMode::Real]
        );
    }

    #[tokio::test]
    async fn test_candles_recorded_and_unknown_pair_empty() {
        let connector = SimulatedConnector::default();
        let client = connector
            .connect(&Credentials::new("a@b.c", "pw"))
            .await
            .unwrap();

        let candles = client.candles("EURUSD", 60, 300, 1.0).await.unwrap();
        assert_eq!(candles.len(), 3);
        assert!(client.candles("NOPE", 60, 300, 1.0).await.unwrap().is_empty());

        let requests = connector.last_session().unwrap().candle_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].pair, "EURUSD");
        assert_eq!(requests[0].count, 300);
    }

    #[tokio::test]
    async fn test_dropped_connection() {
        let connector = SimulatedConnector::default();
        let client = connector
            .connect(&Credentials::new("a@b.c", "pw"))
            .await
            .unwrap();
        connector.last_session().unwrap().set_connected(false);

        assert!(!client.check_connect().await);
        assert!(matches!(
            client.instrument_snapshot().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let connector = SimulatedConnector::new(SimulatedConfig {
            balance_error: Some("balances unavailable".to_string()),
            candle_failures: HashMap::from([
                ("GBPJPY".to_string(), CandleFailure::UnknownInstrument),
                ("EURUSD".to_string(), CandleFailure::Upstream("rate limited".to_string())),
            ]),
            ..Default::default()
        });
        let client = connector
            .connect(&Credentials::new("a@b.c", "pw"))
            .await
            .unwrap();

        client.change_balance(AccountMode::Practice).await.unwrap();
        assert!(matches!(client.balance().await, Err(ClientError::Protocol(_))));
        assert!(matches!(client.currency().await, Err(ClientError::Protocol(_))));
        assert!(matches!(
            client.candles("GBPJPY", 60, 300, 1.0).await,
            Err(ClientError::UnknownInstrument(p)) if p == "GBPJPY"
        ));
        assert!(matches!(
            client.candles("EURUSD", 60, 300, 1.0).await,
            Err(ClientError::Protocol(r)) if r == "rate limited"
        ));
        // The request is still recorded.
        assert_eq!(connector.last_session().unwrap().candle_requests().len(), 2);
    }

    #[test]
    fn test_default_snapshot_filters_to_known_pairs() {
        let pairs = open_pairs(&default_snapshot()).unwrap();
        let names: Vec<_> = pairs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["EURUSD", "EURUSD-OTC"]);
        assert_eq!(pairs[0].payout, 85);
        assert_eq!(pairs[1].payout, 88);
    }

    #[test]
    fn test_sample_candles_are_contiguous() {
        let candles = sample_candles(1_000, 60, 3);
        assert_eq!(candles[0]["from"], 880);
        assert_eq!(candles[2]["from"], 1_000);
        assert_eq!(candles[1]["to"], 1_000);
    }
}
