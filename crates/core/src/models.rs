use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Login credentials for the upstream trading API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Both fields must be present for a login attempt to be made.
    pub fn is_complete(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Account mode
// ---------------------------------------------------------------------------

/// Which balance of the account trades are booked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountMode {
    #[default]
    Practice,
    Real,
    Tournament,
}

impl AccountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountMode::Practice => "PRACTICE",
            AccountMode::Real => "REAL",
            AccountMode::Tournament => "TOURNAMENT",
        }
    }
}

impl fmt::Display for AccountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountMode {
    type Err = crate::ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRACTICE" => Ok(AccountMode::Practice),
            "REAL" => Ok(AccountMode::Real),
            "TOURNAMENT" => Ok(AccountMode::Tournament),
            other => Err(crate::ClientError::UnknownAccountMode(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// An allow-listed, currently tradable instrument with its payout percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPair {
    pub name: String,
    /// Percentage returned on a winning trade (100 minus the broker commission).
    pub payout: i64,
}

/// Instrument buckets of the upstream snapshot, in traversal order.
pub const SNAPSHOT_CATEGORIES: [&str; 3] = ["binary", "turbo", "digital-option"];

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// Number of candles requested per history query.
pub const CANDLE_COUNT: usize = 300;

/// Parameters of a single candle history request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleQuery {
    pub pair: String,
    /// Width of one candle in seconds.
    pub timeframe_secs: u64,
    pub count: usize,
    /// Unix time (seconds, fractional) of the newest candle.
    pub end_time: f64,
}

impl CandleQuery {
    /// The most recent [`CANDLE_COUNT`] candles of `timeframe_minutes` ending at `end_time`.
    pub fn latest(pair: impl Into<String>, timeframe_minutes: u64, end_time: f64) -> Self {
        Self {
            pair: pair.into(),
            timeframe_secs: timeframe_minutes.saturating_mul(60),
            count: CANDLE_COUNT,
            end_time,
        }
    }
}

/// Opaque candle record, forwarded as received from upstream.
pub type Candle = serde_json::Value;
