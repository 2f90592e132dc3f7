//! Static allow-list of tradable instrument names.
//!
//! Every category has a weekday ("open market") list and a weekend ("OTC")
//! list; the broker quotes the two under different identifiers.

use serde::Serialize;

/// Instrument category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Forex,
    Crypto,
    Commodity,
    Equity,
}

/// Market session an instrument name is quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// Regular weekday market.
    Open,
    /// Weekend / after-hours over-the-counter market.
    Otc,
}

/// One partition of the allow-list.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AllowGroup {
    pub category: Category,
    pub market: Market,
    pub names: &'static [&'static str],
}

pub const FOREX: &[&str] = &[
    "AUDCAD", "AUDCHF", "AUDJPY", "AUDNZD", "AUDUSD",
    "CADCHF", "CADJPY", "CHFJPY", "EURAUD", "EURCAD",
    "EURCHF", "EURGBP", "EURJPY", "EURNZD", "EURUSD",
    "GBPAUD", "GBPCAD", "GBPCHF", "GBPJPY", "GBPNZD",
    "GBPUSD", "NZDCAD", "NZDJPY", "USDBRL", "USDCAD",
    "USDCHF",
];

pub const FOREX_OTC: &[&str] = &[
    "AUDCAD-OTC", "AUDCHF-OTC", "AUDJPY-OTC", "AUDNZD-OTC", "AUDUSD-OTC",
    "CADCHF-OTC", "CADJPY-OTC", "CHFJPY-OTC", "EURAUD-OTC", "EURCAD-OTC",
    "EURCHF-OTC", "EURGBP-OTC", "EURJPY-OTC", "EURNZD-OTC", "EURUSD-OTC",
    "GBPAUD-OTC", "GBPCAD-OTC", "GBPCHF-OTC", "GBPJPY-OTC", "GBPNZD-OTC",
    "GBPUSD-OTC", "NZDCAD-OTC", "NZDJPY-OTC", "USDBRL-OTC", "USDCAD-OTC",
    "USDCHF-OTC",
];

pub const CRYPTO: &[&str] = &["BTCUSD", "DOGEUSD-L", "TRXUSD"];

pub const CRYPTO_OTC: &[&str] = &["BTCUSD-OTC-op", "TRXUSD-L"];

// Gold.
pub const COMMODITIES: &[&str] = &["XAUUSD"];

pub const COMMODITIES_OTC: &[&str] = &["XAUUSD-OTC"];

pub const EQUITIES: &[&str] = &[
    "AMAZON", "APPLE", "COKE", "GOOGLE", "FACEBOOK",
    "MCDON", "NIKE", "SNAP", "TESLA",
];

// Facebook trades as FB on the OTC market.
pub const EQUITIES_OTC: &[&str] = &[
    "AMAZON-OTC", "APPLE-OTC", "COKE-OTC", "GOOGLE-OTC", "FB-OTC",
    "MCDON-OTC", "NIKE-OTC", "SNAP-OTC", "TESLA-OTC",
];

const GROUPS: [AllowGroup; 8] = [
    AllowGroup { category: Category::Forex, market: Market::Open, names: FOREX },
    AllowGroup { category: Category::Forex, market: Market::Otc, names: FOREX_OTC },
    AllowGroup { category: Category::Crypto, market: Market::Open, names: CRYPTO },
    AllowGroup { category: Category::Crypto, market: Market::Otc, names: CRYPTO_OTC },
    AllowGroup { category: Category::Commodity, market: Market::Open, names: COMMODITIES },
    AllowGroup { category: Category::Commodity, market: Market::Otc, names: COMMODITIES_OTC },
    AllowGroup { category: Category::Equity, market: Market::Open, names: EQUITIES },
    AllowGroup { category: Category::Equity, market: Market::Otc, names: EQUITIES_OTC },
];

/// All partitions in declaration order.
pub fn groups() -> &'static [AllowGroup] {
    &GROUPS
}

/// Whether `name` may be offered to the user. Matching is exact and case-sensitive.
pub fn is_allowed(name: &str) -> bool {
    GROUPS.iter().any(|g| g.names.contains(&name))
}

/// Total number of allowed instrument names.
pub fn len() -> usize {
    GROUPS.iter().map(|g| g.names.len()).sum()
}
