//! Exnova broker adapter.
//!
//! Logs in over HTTPS to obtain a session id, then talks to the trading
//! WebSocket using the broker's `{name, request_id, msg}` JSON frames.

pub mod client;
pub mod config;
pub mod protocol;

pub use client::{ExnovaClient, ExnovaConnector};
pub use config::ExnovaConfig;
