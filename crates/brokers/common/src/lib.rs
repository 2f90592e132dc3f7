//! Upstream adapters shared by the API server and its tests.

pub mod simulated;

pub use simulated::{CandleFailure, SimulatedClient, SimulatedConfig, SimulatedConnector};
