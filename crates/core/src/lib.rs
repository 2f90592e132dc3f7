pub mod allowlist;
pub mod models;
pub mod pairs;
pub mod traits;

pub use models::*;
pub use pairs::{clean_name, open_pairs, SnapshotError};
pub use traits::*;
