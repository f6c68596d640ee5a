//! Open position tracking.
//!
//! The position manager owns the open set exclusively:
//! - Stop-loss and take-profit evaluation on every tick
//! - Idempotent manual close
//! - Exposure snapshot shared with the risk engine

mod exposure;
mod manager;

pub use exposure::*;
pub use manager::*;
