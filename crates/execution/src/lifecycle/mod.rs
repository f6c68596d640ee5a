//! Position lifecycle tracking.
//!
//! Tracks what happens to positions after entry:
//! - Lifecycle events broadcast by the position manager
//! - Realized performance per strategy and overall

mod events;
mod tracker;

pub use events::*;
pub use tracker::*;
