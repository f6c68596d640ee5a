//! Risk engine.
//!
//! Ordered pipeline of rules that bound and adjust a decision before it may
//! reach the trade executor:
//! - Confidence floor and size cap
//! - Volatility damping
//! - Open position and exposure limits
//! - Custom rules from configuration

mod engine;
mod rules;

pub use engine::*;
pub use rules::*;
