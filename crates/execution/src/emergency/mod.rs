//! Emergency controls.
//!
//! The circuit breaker halts new executions after consecutive failed trades
//! or when realized losses pass a threshold.

mod circuit_breaker;

pub use circuit_breaker::*;
