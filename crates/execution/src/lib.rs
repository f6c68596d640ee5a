//! Trading engine core.
//!
//! This crate provides the decision and execution pipeline:
//! - Strategy evaluation and performance-weighted consensus
//! - Risk rule pipeline with a hard deadline
//! - Open position tracking with stop-loss and take-profit
//! - Swap submission, nonce discipline and confirmation
//! - Chain log polling and price ticks
//! - Circuit breaker and performance tracking

/// Prelude module for convenient imports.
pub mod prelude;

/// Engine configuration.
pub mod config;
/// Emergency controls and circuit breaker.
pub mod emergency;
/// The engine context.
pub mod engine;
/// Trade execution.
pub mod executor;
/// Position lifecycle tracking.
pub mod lifecycle;
/// Open position tracking.
pub mod position;
/// Risk pipeline.
pub mod risk;
/// Scheduler for the periodic loops.
pub mod scheduler;
/// In-memory trade store.
pub mod store;
/// Strategy evaluation.
pub mod strategy;
/// Chain event synchronization.
pub mod sync;
