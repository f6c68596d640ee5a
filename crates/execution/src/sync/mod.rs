//! Chain event synchronization.
//!
//! Provides:
//! - Per-filter log polling with a remembered cursor
//! - Transport retries with fixed backoff
//! - Ordered delivery to a single handler

mod event_listener;

pub use event_listener::*;
