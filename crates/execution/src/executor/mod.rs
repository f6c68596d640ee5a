//! Trade execution.
//!
//! Provides:
//! - [`TradeExecutor`]: quote, approval, swap submission and confirmation
//! - [`NonceManager`]: the serialized nonce sequence of the signing account
//! - [`PendingBook`]: claimed decisions and in-flight transactions

mod nonce;
mod pending;
mod trade_executor;

pub use nonce::*;
pub use pending::*;
pub use trade_executor::*;
