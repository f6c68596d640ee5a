//! Domain model for the trading engine.
//!
//! Pure data types shared by every other crate:
//! - Signals, decisions, positions and trade records
//! - Tokens, trading pairs and raw on-chain amounts
//! - The error taxonomy and stable rejection codes
//! - The storage port implemented by persistence adapters

/// Entities produced and consumed by the engine.
pub mod entities;
/// Enumerations shared by entities.
pub mod enums;
/// Error taxonomy and rejection codes.
pub mod error;
/// AMM math.
pub mod math;
/// Persistence port.
pub mod ports;
/// Tokens, pairs and amounts.
pub mod token;

pub use error::{Rejection, RejectionCode, TradingError};
pub use token::{Address, Token, TokenAmount, TradingPair, TxHash};
