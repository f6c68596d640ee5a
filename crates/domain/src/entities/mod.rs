pub mod decision;
pub mod event;
pub mod market;
pub mod position;
pub mod signal;
pub mod trade;

// Re-export for easier access
pub use decision::{Decision, DecisionId};
pub use event::EventRecord;
pub use market::{IndicatorSnapshot, MarketData};
pub use position::{ClosedPosition, Position, PositionId};
pub use signal::Signal;
pub use trade::{ExecutedTrade, PendingTransaction, TradeFailure, TradeIntent};
