//! Persistence port.
//!
//! Every state transition goes through [`TradeStore`] before the engine
//! reports it, so a restart can rebuild the pending set and position book.

use crate::entities::{
    ClosedPosition, DecisionId, ExecutedTrade, PendingTransaction, Position, PositionId,
    TradeFailure,
};
use crate::error::TradingError;
use crate::token::TxHash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Durable storage for trading state.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Persists a submitted transaction.
    async fn save_pending(&self, pending: &PendingTransaction) -> Result<(), TradingError>;

    /// Removes a pending transaction once it has resolved.
    async fn remove_pending(&self, tx_id: TxHash) -> Result<(), TradingError>;

    /// Loads every unresolved transaction.
    async fn load_pending(&self) -> Result<Vec<PendingTransaction>, TradingError>;

    /// Whether a decision has already been submitted.
    async fn decision_seen(&self, decision_id: DecisionId) -> Result<bool, TradingError>;

    /// Appends a confirmed trade.
    async fn append_trade(&self, trade: &ExecutedTrade) -> Result<(), TradingError>;

    /// Records a failed decision.
    async fn record_failure(&self, failure: &TradeFailure) -> Result<(), TradingError>;

    /// Upserts an open position.
    async fn save_position(&self, position: &Position) -> Result<(), TradingError>;

    /// Loads open positions.
    async fn load_positions(&self) -> Result<Vec<Position>, TradingError>;

    /// Moves a position from the open set to the closed history.
    async fn save_closed_position(&self, closed: &ClosedPosition) -> Result<(), TradingError>;

    /// Deletes an open position without closing it.
    async fn remove_position(&self, position_id: PositionId) -> Result<(), TradingError>;

    /// Appends one realized return to a strategy's history.
    async fn append_return(
        &self,
        strategy_id: &str,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), TradingError>;

    /// The latest `limit` returns of a strategy, oldest first.
    async fn load_returns(
        &self,
        strategy_id: &str,
        limit: usize,
    ) -> Result<Vec<Decimal>, TradingError>;
}
