use super::decision::DecisionId;
use super::position::PositionId;
use crate::enums::Side;
use crate::error::RejectionCode;
use crate::token::{Token, TokenAmount, TxHash};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a submitted swap does to the position book once it confirms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeIntent {
    /// Entry swap; opens a position on confirmation.
    Open {
        side: Side,
        stop_loss: Decimal,
        take_profit: Decimal,
        strategy_ids: Vec<String>,
    },
    /// Exit swap for a position already removed from the open set.
    Close { position_id: PositionId, pnl: Decimal },
}

/// A swap that was submitted and has no receipt yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub tx_id: TxHash,
    pub decision_ref: DecisionId,
    pub intent: TradeIntent,
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: TokenAmount,
    pub expected_amount_out: TokenAmount,
    pub min_amount_out: TokenAmount,
    pub nonce: u64,
    /// Chain timestamp after which the swap must not execute.
    pub deadline: u64,
    pub submitted_at: DateTime<Utc>,
}

impl PendingTransaction {
    /// Execution price in quote per base for the given output amount.
    pub fn execution_price(&self, amount_out: TokenAmount, side: Side) -> Option<Decimal> {
        let amount_in = self.token_in.from_raw(self.amount_in).ok()?;
        let amount_out = self.token_out.from_raw(amount_out).ok()?;
        // Longs spend quote for base, shorts spend base for quote.
        let (quote, base) = match side {
            Side::Long => (amount_in, amount_out),
            Side::Short => (amount_out, amount_in),
        };
        if base.is_zero() {
            return None;
        }
        Some(quote / base)
    }
}

/// Append-only record of a confirmed swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub tx_id: TxHash,
    pub decision_ref: DecisionId,
    pub amount_in: TokenAmount,
    pub amount_out: TokenAmount,
    pub gas_used: u64,
    pub confirmed_at: DateTime<Utc>,
    /// Realized PnL, set for closing trades.
    pub pnl: Option<Decimal>,
}

/// A decision that failed after it was approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFailure {
    pub tx_id: Option<TxHash>,
    pub decision_ref: DecisionId,
    pub code: RejectionCode,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl TradeFailure {
    pub fn new(
        tx_id: Option<TxHash>,
        decision_ref: DecisionId,
        code: RejectionCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tx_id,
            decision_ref,
            code,
            message: message.into(),
            failed_at: Utc::now(),
        }
    }
}
