use crate::enums::{CloseReason, PositionStatus, Side};
use crate::error::TradingError;
use crate::token::TxHash;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub Uuid);

impl PositionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open position. Stop is always on the loss side of entry, target on the
/// profit side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub side: Side,
    pub entry_price: Decimal,
    /// Size in base units.
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Strategies credited with the outcome.
    pub strategy_ids: Vec<String>,
    pub entry_tx: Option<TxHash>,
}

impl Position {
    /// Creates a position, rejecting stops and targets on the wrong side.
    pub fn new(
        side: Side,
        entry_price: Decimal,
        size: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<Self, TradingError> {
        if entry_price <= Decimal::ZERO || size <= Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "entry price and size must be positive (entry {entry_price}, size {size})"
            )));
        }
        let well_placed = match side {
            Side::Long => stop_loss < entry_price && take_profit > entry_price,
            Side::Short => stop_loss > entry_price && take_profit < entry_price,
        };
        if !well_placed {
            return Err(TradingError::Validation(format!(
                "{side:?} position at {entry_price} needs stop on loss side and target on profit side (stop {stop_loss}, target {take_profit})"
            )));
        }
        Ok(Self {
            id: PositionId::new(),
            side,
            entry_price,
            size,
            stop_loss,
            take_profit,
            opened_at: Utc::now(),
            strategy_ids: Vec::new(),
            entry_tx: None,
        })
    }

    #[must_use]
    pub fn with_strategies(mut self, strategy_ids: Vec<String>) -> Self {
        self.strategy_ids = strategy_ids;
        self
    }

    #[must_use]
    pub fn with_entry_tx(mut self, tx: TxHash) -> Self {
        self.entry_tx = Some(tx);
        self
    }

    /// Entry notional in quote units.
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.size
    }

    /// PnL if closed at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.size * self.side.sign()
    }

    /// Exit condition hit by `price`, if any. Stop wins over target on gaps.
    pub fn exit_trigger(&self, price: Decimal) -> Option<CloseReason> {
        let (stopped, target) = match self.side {
            Side::Long => (price <= self.stop_loss, price >= self.take_profit),
            Side::Short => (price >= self.stop_loss, price <= self.take_profit),
        };
        if stopped {
            Some(CloseReason::StopLoss)
        } else if target {
            Some(CloseReason::TakeProfit)
        } else {
            None
        }
    }

    /// Closes the position at `price`.
    pub fn close(self, price: Decimal, reason: CloseReason) -> ClosedPosition {
        let pnl = self.pnl_at(price);
        let notional = self.notional();
        let return_pct = if notional.is_zero() {
            Decimal::ZERO
        } else {
            pnl / notional
        };
        ClosedPosition {
            position: self,
            exit_price: price,
            exit_time: Utc::now(),
            pnl,
            return_pct,
            reason,
        }
    }
}

/// Record emitted once per closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub pnl: Decimal,
    /// PnL relative to entry notional.
    pub return_pct: Decimal,
    pub reason: CloseReason,
}

impl ClosedPosition {
    pub fn status(&self) -> PositionStatus {
        self.reason.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rejects_misplaced_levels() {
        assert!(Position::new(Side::Long, dec!(2000), dec!(1), dec!(2100), dec!(2200)).is_err());
        assert!(Position::new(Side::Short, dec!(2000), dec!(1), dec!(1900), dec!(1800)).is_err());
        assert!(Position::new(Side::Short, dec!(2000), dec!(1), dec!(2100), dec!(1800)).is_ok());
    }

    #[test]
    fn test_long_stop_out() {
        let p = Position::new(Side::Long, dec!(2000), dec!(0.5), dec!(1900), dec!(2200)).unwrap();
        assert_eq!(p.exit_trigger(dec!(1950)), None);
        assert_eq!(p.exit_trigger(dec!(1890)), Some(CloseReason::StopLoss));

        let closed = p.close(dec!(1890), CloseReason::StopLoss);
        assert_eq!(closed.pnl, (dec!(1890) - dec!(2000)) * dec!(0.5));
        assert_eq!(closed.status(), PositionStatus::StoppedOut);
        assert_eq!(closed.return_pct, dec!(-0.055));
    }

    #[test]
    fn test_short_take_profit() {
        let p = Position::new(Side::Short, dec!(100), dec!(2), dec!(105), dec!(90)).unwrap();
        assert_eq!(p.exit_trigger(dec!(89)), Some(CloseReason::TakeProfit));
        assert_eq!(p.pnl_at(dec!(89)), dec!(22));
    }

    #[test]
    fn test_stop_wins_on_gap() {
        // Degenerate levels that overlap can only be built directly.
        let mut p = Position::new(Side::Long, dec!(100), dec!(1), dec!(95), dec!(110)).unwrap();
        p.take_profit = dec!(90);
        assert_eq!(p.exit_trigger(dec!(90)), Some(CloseReason::StopLoss));
    }
}
