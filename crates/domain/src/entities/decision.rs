use super::signal::Signal;
use crate::enums::{Action, Side};
use crate::error::{Rejection, RejectionCode};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consensus trade decision. Risk rules derive new values from it; the
/// executor consumes it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub action: Action,
    /// Fraction of portfolio value.
    pub size: Decimal,
    pub confidence: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Price the stop and target were derived from.
    pub reference_price: Decimal,
    pub source_signals: Vec<Signal>,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        action: Action,
        size: Decimal,
        confidence: Decimal,
        reference_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        source_signals: Vec<Signal>,
    ) -> Self {
        Self {
            id: DecisionId::new(),
            action,
            size,
            confidence,
            stop_loss,
            take_profit,
            reference_price,
            source_signals,
            created_at: Utc::now(),
        }
    }

    /// Builds stop and target levels `stop_pct` / `target_pct` away from the
    /// reference price on the loss and profit side of `action`.
    pub fn levels(
        action: Action,
        price: Decimal,
        stop_pct: Decimal,
        target_pct: Decimal,
    ) -> (Decimal, Decimal) {
        match action.side() {
            Some(Side::Long) => (
                price * (Decimal::ONE - stop_pct),
                price * (Decimal::ONE + target_pct),
            ),
            Some(Side::Short) => (
                price * (Decimal::ONE + stop_pct),
                price * (Decimal::ONE - target_pct),
            ),
            None => (price, price),
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.action.side()
    }

    /// Absolute distance between reference price and stop.
    pub fn stop_distance(&self) -> Decimal {
        (self.reference_price - self.stop_loss).abs()
    }

    /// Moves the stop to `distance` from the reference price on the loss side.
    pub fn set_stop_distance(&mut self, distance: Decimal) {
        self.stop_loss = match self.side() {
            Some(Side::Long) => self.reference_price - distance,
            Some(Side::Short) => self.reference_price + distance,
            None => self.stop_loss,
        };
    }

    /// Notional value in quote units.
    pub fn notional(&self, portfolio_value: Decimal) -> Decimal {
        self.size * portfolio_value
    }

    /// Ids of strategies whose signals fed this decision.
    pub fn strategy_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .source_signals
            .iter()
            .map(|s| s.strategy_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Final gate applied before a decision may reach the executor.
    pub fn ensure_executable(&self, min_confidence: Decimal) -> Result<(), Rejection> {
        if self.action == Action::None {
            return Err(Rejection::new(RejectionCode::NoAction, "decision has no action"));
        }
        if self.size <= Decimal::ZERO {
            return Err(Rejection::new(
                RejectionCode::InvalidSize,
                format!("size must be positive, got {}", self.size),
            ));
        }
        if self.confidence < min_confidence {
            return Err(Rejection::new(
                RejectionCode::LowConfidence,
                format!(
                    "confidence {} below minimum {}",
                    self.confidence, min_confidence
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_levels_and_distance() {
        let (sl, tp) = Decision::levels(Action::Buy, dec!(2000), dec!(0.05), dec!(0.1));
        assert_eq!(sl, dec!(1900));
        assert_eq!(tp, dec!(2200));
        let d = Decision::new(Action::Buy, dec!(0.1), dec!(0.8), dec!(2000), sl, tp, vec![]);
        assert_eq!(d.stop_distance(), dec!(100));

        let (sl, tp) = Decision::levels(Action::Sell, dec!(100), dec!(0.02), dec!(0.04));
        assert_eq!(sl, dec!(102));
        assert_eq!(tp, dec!(96));
    }

    #[test]
    fn test_set_stop_distance_stays_on_loss_side() {
        let mut d = Decision::new(Action::Sell, dec!(0.1), dec!(0.9), dec!(100), dec!(102), dec!(96), vec![]);
        d.set_stop_distance(dec!(2.4));
        assert_eq!(d.stop_loss, dec!(102.4));
    }

    #[test]
    fn test_ensure_executable() {
        let ok = Decision::new(Action::Buy, dec!(0.1), dec!(0.8), dec!(1), dec!(0.9), dec!(1.1), vec![]);
        assert!(ok.ensure_executable(dec!(0.6)).is_ok());

        let weak = Decision { confidence: dec!(0.5), ..ok.clone() };
        assert_eq!(
            weak.ensure_executable(dec!(0.6)).unwrap_err().code,
            RejectionCode::LowConfidence
        );

        let empty = Decision { size: Decimal::ZERO, ..ok.clone() };
        assert_eq!(
            empty.ensure_executable(dec!(0.6)).unwrap_err().code,
            RejectionCode::InvalidSize
        );

        let idle = Decision { action: Action::None, ..ok };
        assert_eq!(
            idle.ensure_executable(dec!(0.6)).unwrap_err().code,
            RejectionCode::NoAction
        );
    }
}
