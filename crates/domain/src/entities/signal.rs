use super::market::IndicatorSnapshot;
use crate::enums::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One strategy's opinion for one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Confidence in [0, 1].
    pub confidence: Decimal,
    /// Price observed when the signal was produced.
    pub price: Decimal,
    /// Requested position size as a fraction of portfolio value.
    pub size: Decimal,
    pub indicators: IndicatorSnapshot,
}

impl Signal {
    pub fn new(
        strategy_id: impl Into<String>,
        direction: Direction,
        confidence: Decimal,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            timestamp: Utc::now(),
            direction,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            price,
            size,
            indicators: IndicatorSnapshot::default(),
        }
    }

    #[must_use]
    pub fn with_indicators(mut self, indicators: IndicatorSnapshot) -> Self {
        self.indicators = indicators;
        self
    }
}
