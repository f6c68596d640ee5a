//! MACD crossover and RSI band strategies.

use super::{Strategy, strength};
use async_trait::async_trait;
use dexbot_domain::TradingError;
use dexbot_domain::entities::MarketData;
use dexbot_domain::enums::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for [`MacdStrategy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdConfig {
    pub id: String,
    pub size: Decimal,
    /// Histogram magnitude that maps to full confidence.
    pub histogram_scale: Decimal,
}

impl Default for MacdConfig {
    fn default() -> Self {
        Self {
            id: "macd".to_string(),
            size: Decimal::new(5, 2),
            histogram_scale: Decimal::new(1, 2),
        }
    }
}

/// Buys while the MACD line is above its signal line.
pub struct MacdStrategy {
    config: MacdConfig,
}

impl MacdStrategy {
    pub fn new(config: MacdConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Strategy for MacdStrategy {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn requested_size(&self) -> Decimal {
        self.config.size
    }

    async fn confidence(
        &self,
        market: &MarketData,
    ) -> Result<Option<(Direction, Decimal)>, TradingError> {
        let (Some(macd), Some(signal)) = (market.indicators.macd, market.indicators.macd_signal)
        else {
            return Ok(None);
        };
        let histogram = macd - signal;
        if histogram.is_zero() {
            return Ok(None);
        }
        let direction = if histogram > Decimal::ZERO {
            Direction::Buy
        } else {
            Direction::Sell
        };
        Ok(Some((
            direction,
            strength(histogram, self.config.histogram_scale),
        )))
    }
}

/// Configuration for [`RsiStrategy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiConfig {
    pub id: String,
    pub size: Decimal,
    pub oversold: Decimal,
    pub overbought: Decimal,
    /// Multiplier applied to strength outside the bands.
    pub extreme_boost: Decimal,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            id: "rsi".to_string(),
            size: Decimal::new(5, 2),
            oversold: Decimal::from(30),
            overbought: Decimal::from(70),
            extreme_boost: Decimal::new(12, 1),
        }
    }
}

/// Mean reversion at the RSI extremes: buys oversold, sells overbought.
pub struct RsiStrategy {
    config: RsiConfig,
}

impl RsiStrategy {
    pub fn new(config: RsiConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Strategy for RsiStrategy {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn requested_size(&self) -> Decimal {
        self.config.size
    }

    async fn confidence(
        &self,
        market: &MarketData,
    ) -> Result<Option<(Direction, Decimal)>, TradingError> {
        let Some(rsi) = market.indicators.rsi else {
            return Ok(None);
        };
        if !(Decimal::ZERO..=Decimal::ONE_HUNDRED).contains(&rsi) {
            return Err(TradingError::Validation(format!(
                "rsi must be within [0, 100], got {rsi}"
            )));
        }
        let direction = if rsi < self.config.oversold {
            Direction::Buy
        } else if rsi > self.config.overbought {
            Direction::Sell
        } else {
            return Ok(None);
        };
        let midpoint = Decimal::from(50);
        let base = (rsi - midpoint).abs() / midpoint;
        let confidence = (base * self.config.extreme_boost).min(Decimal::ONE);
        Ok(Some((direction, confidence)))
    }
}
