//! Strategy evaluation and signal aggregation.
//!
//! Provides:
//! - The [`Strategy`] capability and the four concrete strategies
//! - The strategy manager that weights strategies by realized performance
//!   and folds their signals into one decision

mod manager;
mod ml;
mod oscillators;
mod trend;

pub use manager::*;
pub use ml::*;
pub use oscillators::*;
pub use trend::*;

use async_trait::async_trait;
use dexbot_domain::TradingError;
use dexbot_domain::entities::{MarketData, Signal};
use dexbot_domain::enums::Direction;
use dexbot_protocols::PredictionOracle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A signal source evaluated once per cycle.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable id used for weighting and attribution.
    fn id(&self) -> &str;

    /// Requested position size as a fraction of portfolio value.
    fn requested_size(&self) -> Decimal;

    /// Direction and confidence in [0, 1], or `None` to abstain.
    async fn confidence(
        &self,
        market: &MarketData,
    ) -> Result<Option<(Direction, Decimal)>, TradingError>;

    /// Signal for this cycle, or `None` to abstain.
    async fn evaluate(&self, market: &MarketData) -> Result<Option<Signal>, TradingError> {
        Ok(self.confidence(market).await?.map(|(direction, confidence)| {
            Signal::new(
                self.id(),
                direction,
                confidence,
                market.price,
                self.requested_size(),
            )
            .with_indicators(market.indicators.clone())
        }))
    }
}

/// Strategy definition as found in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    Trend(TrendConfig),
    Macd(MacdConfig),
    Rsi(RsiConfig),
    Ml(MlConfig),
}

impl StrategySpec {
    /// Builds the strategy. ML strategies need an oracle.
    pub fn build(
        &self,
        oracle: Option<Arc<dyn PredictionOracle>>,
    ) -> Result<Arc<dyn Strategy>, TradingError> {
        Ok(match self {
            Self::Trend(config) => Arc::new(TrendStrategy::new(config.clone())),
            Self::Macd(config) => Arc::new(MacdStrategy::new(config.clone())),
            Self::Rsi(config) => Arc::new(RsiStrategy::new(config.clone())),
            Self::Ml(config) => {
                let oracle = oracle.ok_or_else(|| {
                    TradingError::Config(format!("strategy {} needs a prediction oracle", config.id))
                })?;
                Arc::new(MlStrategy::new(config.clone(), oracle))
            }
        })
    }
}

/// Clamps `value / scale` into [0, 1].
pub(crate) fn strength(value: Decimal, scale: Decimal) -> Decimal {
    if scale <= Decimal::ZERO {
        return Decimal::ONE;
    }
    (value.abs() / scale).min(Decimal::ONE)
}
