//! Moving-average trend following.

use super::{Strategy, strength};
use async_trait::async_trait;
use dexbot_domain::TradingError;
use dexbot_domain::entities::MarketData;
use dexbot_domain::enums::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for [`TrendStrategy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub id: String,
    /// Requested size as a fraction of portfolio value.
    pub size: Decimal,
    /// Relative spread between the averages below which the strategy abstains.
    pub min_spread: Decimal,
    /// Relative spread that maps to full confidence.
    pub full_confidence_spread: Decimal,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            id: "trend".to_string(),
            size: Decimal::new(5, 2),                   // 5%
            min_spread: Decimal::new(1, 3),             // 0.1%
            full_confidence_spread: Decimal::new(2, 2), // 2%
        }
    }
}

/// Buys when the fast average is above the slow one, sells when below.
pub struct TrendStrategy {
    config: TrendConfig,
}

impl TrendStrategy {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Strategy for TrendStrategy {
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
        let (Some(fast), Some(slow)) = (market.indicators.sma_fast, market.indicators.sma_slow)
        else {
            return Ok(None);
        };
        if slow <= Decimal::ZERO {
            return Err(TradingError::Validation(format!(
                "slow moving average must be positive, got {slow}"
            )));
        }
        let spread = (fast - slow) / slow;
        if spread.abs() < self.config.min_spread {
            return Ok(None);
        }
        let direction = if spread > Decimal::ZERO {
            Direction::Buy
        } else {
            Direction::Sell
        };
        Ok(Some((
            direction,
            strength(spread, self.config.full_confidence_spread),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexbot_domain::entities::IndicatorSnapshot;
    use rust_decimal_macros::dec;

    fn market(fast: Decimal, slow: Decimal) -> MarketData {
        MarketData::new("WETH/USDC", dec!(2000)).with_indicators(IndicatorSnapshot {
            sma_fast: Some(fast),
            sma_slow: Some(slow),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_trend_directions() {
        let strategy = TrendStrategy::new(TrendConfig::default());

        let (direction, confidence) = strategy
            .confidence(&market(dec!(2020), dec!(2000)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(direction, Direction::Buy);
        assert_eq!(confidence, dec!(0.5));

        let (direction, confidence) = strategy
            .confidence(&market(dec!(1900), dec!(2000)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(direction, Direction::Sell);
        assert_eq!(confidence, dec!(1));
    }

    #[tokio::test]
    async fn test_abstains_on_flat_or_missing_averages() {
        let strategy = TrendStrategy::new(TrendConfig::default());
        assert!(
            strategy
                .confidence(&market(dec!(2000.5), dec!(2000)))
                .await
                .unwrap()
                .is_none()
        );

        let bare = MarketData::new("WETH/USDC", dec!(2000));
        assert!(strategy.evaluate(&bare).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evaluate_builds_signal() {
        let strategy = TrendStrategy::new(TrendConfig::default());
        let signal = strategy
            .evaluate(&market(dec!(2040), dec!(2000)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.strategy_id, "trend");
        assert_eq!(signal.price, dec!(2000));
        assert_eq!(signal.size, dec!(0.05));
        assert_eq!(signal.indicators.sma_fast, Some(dec!(2040)));
    }
}
