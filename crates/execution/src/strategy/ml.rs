//! Strategy driven by an external prediction oracle.

use super::Strategy;
use async_trait::async_trait;
use dexbot_domain::TradingError;
use dexbot_domain::entities::MarketData;
use dexbot_domain::enums::Direction;
use dexbot_protocols::PredictionOracle;
use dexbot_protocols::oracle::validate_score;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for [`MlStrategy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub id: String,
    pub size: Decimal,
    /// Absolute score below which the strategy abstains.
    pub min_score: f64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            id: "ml".to_string(),
            size: Decimal::new(5, 2),
            min_score: 0.1,
        }
    }
}

/// Leans with the sign of the oracle score; confidence is its magnitude.
pub struct MlStrategy {
    config: MlConfig,
    oracle: Arc<dyn PredictionOracle>,
}

impl MlStrategy {
    pub fn new(config: MlConfig, oracle: Arc<dyn PredictionOracle>) -> Self {
        Self { config, oracle }
    }
}

#[async_trait]
impl Strategy for MlStrategy {
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
        let score = validate_score(self.oracle.score(&market.features).await?)?;
        if score.abs() < self.config.min_score {
            return Ok(None);
        }
        let direction = if score > 0.0 {
            Direction::Buy
        } else {
            Direction::Sell
        };
        let confidence = Decimal::try_from(score.abs())
            .map_err(|e| TradingError::Model(format!("unrepresentable score {score}: {e}")))?;
        Ok(Some((direction, confidence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexbot_protocols::LinearOracle;
    use rust_decimal_macros::dec;

    struct FixedOracle(f64);

    #[async_trait]
    impl PredictionOracle for FixedOracle {
        async fn score(&self, _features: &[f64]) -> Result<f64, TradingError> {
            Ok(self.0)
        }
    }

    fn market() -> MarketData {
        MarketData::new("WETH/USDC", dec!(2000)).with_features(vec![0.4, 0.1])
    }

    #[tokio::test]
    async fn test_score_sign_picks_direction() {
        let strategy = MlStrategy::new(MlConfig::default(), Arc::new(FixedOracle(-0.75)));
        let (direction, confidence) = strategy.confidence(&market()).await.unwrap().unwrap();
        assert_eq!(direction, Direction::Sell);
        assert_eq!(confidence, dec!(0.75));
    }

    #[tokio::test]
    async fn test_weak_score_abstains() {
        let strategy = MlStrategy::new(MlConfig::default(), Arc::new(FixedOracle(0.05)));
        assert!(strategy.evaluate(&market()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_score_is_model_error() {
        let strategy = MlStrategy::new(MlConfig::default(), Arc::new(FixedOracle(f64::NAN)));
        let err = strategy.evaluate(&market()).await.unwrap_err();
        assert!(matches!(err, TradingError::Model(_)));

        // feature count mismatch surfaces from the oracle
        let strategy = MlStrategy::new(
            MlConfig::default(),
            Arc::new(LinearOracle::new(vec![1.0], 0.0)),
        );
        assert!(matches!(
            strategy.evaluate(&market()).await,
            Err(TradingError::Model(_))
        ));
    }
}
