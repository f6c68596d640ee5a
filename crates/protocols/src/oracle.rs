//! Prediction oracle contract.

use async_trait::async_trait;
use dexbot_domain::TradingError;
use serde::{Deserialize, Serialize};

/// Opaque model scoring a feature vector. Positive scores lean buy.
#[async_trait]
pub trait PredictionOracle: Send + Sync {
    /// Score in [-1, 1].
    async fn score(&self, features: &[f64]) -> Result<f64, TradingError>;
}

/// Rejects NaN, infinite and out-of-range scores.
pub fn validate_score(score: f64) -> Result<f64, TradingError> {
    if !score.is_finite() {
        return Err(TradingError::Model(format!("non-finite score {score}")));
    }
    if !(-1.0..=1.0).contains(&score) {
        return Err(TradingError::Model(format!("score {score} outside [-1, 1]")));
    }
    Ok(score)
}

/// `tanh(w · x + b)`, used as a stand-in model in paper mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearOracle {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearOracle {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }
}

#[async_trait]
impl PredictionOracle for LinearOracle {
    async fn score(&self, features: &[f64]) -> Result<f64, TradingError> {
        if features.len() != self.weights.len() {
            return Err(TradingError::Model(format!(
                "expected {} features, got {}",
                self.weights.len(),
                features.len()
            )));
        }
        let z: f64 = self
            .weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        validate_score(z.tanh())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_score() {
        assert!(validate_score(0.3).is_ok());
        assert!(validate_score(-1.0).is_ok());
        assert!(matches!(validate_score(f64::NAN), Err(TradingError::Model(_))));
        assert!(matches!(validate_score(1.5), Err(TradingError::Model(_))));
    }

    #[tokio::test]
    async fn test_linear_oracle() {
        let oracle = LinearOracle::new(vec![1.0, -1.0], 0.0);
        let score = oracle.score(&[0.5, 0.5]).await.unwrap();
        assert_eq!(score, 0.0);
        assert!(oracle.score(&[1.0]).await.is_err());
    }
}
