//! Strategy registry, performance weighting and consensus.

use super::Strategy;
use dexbot_domain::TradingError;
use dexbot_domain::entities::{Decision, MarketData, Signal};
use dexbot_domain::enums::{Action, Direction};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Configuration for the strategy manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Stop distance from the reference price as a fraction.
    pub stop_loss_pct: Decimal,
    /// Target distance from the reference price as a fraction.
    pub take_profit_pct: Decimal,
    /// Returns remembered per strategy.
    pub history_len: usize,
    /// Evaluation cycle period.
    pub interval_ms: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: Decimal::new(5, 2),    // 5%
            take_profit_pct: Decimal::new(10, 2), // 10%
            history_len: 200,
            interval_ms: 60_000,
        }
    }
}

/// Added to the deviation so a flat history does not divide by zero.
const WEIGHT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Registered strategies plus a bounded return history for each.
pub struct StrategyManager {
    config: StrategyConfig,
    strategies: RwLock<Vec<Arc<dyn Strategy>>>,
    returns: RwLock<HashMap<String, VecDeque<Decimal>>>,
}

impl StrategyManager {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            strategies: RwLock::new(Vec::new()),
            returns: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Registers a strategy. Ids must be unique.
    pub async fn register(&self, strategy: Arc<dyn Strategy>) -> Result<(), TradingError> {
        let mut strategies = self.strategies.write().await;
        if strategies.iter().any(|s| s.id() == strategy.id()) {
            return Err(TradingError::Config(format!(
                "strategy {} is already registered",
                strategy.id()
            )));
        }
        debug!(strategy = strategy.id(), "Strategy registered");
        strategies.push(strategy);
        Ok(())
    }

    pub async fn strategy_ids(&self) -> Vec<String> {
        self.strategies
            .read()
            .await
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }

    /// Runs every strategy. A failing strategy only loses its own signal.
    pub async fn evaluate_all(&self, market: &MarketData) -> Vec<Signal> {
        let strategies = self.strategies.read().await.clone();
        let mut signals = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            match strategy.evaluate(market).await {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(e) => warn!(
                    strategy = strategy.id(),
                    error = %e,
                    code = e.code(),
                    "Strategy evaluation failed, signal excluded"
                ),
            }
        }
        signals
    }

    /// Current weight of every registered strategy.
    pub async fn weights(&self) -> HashMap<String, Decimal> {
        let ids = self.strategy_ids().await;
        let returns = self.returns.read().await;
        let n = Decimal::from(ids.len().max(1));
        ids.into_iter()
            .map(|id| {
                let weight = match returns.get(&id) {
                    Some(history) if !history.is_empty() => performance_weight(history),
                    _ => Decimal::ONE / n,
                };
                (id, weight)
            })
            .collect()
    }

    /// Evaluates all strategies and folds their signals into one decision.
    pub async fn generate_decision(&self, market: &MarketData) -> Option<Decision> {
        let signals = self.evaluate_all(market).await;
        if signals.is_empty() {
            return None;
        }
        let weights = self.weights().await;
        let decision = aggregate(&signals, &weights, &self.config);
        if decision.is_none() {
            debug!(signals = signals.len(), "Signals cancelled out, no decision");
        }
        decision
    }

    /// Appends one realized return to the strategy's history.
    pub async fn update_performance(&self, strategy_id: &str, return_pct: Decimal) {
        let mut returns = self.returns.write().await;
        let history = returns.entry(strategy_id.to_string()).or_default();
        history.push_back(return_pct);
        while history.len() > self.config.history_len {
            history.pop_front();
        }
    }

    pub async fn history(&self, strategy_id: &str) -> Vec<Decimal> {
        self.returns
            .read()
            .await
            .get(strategy_id)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// `max(0, mean / (population stddev + 1e-6))`.
pub fn performance_weight<'a>(returns: impl IntoIterator<Item = &'a Decimal>) -> Decimal {
    let values: Vec<Decimal> = returns.into_iter().copied().collect();
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let n = Decimal::from(values.len());
    let mean = values.iter().sum::<Decimal>() / n;
    let variance = values
        .iter()
        .map(|v| (*v - mean) * (*v - mean))
        .sum::<Decimal>()
        / n;
    let deviation = variance.sqrt().unwrap_or(Decimal::ZERO);
    (mean / (deviation + WEIGHT_EPSILON)).max(Decimal::ZERO)
}

/// Weighted vote over one cycle's signals.
///
/// The side with the larger `confidence * weight` sum wins; equal sums give
/// no decision. Strategies missing from `weights` count as zero.
pub fn aggregate(
    signals: &[Signal],
    weights: &HashMap<String, Decimal>,
    config: &StrategyConfig,
) -> Option<Decision> {
    let weight_of = |s: &Signal| weights.get(&s.strategy_id).copied().unwrap_or_default();
    let score = |direction: Direction| -> Decimal {
        signals
            .iter()
            .filter(|s| s.direction == direction)
            .map(|s| s.confidence * weight_of(s))
            .sum()
    };

    let buy = score(Direction::Buy);
    let sell = score(Direction::Sell);
    let direction = match buy.cmp(&sell) {
        std::cmp::Ordering::Greater => Direction::Buy,
        std::cmp::Ordering::Less => Direction::Sell,
        std::cmp::Ordering::Equal => return None,
    };

    let winners: Vec<Signal> = signals
        .iter()
        .filter(|s| s.direction == direction)
        .cloned()
        .collect();
    let size: Decimal = winners.iter().map(|s| s.size * weight_of(s)).sum();
    let confidence = winners
        .iter()
        .map(|s| s.confidence * weight_of(s))
        .max()
        .unwrap_or_default()
        .clamp(Decimal::ZERO, Decimal::ONE);

    let total: Decimal = winners.iter().map(|s| s.confidence * weight_of(s)).sum();
    let reference_price = if total.is_zero() {
        winners.iter().map(|s| s.price).sum::<Decimal>() / Decimal::from(winners.len())
    } else {
        winners
            .iter()
            .map(|s| s.price * s.confidence * weight_of(s))
            .sum::<Decimal>()
            / total
    };

    let action = Action::from(direction);
    let (stop_loss, take_profit) = Decision::levels(
        action,
        reference_price,
        config.stop_loss_pct,
        config.take_profit_pct,
    );
    Some(Decision::new(
        action,
        size,
        confidence,
        reference_price,
        stop_loss,
        take_profit,
        winners,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct Fixed {
        id: String,
        outcome: Result<Option<(Direction, Decimal)>, TradingError>,
    }

    #[async_trait]
    impl Strategy for Fixed {
        fn id(&self) -> &str {
            &self.id
        }

        fn requested_size(&self) -> Decimal {
            dec!(0.1)
        }

        async fn confidence(
            &self,
            _market: &MarketData,
        ) -> Result<Option<(Direction, Decimal)>, TradingError> {
            self.outcome.clone()
        }
    }

    fn fixed(id: &str, direction: Direction, confidence: Decimal) -> Arc<dyn Strategy> {
        Arc::new(Fixed {
            id: id.to_string(),
            outcome: Ok(Some((direction, confidence))),
        })
    }

    fn signal(id: &str, direction: Direction, confidence: Decimal, size: Decimal) -> Signal {
        Signal::new(id, direction, confidence, dec!(2000), size)
    }

    #[test]
    fn test_weighted_vote() {
        let signals = vec![
            signal("a", Direction::Buy, dec!(0.8), dec!(0.1)),
            signal("b", Direction::Sell, dec!(0.6), dec!(0.1)),
        ];
        let weights = HashMap::from([("a".to_string(), dec!(1.0)), ("b".to_string(), dec!(0.5))]);
        let decision = aggregate(&signals, &weights, &StrategyConfig::default()).unwrap();

        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.confidence, dec!(0.8));
        assert_eq!(decision.size, dec!(0.1));
        assert_eq!(decision.reference_price, dec!(2000));
        assert_eq!(decision.stop_loss, dec!(1900));
        assert_eq!(decision.take_profit, dec!(2200));
        assert_eq!(decision.strategy_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn test_tie_gives_no_decision() {
        let signals = vec![
            signal("a", Direction::Buy, dec!(0.6), dec!(0.1)),
            signal("b", Direction::Sell, dec!(0.6), dec!(0.1)),
        ];
        let weights = HashMap::from([("a".to_string(), dec!(0.5)), ("b".to_string(), dec!(0.5))]);
        assert!(aggregate(&signals, &weights, &StrategyConfig::default()).is_none());

        // unweighted signals score zero on both sides
        assert!(aggregate(&signals, &HashMap::new(), &StrategyConfig::default()).is_none());
    }

    #[test]
    fn test_performance_weight() {
        let steady = [dec!(0.01), dec!(0.02), dec!(0.03)];
        assert!(performance_weight(&steady) > dec!(2));

        let losing = [dec!(-0.02), dec!(-0.01), dec!(0.005)];
        assert_eq!(performance_weight(&losing), Decimal::ZERO);

        // flat history is bounded by the epsilon
        let flat = [dec!(0.01), dec!(0.01)];
        assert_eq!(performance_weight(&flat), dec!(10000));
    }

    #[tokio::test]
    async fn test_weights_default_to_uniform() {
        let manager = StrategyManager::new(StrategyConfig::default());
        manager.register(fixed("a", Direction::Buy, dec!(0.7))).await.unwrap();
        manager.register(fixed("b", Direction::Sell, dec!(0.7))).await.unwrap();
        manager.register(fixed("c", Direction::Buy, dec!(0.7))).await.unwrap();

        let weights = manager.weights().await;
        assert_eq!(weights["a"], Decimal::ONE / dec!(3));

        manager.update_performance("b", dec!(-0.05)).await;
        let weights = manager.weights().await;
        assert_eq!(weights["b"], Decimal::ZERO);
        assert!(weights.values().all(|w| *w >= Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let manager = StrategyManager::new(StrategyConfig::default());
        manager.register(fixed("a", Direction::Buy, dec!(0.7))).await.unwrap();
        let err = manager
            .register(fixed("a", Direction::Sell, dec!(0.7)))
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::Config(_)));
    }

    #[tokio::test]
    async fn test_failing_strategy_excluded() {
        let manager = StrategyManager::new(StrategyConfig::default());
        manager.register(fixed("good", Direction::Buy, dec!(0.9))).await.unwrap();
        manager
            .register(Arc::new(Fixed {
                id: "broken".to_string(),
                outcome: Err(TradingError::Model("score is NaN".into())),
            }))
            .await
            .unwrap();

        let market = MarketData::new("WETH/USDC", dec!(2000));
        let signals = manager.evaluate_all(&market).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].strategy_id, "good");

        let decision = manager.generate_decision(&market).await.unwrap();
        assert_eq!(decision.action, Action::Buy);
        // weight 1/2 for two registered strategies
        assert_eq!(decision.size, dec!(0.05));
        assert_eq!(decision.confidence, dec!(0.45));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let manager = StrategyManager::new(StrategyConfig {
            history_len: 3,
            ..Default::default()
        });
        for i in 0..5 {
            manager.update_performance("a", Decimal::from(i)).await;
        }
        assert_eq!(manager.history("a").await, vec![dec!(2), dec!(3), dec!(4)]);
    }

    #[tokio::test]
    async fn test_no_signals_no_decision() {
        let manager = StrategyManager::new(StrategyConfig::default());
        let market = MarketData::new("WETH/USDC", dec!(2000));
        assert!(manager.generate_decision(&market).await.is_none());
    }
}
