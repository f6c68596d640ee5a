//! Engine configuration.

use crate::emergency::CircuitBreakerConfig;
use crate::executor::ExecutorConfig;
use crate::position::PositionManagerConfig;
use crate::risk::RiskConfig;
use crate::strategy::{StrategyConfig, StrategySpec};
use crate::sync::EventListenerConfig;
use dexbot_domain::TradingError;
use dexbot_protocols::RetryPolicy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest accepted slippage tolerance, 10%.
pub const MAX_SLIPPAGE_BPS: u16 = 1_000;

/// Every setting the engine reads at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Portfolio value in quote units; decision sizes are fractions of it.
    pub portfolio_value: Decimal,
    pub strategy: StrategyConfig,
    /// Strategies registered at startup.
    pub strategies: Vec<StrategySpec>,
    pub risk: RiskConfig,
    pub executor: ExecutorConfig,
    pub listener: EventListenerConfig,
    pub position: PositionManagerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Event keys remembered for deduplication.
    pub dedup_window: usize,
    /// Submit the unwinding swap when a position closes.
    pub exit_on_close: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            portfolio_value: Decimal::from(10_000),
            strategy: StrategyConfig::default(),
            strategies: Vec::new(),
            risk: RiskConfig::default(),
            executor: ExecutorConfig::default(),
            listener: EventListenerConfig::default(),
            position: PositionManagerConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            dedup_window: 4_096,
            exit_on_close: true,
        }
    }
}

impl EngineConfig {
    /// Rejects out-of-range values.
    pub fn validate(&self) -> Result<(), TradingError> {
        positive("portfolio_value", self.portfolio_value)?;

        let risk = &self.risk;
        fraction("risk.max_position_size", risk.max_position_size)?;
        fraction("risk.max_exposure", risk.max_exposure)?;
        fraction("risk.volatility_size_factor", risk.volatility_size_factor)?;
        positive("risk.volatility_threshold", risk.volatility_threshold)?;
        if risk.stop_widen_factor < Decimal::ONE {
            return Err(invalid(format!(
                "risk.stop_widen_factor must be at least 1, got {}",
                risk.stop_widen_factor
            )));
        }
        if !(Decimal::ZERO..=Decimal::ONE).contains(&risk.min_confidence) {
            return Err(invalid(format!(
                "risk.min_confidence must be within [0, 1], got {}",
                risk.min_confidence
            )));
        }
        self.check_confidence_floor(self.strategies.len())?;
        nonzero("risk.max_open_positions", risk.max_open_positions as u64)?;
        nonzero("risk.timeout_ms", risk.timeout_ms)?;

        let strategy = &self.strategy;
        fraction("strategy.stop_loss_pct", strategy.stop_loss_pct)?;
        if strategy.stop_loss_pct == Decimal::ONE {
            return Err(invalid("strategy.stop_loss_pct must be below 1".into()));
        }
        positive("strategy.take_profit_pct", strategy.take_profit_pct)?;
        nonzero("strategy.history_len", strategy.history_len as u64)?;
        nonzero("strategy.interval_ms", strategy.interval_ms)?;

        let executor = &self.executor;
        if executor.max_slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(invalid(format!(
                "executor.max_slippage_bps must be at most {MAX_SLIPPAGE_BPS}, got {}",
                executor.max_slippage_bps
            )));
        }
        nonzero("executor.deadline_secs", executor.deadline_secs)?;
        nonzero("executor.confirm_interval_ms", executor.confirm_interval_ms)?;
        retry("executor.retry", &executor.retry)?;

        nonzero("listener.poll_interval_ms", self.listener.poll_interval_ms)?;
        retry("listener.retry", &self.listener.retry)?;

        nonzero("circuit_breaker.max_failures", u64::from(self.circuit_breaker.max_failures))?;
        nonzero("dedup_window", self.dedup_window as u64)?;
        Ok(())
    }

    /// Strategies without history weigh 1/N each, so a unanimous signal of
    /// full confidence from `strategies` of them reaches exactly 1/N.
    /// Rejects floors above that.
    pub fn check_confidence_floor(&self, strategies: usize) -> Result<(), TradingError> {
        if strategies == 0 {
            return Ok(());
        }
        let reachable = Decimal::ONE / Decimal::from(strategies);
        if self.risk.min_confidence > reachable {
            return Err(invalid(format!(
                "risk.min_confidence {} is unreachable with {strategies} strategies without history, maximum is {reachable}",
                self.risk.min_confidence
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> TradingError {
    TradingError::Validation(message)
}

fn positive(name: &str, value: Decimal) -> Result<(), TradingError> {
    if value <= Decimal::ZERO {
        return Err(invalid(format!("{name} must be positive, got {value}")));
    }
    Ok(())
}

/// Value in (0, 1].
fn fraction(name: &str, value: Decimal) -> Result<(), TradingError> {
    if value <= Decimal::ZERO || value > Decimal::ONE {
        return Err(invalid(format!("{name} must be within (0, 1], got {value}")));
    }
    Ok(())
}

fn nonzero(name: &str, value: u64) -> Result<(), TradingError> {
    if value == 0 {
        return Err(invalid(format!("{name} must be non-zero")));
    }
    Ok(())
}

fn retry(name: &str, policy: &RetryPolicy) -> Result<(), TradingError> {
    nonzero(&format!("{name}.max_attempts"), u64::from(policy.max_attempts))
}
