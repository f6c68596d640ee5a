//! Risk engine pipeline.

use super::rules::{
    ExecutableRule, MaxExposureRule, MaxOpenPositionsRule, MaxPositionSizeRule, MinConfidenceRule,
    RiskContext, RiskRule, RuleOutcome, VolatilityRule,
};
use crate::position::ExposureLimits;
use dexbot_domain::entities::Decision;
use dexbot_domain::{Rejection, RejectionCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confidence floor reachable by a unanimous signal from up to five
/// strategies without history, each weighted 1/N.
pub const DEFAULT_MIN_CONFIDENCE: Decimal = Decimal::from_parts(2, 0, 0, false, 1);

/// Configuration for the built-in risk rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum decision size as a fraction of portfolio value.
    pub max_position_size: Decimal,
    /// Volatility above which size is damped and the stop widened.
    pub volatility_threshold: Decimal,
    /// Size multiplier under high volatility.
    pub volatility_size_factor: Decimal,
    /// Stop distance multiplier under high volatility.
    pub stop_widen_factor: Decimal,
    /// Maximum number of open positions.
    pub max_open_positions: usize,
    /// Maximum open notional as a fraction of portfolio value.
    pub max_exposure: Decimal,
    /// Decisions below this confidence are rejected.
    pub min_confidence: Decimal,
    /// Wall-clock budget for the whole pipeline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::new(1, 1),       // 10%
            volatility_threshold: Decimal::new(5, 2),    // 5%
            volatility_size_factor: Decimal::new(8, 1),  // 0.8
            stop_widen_factor: Decimal::new(12, 1),      // 1.2
            max_open_positions: 5,
            max_exposure: Decimal::new(5, 1),            // 50%
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            timeout_ms: 5_000,
        }
    }
}

impl RiskConfig {
    pub fn exposure_limits(&self) -> ExposureLimits {
        ExposureLimits {
            max_open_positions: self.max_open_positions,
            max_exposure: self.max_exposure,
        }
    }
}

/// Ordered rule pipeline. Rules are fixed once the engine is built.
pub struct RiskEngine {
    rules: Vec<Box<dyn RiskRule>>,
    timeout: Duration,
}

impl RiskEngine {
    /// Creates an engine with the built-in rules.
    pub fn new(config: &RiskConfig) -> Self {
        let mut engine = Self {
            rules: Vec::new(),
            timeout: Duration::from_millis(config.timeout_ms),
        };
        engine.add_rule(Box::new(MinConfidenceRule {
            min_confidence: config.min_confidence,
        }));
        engine.add_rule(Box::new(MaxPositionSizeRule {
            max_position_size: config.max_position_size,
        }));
        engine.add_rule(Box::new(VolatilityRule {
            threshold: config.volatility_threshold,
            size_factor: config.volatility_size_factor,
            stop_widen_factor: config.stop_widen_factor,
        }));
        engine.add_rule(Box::new(MaxOpenPositionsRule {
            max_open_positions: config.max_open_positions,
        }));
        engine.add_rule(Box::new(MaxExposureRule {
            max_exposure: config.max_exposure,
        }));
        engine.add_rule(Box::new(ExecutableRule {
            max_position_size: config.max_position_size,
        }));
        engine
    }

    /// Inserts a rule at its priority. Equal priorities keep insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn RiskRule>) {
        let at = self
            .rules
            .partition_point(|r| r.priority() <= rule.priority());
        debug!(rule = rule.name(), priority = rule.priority(), "Risk rule added");
        self.rules.insert(at, rule);
    }

    #[must_use]
    pub fn with_rule(mut self, rule: Box<dyn RiskRule>) -> Self {
        self.add_rule(rule);
        self
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Runs the pipeline on a copy of `decision`.
    pub async fn apply(&self, decision: &Decision, ctx: &RiskContext) -> Result<Decision, Rejection> {
        match tokio::time::timeout(self.timeout, self.run(decision.clone(), ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    decision = %decision.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Risk pipeline timed out"
                );
                Err(Rejection::new(
                    RejectionCode::RiskTimeout,
                    format!("risk pipeline exceeded {} ms", self.timeout.as_millis()),
                ))
            }
        }
    }

    async fn run(&self, mut decision: Decision, ctx: &RiskContext) -> Result<Decision, Rejection> {
        for rule in &self.rules {
            if !rule.applies(&decision, ctx) {
                continue;
            }
            match rule.transform(decision.clone(), ctx).await {
                Ok(RuleOutcome::Adjusted(next)) => {
                    if next != decision {
                        debug!(
                            rule = rule.name(),
                            size = %next.size,
                            stop_loss = %next.stop_loss,
                            "Risk rule adjusted decision"
                        );
                    }
                    decision = next;
                }
                Ok(RuleOutcome::Rejected(rejection)) => {
                    info!(
                        decision = %decision.id,
                        rule = rule.name(),
                        code = %rejection.code,
                        reason = %rejection.message,
                        "Decision rejected"
                    );
                    return Err(rejection);
                }
                Err(e) => {
                    warn!(rule = rule.name(), error = %e, "Risk rule failed, skipping");
                }
            }
        }
        Ok(decision)
    }
}
