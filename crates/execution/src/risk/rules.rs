//! Risk rules.

use crate::position::{ExposureSnapshot, check_exposure, check_position_count};
use async_trait::async_trait;
use dexbot_domain::entities::Decision;
use dexbot_domain::enums::Action;
use dexbot_domain::{Rejection, RejectionCode, TradingError};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Inputs a rule may consult besides the decision itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskContext {
    /// Portfolio value in quote units.
    pub portfolio_value: Decimal,
    /// Realized volatility as a fraction.
    pub volatility: Decimal,
    /// Open set at evaluation time.
    pub exposure: ExposureSnapshot,
}

/// Result of one rule transform.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// Continue with this decision.
    Adjusted(Decision),
    /// Stop the pipeline.
    Rejected(Rejection),
}

/// One step of the risk pipeline. Lower priorities run first.
#[async_trait]
pub trait RiskRule: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    /// Whether the rule applies to this decision.
    fn applies(&self, decision: &Decision, ctx: &RiskContext) -> bool;

    /// Produces the next decision. An `Err` means the rule itself failed and
    /// is skipped.
    async fn transform(
        &self,
        decision: Decision,
        ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError>;
}

pub const PRIORITY_MIN_CONFIDENCE: i32 = 0;
pub const PRIORITY_MAX_POSITION_SIZE: i32 = 100;
pub const PRIORITY_VOLATILITY: i32 = 200;
pub const PRIORITY_MAX_POSITIONS: i32 = 300;
pub const PRIORITY_MAX_EXPOSURE: i32 = 400;
/// Default priority for custom rules.
pub const PRIORITY_CUSTOM: i32 = 500;
pub const PRIORITY_EXECUTABLE: i32 = 10_000;

/// Rejects `LOW_CONFIDENCE` below the floor.
#[derive(Debug, Clone)]
pub struct MinConfidenceRule {
    pub min_confidence: Decimal,
}

#[async_trait]
impl RiskRule for MinConfidenceRule {
    fn name(&self) -> &str {
        "min_confidence"
    }

    fn priority(&self) -> i32 {
        PRIORITY_MIN_CONFIDENCE
    }

    fn applies(&self, decision: &Decision, _ctx: &RiskContext) -> bool {
        decision.confidence < self.min_confidence
    }

    async fn transform(
        &self,
        decision: Decision,
        _ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError> {
        Ok(RuleOutcome::Rejected(Rejection::new(
            RejectionCode::LowConfidence,
            format!(
                "confidence {} below minimum {}",
                decision.confidence, self.min_confidence
            ),
        )))
    }
}

/// Caps size at the configured maximum.
#[derive(Debug, Clone)]
pub struct MaxPositionSizeRule {
    pub max_position_size: Decimal,
}

#[async_trait]
impl RiskRule for MaxPositionSizeRule {
    fn name(&self) -> &str {
        "max_position_size"
    }

    fn priority(&self) -> i32 {
        PRIORITY_MAX_POSITION_SIZE
    }

    fn applies(&self, decision: &Decision, _ctx: &RiskContext) -> bool {
        decision.size > self.max_position_size
    }

    async fn transform(
        &self,
        decision: Decision,
        _ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError> {
        Ok(RuleOutcome::Adjusted(Decision {
            size: self.max_position_size,
            ..decision
        }))
    }
}

/// Shrinks size and widens the stop while volatility is high.
#[derive(Debug, Clone)]
pub struct VolatilityRule {
    pub threshold: Decimal,
    pub size_factor: Decimal,
    pub stop_widen_factor: Decimal,
}

#[async_trait]
impl RiskRule for VolatilityRule {
    fn name(&self) -> &str {
        "volatility_adjustment"
    }

    fn priority(&self) -> i32 {
        PRIORITY_VOLATILITY
    }

    fn applies(&self, _decision: &Decision, ctx: &RiskContext) -> bool {
        ctx.volatility > self.threshold
    }

    async fn transform(
        &self,
        decision: Decision,
        _ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError> {
        if decision.side().is_none() {
            return Err(TradingError::Validation(
                "cannot widen the stop of a decision without a side".into(),
            ));
        }
        let distance = decision.stop_distance() * self.stop_widen_factor;
        if distance >= decision.reference_price {
            return Err(TradingError::Validation(format!(
                "widened stop distance {distance} reaches past zero"
            )));
        }
        let mut next = Decision {
            size: decision.size * self.size_factor,
            ..decision
        };
        next.set_stop_distance(distance);
        Ok(RuleOutcome::Adjusted(next))
    }
}

/// Rejects `MAX_POSITIONS` when the open set is full.
#[derive(Debug, Clone)]
pub struct MaxOpenPositionsRule {
    pub max_open_positions: usize,
}

#[async_trait]
impl RiskRule for MaxOpenPositionsRule {
    fn name(&self) -> &str {
        "max_open_positions"
    }

    fn priority(&self) -> i32 {
        PRIORITY_MAX_POSITIONS
    }

    fn applies(&self, _decision: &Decision, _ctx: &RiskContext) -> bool {
        true
    }

    async fn transform(
        &self,
        decision: Decision,
        ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError> {
        Ok(match check_position_count(&ctx.exposure, self.max_open_positions) {
            Ok(()) => RuleOutcome::Adjusted(decision),
            Err(rejection) => RuleOutcome::Rejected(rejection),
        })
    }
}

/// Rejects `MAX_EXPOSURE` when the new notional would breach the limit.
#[derive(Debug, Clone)]
pub struct MaxExposureRule {
    pub max_exposure: Decimal,
}

#[async_trait]
impl RiskRule for MaxExposureRule {
    fn name(&self) -> &str {
        "max_exposure"
    }

    fn priority(&self) -> i32 {
        PRIORITY_MAX_EXPOSURE
    }

    fn applies(&self, _decision: &Decision, _ctx: &RiskContext) -> bool {
        true
    }

    async fn transform(
        &self,
        decision: Decision,
        ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError> {
        let new_notional = decision.notional(ctx.portfolio_value);
        Ok(
            match check_exposure(
                &ctx.exposure,
                new_notional,
                ctx.portfolio_value,
                self.max_exposure,
            ) {
                Ok(()) => RuleOutcome::Adjusted(decision),
                Err(rejection) => RuleOutcome::Rejected(rejection),
            },
        )
    }
}

/// Final gate: rejects `NO_ACTION` and `INVALID_SIZE`, and caps size again
/// after any custom rule.
#[derive(Debug, Clone)]
pub struct ExecutableRule {
    pub max_position_size: Decimal,
}

#[async_trait]
impl RiskRule for ExecutableRule {
    fn name(&self) -> &str {
        "executable"
    }

    fn priority(&self) -> i32 {
        PRIORITY_EXECUTABLE
    }

    fn applies(&self, decision: &Decision, _ctx: &RiskContext) -> bool {
        decision.action == Action::None
            || decision.size <= Decimal::ZERO
            || decision.size > self.max_position_size
    }

    async fn transform(
        &self,
        decision: Decision,
        _ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError> {
        // The confidence floor was already enforced earlier in the pipeline.
        if let Err(rejection) = decision.ensure_executable(Decimal::ZERO) {
            return Ok(RuleOutcome::Rejected(rejection));
        }
        Ok(RuleOutcome::Adjusted(Decision {
            size: decision.size.min(self.max_position_size),
            ..decision
        }))
    }
}

type Predicate = Arc<dyn Fn(&Decision, &RiskContext) -> bool + Send + Sync>;
type Transform =
    Arc<dyn Fn(Decision, &RiskContext) -> Result<RuleOutcome, TradingError> + Send + Sync>;

/// Rule built from closures.
#[derive(Clone)]
pub struct FnRule {
    name: String,
    priority: i32,
    predicate: Predicate,
    transform: Transform,
}

impl FnRule {
    /// Rule that always applies.
    pub fn new<T>(name: impl Into<String>, priority: i32, transform: T) -> Self
    where
        T: Fn(Decision, &RiskContext) -> Result<RuleOutcome, TradingError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            predicate: Arc::new(|_, _| true),
            transform: Arc::new(transform),
        }
    }

    #[must_use]
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Decision, &RiskContext) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RiskRule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn applies(&self, decision: &Decision, ctx: &RiskContext) -> bool {
        (self.predicate)(decision, ctx)
    }

    async fn transform(
        &self,
        decision: Decision,
        ctx: &RiskContext,
    ) -> Result<RuleOutcome, TradingError> {
        (self.transform)(decision, ctx)
    }
}
