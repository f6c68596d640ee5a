//! Circuit breaker gating new entries.
//!
//! Two triggers open the breaker: a streak of failed trades, and realized
//! losses over the session exceeding a fraction of portfolio value. After
//! `cooldown_secs` it half-opens and admits entries again; the first failure
//! in that state reopens it. An operator halt holds it open until `resume`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Entries allowed.
    Closed,
    /// Entries blocked.
    Open,
    /// Entries allowed on probation.
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed trades that open the breaker.
    pub max_failures: u32,
    /// Session loss, as a fraction of portfolio value, that opens the breaker.
    pub max_loss_pct: Decimal,
    pub cooldown_secs: u64,
    /// Confirmed trades in half-open state needed to close.
    pub probe_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            max_loss_pct: Decimal::new(10, 2),
            cooldown_secs: 300,
            probe_successes: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    failure_streak: u32,
    probe_successes: u32,
    /// Sum of realized pnl fractions since start or last resume.
    session_pnl: Decimal,
    opened_at: Option<Instant>,
    halted: Option<String>,
}

impl BreakerState {
    fn open(&mut self, reason: &str) {
        if self.circuit != CircuitState::Open {
            error!(reason, session_pnl = %self.session_pnl, "Circuit breaker opened");
        }
        self.circuit = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.failure_streak = 0;
        self.probe_successes = 0;
    }
}

/// Shared by the executor (trade outcomes) and the engine (realized pnl).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                failure_streak: 0,
                probe_successes: 0,
                session_pnl: Decimal::ZERO,
                opened_at: None,
                halted: None,
            }),
        }
    }

    /// Whether a new entry may be submitted. Moves an open breaker to
    /// half-open once the cooldown has passed.
    pub async fn is_allowed(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.halted.is_some() {
            return false;
        }
        match state.circuit {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= Duration::from_secs(self.config.cooldown_secs));
                if cooled {
                    info!("Circuit breaker half-open, admitting probe trades");
                    state.circuit = CircuitState::HalfOpen;
                }
                cooled
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.failure_streak = 0;
        if state.circuit == CircuitState::HalfOpen {
            state.probe_successes += 1;
            if state.probe_successes >= self.config.probe_successes {
                state.circuit = CircuitState::Closed;
                state.probe_successes = 0;
                state.opened_at = None;
                info!("Circuit breaker closed");
            }
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failure_streak += 1;
        match state.circuit {
            CircuitState::HalfOpen => state.open("failure while half-open"),
            CircuitState::Closed if state.failure_streak >= self.config.max_failures => {
                state.open("consecutive trade failures")
            }
            _ => {}
        }
    }

    /// Adds one realized pnl, as a fraction of portfolio value, to the
    /// session total. Returns `true` if this opened the breaker.
    pub async fn record_realized(&self, pnl_fraction: Decimal) -> bool {
        let mut state = self.state.lock().await;
        state.session_pnl += pnl_fraction;
        let over_budget = -state.session_pnl > self.config.max_loss_pct;
        if over_budget && state.circuit != CircuitState::Open {
            state.open("session loss limit");
            return true;
        }
        false
    }

    /// Blocks entries until [`Self::resume`].
    pub async fn halt(&self, reason: &str) {
        let mut state = self.state.lock().await;
        warn!(reason, "Trading halted by operator");
        state.halted = Some(reason.to_string());
        state.open("operator halt");
    }

    /// Clears a halt and every counter, including the session loss.
    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        *state = BreakerState {
            circuit: CircuitState::Closed,
            failure_streak: 0,
            probe_successes: 0,
            session_pnl: Decimal::ZERO,
            opened_at: None,
            halted: None,
        };
        info!("Circuit breaker resumed");
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.circuit
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock().await;
        CircuitBreakerStats {
            state: state.circuit,
            failure_streak: state.failure_streak,
            session_pnl: state.session_pnl,
            halted: state.halted.clone(),
            open_for: state.opened_at.map(|t| t.elapsed()),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_streak: u32,
    pub session_pnl: Decimal,
    /// Operator halt reason.
    pub halted: Option<String>,
    pub open_for: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn breaker(max_failures: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            max_failures,
            cooldown_secs,
            probe_successes: 1,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_failure_streak_opens() {
        let cb = breaker(2, 300);
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        assert!(cb.is_allowed().await);

        cb.record_failure().await;
        assert!(!cb.is_allowed().await);
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_probe_after_cooldown() {
        let cb = breaker(1, 0);
        cb.record_failure().await;
        assert!(cb.is_allowed().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        assert!(cb.is_allowed().await);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_session_losses_accumulate() {
        let cb = CircuitBreaker::default();
        assert!(!cb.record_realized(dec!(-0.04)).await);
        assert!(!cb.record_realized(dec!(0.01)).await);
        assert!(!cb.record_realized(dec!(-0.05)).await);
        assert!(cb.is_allowed().await);

        // -0.04 + 0.01 - 0.05 - 0.03 = -0.11
        assert!(cb.record_realized(dec!(-0.03)).await);
        assert!(!cb.is_allowed().await);
        assert_eq!(cb.stats().await.session_pnl, dec!(-0.11));
        assert!(!cb.record_realized(dec!(-0.01)).await);
    }

    #[tokio::test]
    async fn test_halt_outlasts_cooldown() {
        let cb = breaker(3, 0);
        cb.halt("manual review").await;
        assert!(!cb.is_allowed().await);
        assert_eq!(cb.stats().await.halted.as_deref(), Some("manual review"));

        cb.resume().await;
        assert!(cb.is_allowed().await);
        assert_eq!(cb.stats().await.session_pnl, Decimal::ZERO);
    }
}
