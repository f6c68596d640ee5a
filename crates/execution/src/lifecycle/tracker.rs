//! Realized performance tracking.

use super::LifecycleEvent;
use dexbot_domain::entities::{ClosedPosition, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Aggregate statistics over closed positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Positions opened.
    pub opened_positions: u32,
    /// Positions closed.
    pub closed_positions: u32,
    /// Closed with positive PnL.
    pub wins: u32,
    /// Closed with zero or negative PnL.
    pub losses: u32,
    /// Sum of realized PnL in quote units.
    pub total_pnl: Decimal,
    /// Sum of per-position returns.
    pub total_return_pct: Decimal,
    /// Best single return.
    pub best_return_pct: Option<Decimal>,
    /// Worst single return.
    pub worst_return_pct: Option<Decimal>,
}

impl AggregateStats {
    fn record_close(&mut self, closed: &ClosedPosition) {
        self.closed_positions += 1;
        if closed.pnl > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.total_pnl += closed.pnl;
        self.total_return_pct += closed.return_pct;
        self.best_return_pct = Some(
            self.best_return_pct
                .map_or(closed.return_pct, |b| b.max(closed.return_pct)),
        );
        self.worst_return_pct = Some(
            self.worst_return_pct
                .map_or(closed.return_pct, |w| w.min(closed.return_pct)),
        );
    }

    /// Share of closed positions with positive PnL.
    pub fn win_rate(&self) -> Decimal {
        if self.closed_positions == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.closed_positions)
    }

    /// Mean return per closed position.
    pub fn avg_return_pct(&self) -> Decimal {
        if self.closed_positions == 0 {
            return Decimal::ZERO;
        }
        self.total_return_pct / Decimal::from(self.closed_positions)
    }
}

/// Engine-wide and per-strategy performance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub overall: AggregateStats,
    pub by_strategy: HashMap<String, AggregateStats>,
}

/// Aggregates lifecycle events into performance statistics.
pub struct PerformanceTracker {
    overall: RwLock<AggregateStats>,
    by_strategy: RwLock<HashMap<String, AggregateStats>>,
}

impl PerformanceTracker {
    /// Creates a new performance tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            overall: RwLock::new(AggregateStats::default()),
            by_strategy: RwLock::new(HashMap::new()),
        }
    }

    /// Applies one lifecycle event.
    pub async fn record(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Opened(position) => self.record_opened(position).await,
            LifecycleEvent::Closed(closed) => self.record_closed(closed).await,
        }
    }

    /// Records a position opened event.
    pub async fn record_opened(&self, position: &Position) {
        self.overall.write().await.opened_positions += 1;
        let mut by_strategy = self.by_strategy.write().await;
        for id in &position.strategy_ids {
            by_strategy.entry(id.clone()).or_default().opened_positions += 1;
        }
        debug!(position = %position.id, "Position opened recorded");
    }

    /// Records a position closed event.
    pub async fn record_closed(&self, closed: &ClosedPosition) {
        self.overall.write().await.record_close(closed);
        let mut by_strategy = self.by_strategy.write().await;
        for id in &closed.position.strategy_ids {
            by_strategy.entry(id.clone()).or_default().record_close(closed);
        }

        info!(
            position = %closed.position.id,
            pnl = %closed.pnl,
            return_pct = %closed.return_pct,
            reason = closed.reason.as_str(),
            "Position closed recorded"
        );
    }

    /// Gets aggregate statistics over every strategy.
    pub async fn overall(&self) -> AggregateStats {
        self.overall.read().await.clone()
    }

    /// Gets statistics for one strategy.
    pub async fn strategy(&self, strategy_id: &str) -> Option<AggregateStats> {
        self.by_strategy.read().await.get(strategy_id).cloned()
    }

    /// Snapshot of all statistics.
    pub async fn report(&self) -> PerformanceReport {
        PerformanceReport {
            overall: self.overall().await,
            by_strategy: self.by_strategy.read().await.clone(),
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexbot_domain::enums::{CloseReason, Side};
    use rust_decimal_macros::dec;

    fn position(strategies: &[&str]) -> Position {
        Position::new(Side::Long, dec!(100), dec!(1), dec!(95), dec!(110))
            .unwrap()
            .with_strategies(strategies.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_performance_tracker() {
        let tracker = PerformanceTracker::new();

        let winner = position(&["trend", "rsi"]);
        tracker.record(&LifecycleEvent::Opened(winner.clone())).await;
        tracker
            .record(&LifecycleEvent::Closed(
                winner.close(dec!(110), CloseReason::TakeProfit),
            ))
            .await;

        let loser = position(&["trend"]);
        tracker
            .record(&LifecycleEvent::Closed(
                loser.close(dec!(95), CloseReason::StopLoss),
            ))
            .await;

        let overall = tracker.overall().await;
        assert_eq!(overall.opened_positions, 1);
        assert_eq!(overall.closed_positions, 2);
        assert_eq!(overall.total_pnl, dec!(5));
        assert_eq!(overall.win_rate(), dec!(0.5));
        assert_eq!(overall.avg_return_pct(), dec!(0.025));
        assert_eq!(overall.best_return_pct, Some(dec!(0.1)));
        assert_eq!(overall.worst_return_pct, Some(dec!(-0.05)));

        let rsi = tracker.strategy("rsi").await.unwrap();
        assert_eq!(rsi.wins, 1);
        assert_eq!(rsi.losses, 0);
        assert!(tracker.strategy("macd").await.is_none());
        assert_eq!(tracker.report().await.by_strategy.len(), 2);
    }
}
