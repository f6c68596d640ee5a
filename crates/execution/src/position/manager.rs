//! Position manager.

use super::exposure::{ExposureLimits, ExposureSnapshot, check_exposure, check_position_count};
use crate::lifecycle::LifecycleEvent;
use dexbot_domain::entities::{ClosedPosition, Decision, DecisionId, Position, PositionId};
use dexbot_domain::enums::CloseReason;
use dexbot_domain::ports::TradeStore;
use dexbot_domain::{Rejection, RejectionCode, TradingError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info};

/// Configuration for the position manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionManagerConfig {
    /// Closed positions kept in memory.
    pub closed_history: usize,
    /// Lifecycle events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            closed_history: 1_000,
            event_capacity: 256,
        }
    }
}

/// Owns the open position set and the exposure reserved by entries still in
/// flight.
///
/// Lock order is `open` then `reserved`.
pub struct PositionManager {
    config: PositionManagerConfig,
    open: Mutex<HashMap<PositionId, Position>>,
    /// Entry notional per decision whose swap has not settled.
    reserved: Mutex<HashMap<DecisionId, Decimal>>,
    closed: Mutex<VecDeque<ClosedPosition>>,
    events: broadcast::Sender<LifecycleEvent>,
    store: Arc<dyn TradeStore>,
}

impl PositionManager {
    /// Creates a new position manager.
    pub fn new(config: PositionManagerConfig, store: Arc<dyn TradeStore>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            open: Mutex::new(HashMap::new()),
            reserved: Mutex::new(HashMap::new()),
            closed: Mutex::new(VecDeque::new()),
            events,
            store,
        }
    }

    /// Receiver for lifecycle events. Slow receivers lose events rather than
    /// stalling the manager.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Reloads open positions persisted before a restart.
    pub async fn restore(&self) -> Result<usize, TradingError> {
        let positions = self.store.load_positions().await?;
        let mut open = self.open.lock().await;
        for position in positions {
            open.insert(position.id, position);
        }
        info!(count = open.len(), "Open positions restored");
        Ok(open.len())
    }

    /// Persists and adds a position whose entry trade confirmed.
    pub async fn open_position(&self, position: Position) -> Result<PositionId, TradingError> {
        self.insert_open(position, None).await
    }

    /// Opens the position filled for `decision` and drops its reservation in
    /// the same critical section.
    pub async fn fill_reservation(
        &self,
        decision: DecisionId,
        position: Position,
    ) -> Result<PositionId, TradingError> {
        self.insert_open(position, Some(decision)).await
    }

    async fn insert_open(
        &self,
        position: Position,
        reservation: Option<DecisionId>,
    ) -> Result<PositionId, TradingError> {
        self.store.save_position(&position).await?;
        let id = position.id;
        {
            let mut open = self.open.lock().await;
            open.insert(id, position.clone());
            if let Some(decision) = reservation {
                self.reserved.lock().await.remove(&decision);
            }
        }

        info!(
            position = %id,
            side = ?position.side,
            entry = %position.entry_price,
            size = %position.size,
            stop_loss = %position.stop_loss,
            take_profit = %position.take_profit,
            "Position opened"
        );
        let _ = self.events.send(LifecycleEvent::Opened(position));
        Ok(id)
    }

    /// Evaluates stop-loss and take-profit for every open position at `price`
    /// and closes those that hit.
    pub async fn on_tick(&self, price: Decimal) -> Vec<ClosedPosition> {
        let triggered: Vec<(Position, CloseReason)> = {
            let mut open = self.open.lock().await;
            let hits: Vec<(PositionId, CloseReason)> = open
                .values()
                .filter_map(|p| p.exit_trigger(price).map(|reason| (p.id, reason)))
                .collect();
            hits.into_iter()
                .filter_map(|(id, reason)| open.remove(&id).map(|p| (p, reason)))
                .collect()
        };

        let mut closed = Vec::with_capacity(triggered.len());
        for (position, reason) in triggered {
            closed.push(self.finish_close(position, price, reason).await);
        }
        if !closed.is_empty() {
            debug!(%price, closed = closed.len(), "Tick closed positions");
        }
        closed
    }

    /// Manually closes a position. Unknown or already closed ids are a no-op.
    pub async fn close_position(&self, id: PositionId, price: Decimal) -> Option<ClosedPosition> {
        let position = self.open.lock().await.remove(&id);
        match position {
            Some(position) => Some(self.finish_close(position, price, CloseReason::Manual).await),
            None => {
                debug!(position = %id, "Close ignored, position not open");
                None
            }
        }
    }

    async fn finish_close(
        &self,
        position: Position,
        price: Decimal,
        reason: CloseReason,
    ) -> ClosedPosition {
        let closed = position.close(price, reason);
        if let Err(e) = self.store.save_closed_position(&closed).await {
            error!(
                position = %closed.position.id,
                code = e.code(),
                error = %e,
                "Failed to persist closed position"
            );
        }

        info!(
            position = %closed.position.id,
            status = ?closed.status(),
            exit = %closed.exit_price,
            pnl = %closed.pnl,
            "Position closed"
        );

        {
            let mut history = self.closed.lock().await;
            history.push_back(closed.clone());
            while history.len() > self.config.closed_history {
                history.pop_front();
            }
        }
        let _ = self.events.send(LifecycleEvent::Closed(closed.clone()));
        closed
    }

    /// Copy of the open set.
    pub async fn list_open(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.open.lock().await.values().cloned().collect();
        positions.sort_by_key(|p| p.opened_at);
        positions
    }

    pub async fn get(&self, id: PositionId) -> Option<Position> {
        self.open.lock().await.get(&id).cloned()
    }

    /// Most recent closed positions, oldest first.
    pub async fn closed_history(&self) -> Vec<ClosedPosition> {
        self.closed.lock().await.iter().cloned().collect()
    }

    /// Count and notional of the open set plus in-flight reservations.
    pub async fn snapshot(&self) -> ExposureSnapshot {
        let open = self.open.lock().await;
        let reserved = self.reserved.lock().await;
        exposure_of(&open, &reserved)
    }

    /// Whether the open set can take `decision`.
    pub async fn validate_trade(
        &self,
        decision: &Decision,
        portfolio_value: Decimal,
        limits: &ExposureLimits,
    ) -> Result<(), Rejection> {
        let snapshot = self.snapshot().await;
        check_limits(&snapshot, decision.notional(portfolio_value), portfolio_value, limits)
    }

    /// Validates `decision` and holds its notional until the entry settles.
    /// Check and reservation happen under one lock.
    pub async fn reserve(
        &self,
        decision: &Decision,
        portfolio_value: Decimal,
        limits: &ExposureLimits,
    ) -> Result<(), Rejection> {
        let open = self.open.lock().await;
        let mut reserved = self.reserved.lock().await;
        if reserved.contains_key(&decision.id) {
            return Err(Rejection::new(
                RejectionCode::DuplicateDecision,
                format!("decision {} is already in flight", decision.id),
            ));
        }
        let notional = decision.notional(portfolio_value);
        check_limits(&exposure_of(&open, &reserved), notional, portfolio_value, limits)?;
        reserved.insert(decision.id, notional);
        debug!(decision = %decision.id, %notional, in_flight = reserved.len(), "Exposure reserved");
        Ok(())
    }

    /// Holds `notional` for an entry reloaded after a restart.
    pub async fn hold_reservation(&self, decision: DecisionId, notional: Decimal) {
        self.reserved.lock().await.insert(decision, notional);
    }

    /// Drops the reservation of `decision`. Returns `false` if none was held.
    pub async fn release(&self, decision: DecisionId) -> bool {
        let released = self.reserved.lock().await.remove(&decision).is_some();
        if released {
            debug!(decision = %decision, "Exposure released");
        }
        released
    }
}

fn exposure_of(
    open: &HashMap<PositionId, Position>,
    reserved: &HashMap<DecisionId, Decimal>,
) -> ExposureSnapshot {
    ExposureSnapshot {
        open_count: open.len() + reserved.len(),
        open_notional: open.values().map(Position::notional).sum::<Decimal>()
            + reserved.values().copied().sum::<Decimal>(),
    }
}

fn check_limits(
    snapshot: &ExposureSnapshot,
    notional: Decimal,
    portfolio_value: Decimal,
    limits: &ExposureLimits,
) -> Result<(), Rejection> {
    check_position_count(snapshot, limits.max_open_positions)?;
    check_exposure(snapshot, notional, portfolio_value, limits.max_exposure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTradeStore;
    use dexbot_domain::RejectionCode;
    use dexbot_domain::enums::{Action, PositionStatus, Side};
    use rust_decimal_macros::dec;

    fn manager() -> (PositionManager, Arc<InMemoryTradeStore>) {
        let store = Arc::new(InMemoryTradeStore::new());
        (
            PositionManager::new(PositionManagerConfig::default(), store.clone()),
            store,
        )
    }

    fn long(entry: Decimal, size: Decimal) -> Position {
        Position::new(
            Side::Long,
            entry,
            size,
            entry * dec!(0.95),
            entry * dec!(1.1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_stop_out_on_tick() {
        let (manager, store) = manager();
        let position =
            Position::new(Side::Long, dec!(2000), dec!(0.5), dec!(1900), dec!(2200)).unwrap();
        let id = manager.open_position(position).await.unwrap();
        let mut events = manager.subscribe();

        assert!(manager.on_tick(dec!(1950)).await.is_empty());
        let closed = manager.on_tick(dec!(1890)).await;

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status(), PositionStatus::StoppedOut);
        assert_eq!(closed[0].pnl, (dec!(1890) - dec!(2000)) * dec!(0.5));
        assert!(manager.list_open().await.is_empty());
        assert_eq!(store.closed_positions().await.len(), 1);
        assert!(store.open_positions().await.is_empty());

        let event = events.recv().await.unwrap();
        assert_eq!(event.position_id(), id);
        assert!(event.closed().is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (manager, _) = manager();
        let id = manager.open_position(long(dec!(100), dec!(1))).await.unwrap();

        let first = manager.close_position(id, dec!(101)).await.unwrap();
        assert_eq!(first.status(), PositionStatus::ManuallyClosed);
        assert_eq!(first.pnl, dec!(1));

        assert!(manager.close_position(id, dec!(102)).await.is_none());
        assert!(manager.close_position(PositionId::new(), dec!(1)).await.is_none());
        assert_eq!(manager.closed_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_trade_limits() {
        let (manager, _) = manager();
        for _ in 0..5 {
            manager.open_position(long(dec!(100), dec!(1))).await.unwrap();
        }
        let decision = Decision::new(
            Action::Buy,
            dec!(0.01),
            dec!(0.9),
            dec!(100),
            dec!(95),
            dec!(110),
            vec![],
        );

        let limits = ExposureLimits {
            max_open_positions: 5,
            max_exposure: dec!(1),
        };
        let err = manager
            .validate_trade(&decision, dec!(10000), &limits)
            .await
            .unwrap_err();
        assert_eq!(err.code, RejectionCode::MaxPositions);

        let limits = ExposureLimits {
            max_open_positions: 10,
            max_exposure: dec!(0.05),
        };
        let err = manager
            .validate_trade(&decision, dec!(10000), &limits)
            .await
            .unwrap_err();
        assert_eq!(err.code, RejectionCode::MaxExposure);

        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.open_count, 5);
        assert_eq!(snapshot.open_notional, dec!(500));
    }

    #[tokio::test]
    async fn test_reservations_count_against_limits() {
        let (manager, _) = manager();
        let limits = ExposureLimits {
            max_open_positions: 2,
            max_exposure: dec!(1),
        };
        let entry = || {
            Decision::new(
                Action::Buy,
                dec!(0.1),
                dec!(0.9),
                dec!(100),
                dec!(95),
                dec!(110),
                vec![],
            )
        };
        let first = entry();
        manager.reserve(&first, dec!(10000), &limits).await.unwrap();
        let err = manager.reserve(&first, dec!(10000), &limits).await.unwrap_err();
        assert_eq!(err.code, RejectionCode::DuplicateDecision);

        manager.reserve(&entry(), dec!(10000), &limits).await.unwrap();
        let err = manager.reserve(&entry(), dec!(10000), &limits).await.unwrap_err();
        assert_eq!(err.code, RejectionCode::MaxPositions);
        assert_eq!(manager.snapshot().await.open_notional, dec!(2000));

        // filling swaps the reservation for the position
        manager
            .fill_reservation(first.id, long(dec!(100), dec!(10)))
            .await
            .unwrap();
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.open_count, 2);
        assert_eq!(snapshot.open_notional, dec!(2000));
        assert!(!manager.release(first.id).await);
    }

    #[tokio::test]
    async fn test_closed_history_is_bounded() {
        let store = Arc::new(InMemoryTradeStore::new());
        let manager = PositionManager::new(
            PositionManagerConfig {
                closed_history: 2,
                ..Default::default()
            },
            store,
        );
        for _ in 0..3 {
            manager.open_position(long(dec!(100), dec!(1))).await.unwrap();
        }
        assert_eq!(manager.on_tick(dec!(200)).await.len(), 3);
        assert_eq!(manager.closed_history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_from_store() {
        let (manager, store) = manager();
        manager.open_position(long(dec!(100), dec!(1))).await.unwrap();

        let restarted = PositionManager::new(PositionManagerConfig::default(), store);
        assert_eq!(restarted.restore().await.unwrap(), 1);
        assert_eq!(restarted.list_open().await.len(), 1);
    }
}
