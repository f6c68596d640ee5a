//! In-memory [`TradeStore`] for paper trading and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dexbot_domain::entities::{
    ClosedPosition, DecisionId, ExecutedTrade, PendingTransaction, Position, PositionId,
    TradeFailure,
};
use dexbot_domain::ports::TradeStore;
use dexbot_domain::{TradingError, TxHash};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreState {
    pending: HashMap<TxHash, PendingTransaction>,
    decisions: HashSet<DecisionId>,
    trades: Vec<ExecutedTrade>,
    failures: Vec<TradeFailure>,
    open: HashMap<PositionId, Position>,
    closed: Vec<ClosedPosition>,
    returns: HashMap<String, Vec<(DateTime<Utc>, Decimal)>>,
}

/// Keeps everything in process memory; state is lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryTradeStore {
    state: RwLock<StoreState>,
    fail_writes: AtomicBool,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), TradingError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TradingError::Storage("store is read-only".into()));
        }
        Ok(())
    }

    pub async fn trades(&self) -> Vec<ExecutedTrade> {
        self.state.read().await.trades.clone()
    }

    pub async fn failures(&self) -> Vec<TradeFailure> {
        self.state.read().await.failures.clone()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.state.read().await.open.values().cloned().collect()
    }

    pub async fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.state.read().await.closed.clone()
    }

    pub async fn returns(&self, strategy_id: &str) -> Vec<Decimal> {
        self.state
            .read()
            .await
            .returns
            .get(strategy_id)
            .map(|r| r.iter().map(|(_, v)| *v).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn save_pending(&self, pending: &PendingTransaction) -> Result<(), TradingError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.decisions.insert(pending.decision_ref);
        state.pending.insert(pending.tx_id, pending.clone());
        Ok(())
    }

    async fn remove_pending(&self, tx_id: TxHash) -> Result<(), TradingError> {
        self.check_writable()?;
        self.state.write().await.pending.remove(&tx_id);
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<PendingTransaction>, TradingError> {
        let mut pending: Vec<PendingTransaction> =
            self.state.read().await.pending.values().cloned().collect();
        pending.sort_by_key(|p| p.nonce);
        Ok(pending)
    }

    async fn decision_seen(&self, decision_id: DecisionId) -> Result<bool, TradingError> {
        Ok(self.state.read().await.decisions.contains(&decision_id))
    }

    async fn append_trade(&self, trade: &ExecutedTrade) -> Result<(), TradingError> {
        self.check_writable()?;
        self.state.write().await.trades.push(trade.clone());
        Ok(())
    }

    async fn record_failure(&self, failure: &TradeFailure) -> Result<(), TradingError> {
        self.check_writable()?;
        self.state.write().await.failures.push(failure.clone());
        Ok(())
    }

    async fn save_position(&self, position: &Position) -> Result<(), TradingError> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .open
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn load_positions(&self) -> Result<Vec<Position>, TradingError> {
        Ok(self.state.read().await.open.values().cloned().collect())
    }

    async fn save_closed_position(&self, closed: &ClosedPosition) -> Result<(), TradingError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.open.remove(&closed.position.id);
        state.closed.push(closed.clone());
        Ok(())
    }

    async fn remove_position(&self, position_id: PositionId) -> Result<(), TradingError> {
        self.check_writable()?;
        self.state.write().await.open.remove(&position_id);
        Ok(())
    }

    async fn append_return(
        &self,
        strategy_id: &str,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), TradingError> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .returns
            .entry(strategy_id.to_string())
            .or_default()
            .push((at, value));
        Ok(())
    }

    async fn load_returns(
        &self,
        strategy_id: &str,
        limit: usize,
    ) -> Result<Vec<Decimal>, TradingError> {
        let returns = self.returns(strategy_id).await;
        let skip = returns.len().saturating_sub(limit);
        Ok(returns.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_writes() {
        let store = InMemoryTradeStore::new();
        store.set_fail_writes(true);
        let err = store
            .append_return("trend", Decimal::ONE, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");

        store.set_fail_writes(false);
        store.append_return("trend", Decimal::ONE, Utc::now()).await.unwrap();
        assert_eq!(store.returns("trend").await, vec![Decimal::ONE]);
    }

    #[tokio::test]
    async fn test_load_returns_keeps_latest() {
        let store = InMemoryTradeStore::new();
        for v in 1..=4 {
            store
                .append_return("rsi", Decimal::from(v), Utc::now())
                .await
                .unwrap();
        }
        let latest = store.load_returns("rsi", 2).await.unwrap();
        assert_eq!(latest, vec![Decimal::from(3), Decimal::from(4)]);
        assert!(store.load_returns("macd", 2).await.unwrap().is_empty());
    }
}
