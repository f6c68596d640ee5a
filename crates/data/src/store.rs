//! Postgres-backed [`TradeStore`].

use crate::repositories::{
    ClosedPositionRecord, Database, FailureRecord, PendingRecord, PositionRecord, ReturnRecord,
    TradeRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dexbot_domain::entities::{
    ClosedPosition, DecisionId, ExecutedTrade, PendingTransaction, Position, PositionId,
    TradeFailure,
};
use dexbot_domain::ports::TradeStore;
use dexbot_domain::{TradingError, TxHash};
use rust_decimal::Decimal;
use tracing::{debug, warn};

fn storage(operation: &str, e: sqlx::Error) -> TradingError {
    warn!(operation, error = %e, "Database operation failed");
    TradingError::Storage(format!("{operation}: {e}"))
}

/// Durable store over the repositories of one [`Database`].
#[derive(Clone)]
pub struct PgTradeStore {
    db: Database,
}

impl PgTradeStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connects and applies the schema.
    ///
    /// # Errors
    /// Returns a storage error if the connection or migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TradingError> {
        let db = Database::connect(database_url, max_connections)
            .await
            .map_err(|e| storage("connect", e))?;
        db.ping().await.map_err(|e| storage("ping", e))?;
        db.migrate().await.map_err(|e| storage("migrate", e))?;
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl TradeStore for PgTradeStore {
    async fn save_pending(&self, pending: &PendingTransaction) -> Result<(), TradingError> {
        let record = PendingRecord::from_pending(pending)?;
        self.db
            .pending()
            .insert(&record)
            .await
            .map_err(|e| storage("save_pending", e))?;
        debug!(tx = ?pending.tx_id, nonce = pending.nonce, "Pending transaction stored");
        Ok(())
    }

    async fn remove_pending(&self, tx_id: TxHash) -> Result<(), TradingError> {
        self.db
            .pending()
            .delete(tx_id.as_bytes())
            .await
            .map_err(|e| storage("remove_pending", e))?;
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<PendingTransaction>, TradingError> {
        self.db
            .pending()
            .find_all()
            .await
            .map_err(|e| storage("load_pending", e))?
            .into_iter()
            .map(PendingRecord::into_pending)
            .collect()
    }

    async fn decision_seen(&self, decision_id: DecisionId) -> Result<bool, TradingError> {
        self.db
            .pending()
            .decision_exists(decision_id.0)
            .await
            .map_err(|e| storage("decision_seen", e))
    }

    async fn append_trade(&self, trade: &ExecutedTrade) -> Result<(), TradingError> {
        let record = TradeRecord::from_trade(trade)?;
        self.db
            .trades()
            .insert_trade(&record)
            .await
            .map_err(|e| storage("append_trade", e))
    }

    async fn record_failure(&self, failure: &TradeFailure) -> Result<(), TradingError> {
        let record = FailureRecord::from_failure(failure)?;
        self.db
            .trades()
            .insert_failure(&record)
            .await
            .map_err(|e| storage("record_failure", e))
    }

    async fn save_position(&self, position: &Position) -> Result<(), TradingError> {
        let record = PositionRecord::from_position(position)?;
        self.db
            .positions()
            .upsert(&record)
            .await
            .map_err(|e| storage("save_position", e))
    }

    async fn load_positions(&self) -> Result<Vec<Position>, TradingError> {
        self.db
            .positions()
            .find_open()
            .await
            .map_err(|e| storage("load_positions", e))?
            .into_iter()
            .map(PositionRecord::into_position)
            .collect()
    }

    async fn save_closed_position(&self, closed: &ClosedPosition) -> Result<(), TradingError> {
        let record = ClosedPositionRecord::from_closed(closed)?;
        self.db
            .positions()
            .close(&record)
            .await
            .map_err(|e| storage("save_closed_position", e))
    }

    async fn remove_position(&self, position_id: PositionId) -> Result<(), TradingError> {
        self.db
            .positions()
            .delete(position_id.0)
            .await
            .map_err(|e| storage("remove_position", e))?;
        Ok(())
    }

    async fn append_return(
        &self,
        strategy_id: &str,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), TradingError> {
        let record = ReturnRecord {
            strategy_id: strategy_id.to_string(),
            value,
            recorded_at: at,
        };
        self.db
            .returns()
            .insert(&record)
            .await
            .map_err(|e| storage("append_return", e))
    }

    async fn load_returns(
        &self,
        strategy_id: &str,
        limit: usize,
    ) -> Result<Vec<Decimal>, TradingError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = self
            .db
            .returns()
            .history(strategy_id, limit)
            .await
            .map_err(|e| storage("load_returns", e))?;
        Ok(records.into_iter().map(|r| r.value).collect())
    }
}
