//! Position repository: the open book and the closed history.

use super::columns::{bytes_to_hash, enum_to_text, hash_to_bytes, text_to_enum};
use dexbot_domain::TradingError;
use dexbot_domain::entities::{ClosedPosition, Position, PositionId};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Database record for an open position.
#[derive(Debug, Clone)]
pub struct PositionRecord {
    pub id: Uuid,
    /// `long` or `short`.
    pub side: String,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    pub strategy_ids: Vec<String>,
    pub entry_tx: Option<Vec<u8>>,
}

impl PositionRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            side: row.try_get("side")?,
            entry_price: row.try_get("entry_price")?,
            size: row.try_get("size")?,
            stop_loss: row.try_get("stop_loss")?,
            take_profit: row.try_get("take_profit")?,
            opened_at: row.try_get("opened_at")?,
            strategy_ids: row.try_get("strategy_ids")?,
            entry_tx: row.try_get("entry_tx")?,
        })
    }

    pub fn from_position(position: &Position) -> Result<Self, TradingError> {
        Ok(Self {
            id: position.id.0,
            side: enum_to_text(&position.side)?,
            entry_price: position.entry_price,
            size: position.size,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            opened_at: position.opened_at,
            strategy_ids: position.strategy_ids.clone(),
            entry_tx: position.entry_tx.as_ref().map(hash_to_bytes),
        })
    }

    pub fn into_position(self) -> Result<Position, TradingError> {
        Ok(Position {
            id: PositionId(self.id),
            side: text_to_enum("side", &self.side)?,
            entry_price: self.entry_price,
            size: self.size,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            opened_at: self.opened_at,
            strategy_ids: self.strategy_ids,
            entry_tx: self
                .entry_tx
                .as_deref()
                .map(|bytes| bytes_to_hash("entry_tx", bytes))
                .transpose()?,
        })
    }
}

/// Database record for a closed position.
#[derive(Debug, Clone)]
pub struct ClosedPositionRecord {
    pub position: PositionRecord,
    pub exit_price: Decimal,
    pub exit_time: chrono::DateTime<chrono::Utc>,
    pub pnl: Decimal,
    pub return_pct: Decimal,
    /// `stop_loss`, `take_profit` or `manual`.
    pub reason: String,
}

impl ClosedPositionRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            position: PositionRecord::from_row(row)?,
            exit_price: row.try_get("exit_price")?,
            exit_time: row.try_get("exit_time")?,
            pnl: row.try_get("pnl")?,
            return_pct: row.try_get("return_pct")?,
            reason: row.try_get("reason")?,
        })
    }

    pub fn from_closed(closed: &ClosedPosition) -> Result<Self, TradingError> {
        Ok(Self {
            position: PositionRecord::from_position(&closed.position)?,
            exit_price: closed.exit_price,
            exit_time: closed.exit_time,
            pnl: closed.pnl,
            return_pct: closed.return_pct,
            reason: closed.reason.as_str().to_string(),
        })
    }

    pub fn into_closed(self) -> Result<ClosedPosition, TradingError> {
        Ok(ClosedPosition {
            reason: text_to_enum("reason", &self.reason)?,
            position: self.position.into_position()?,
            exit_price: self.exit_price,
            exit_time: self.exit_time,
            pnl: self.pnl,
            return_pct: self.return_pct,
        })
    }
}

/// Repository for position persistence.
#[derive(Clone)]
pub struct PositionRepository {
    pool: Arc<PgPool>,
}

impl PositionRepository {
    /// Creates a new PositionRepository.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates or updates an open position.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn upsert(&self, record: &PositionRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO open_positions (id, side, entry_price, size, stop_loss, take_profit,
                                        opened_at, strategy_ids, entry_tx)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                size = EXCLUDED.size,
                stop_loss = EXCLUDED.stop_loss,
                take_profit = EXCLUDED.take_profit,
                strategy_ids = EXCLUDED.strategy_ids,
                entry_tx = EXCLUDED.entry_tx,
                updated_at = NOW()
            "#,
        )
        .bind(record.id)
        .bind(&record.side)
        .bind(record.entry_price)
        .bind(record.size)
        .bind(record.stop_loss)
        .bind(record.take_profit)
        .bind(record.opened_at)
        .bind(&record.strategy_ids)
        .bind(&record.entry_tx)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Loads every open position, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_open(&self) -> Result<Vec<PositionRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM open_positions ORDER BY opened_at ASC")
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.iter().map(PositionRecord::from_row).collect()
    }

    /// Moves a position into the closed history in one transaction.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn close(&self, record: &ClosedPositionRecord) -> Result<(), sqlx::Error> {
        let p = &record.position;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM open_positions WHERE id = $1")
            .bind(p.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO closed_positions (id, side, entry_price, size, stop_loss, take_profit,
                                          opened_at, strategy_ids, entry_tx, exit_price,
                                          exit_time, pnl, return_pct, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(p.id)
        .bind(&p.side)
        .bind(p.entry_price)
        .bind(p.size)
        .bind(p.stop_loss)
        .bind(p.take_profit)
        .bind(p.opened_at)
        .bind(&p.strategy_ids)
        .bind(&p.entry_tx)
        .bind(record.exit_price)
        .bind(record.exit_time)
        .bind(record.pnl)
        .bind(record.return_pct)
        .bind(&record.reason)
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }

    /// Deletes an open position. Returns whether a row existed.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM open_positions WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recently closed positions, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn closed_history(&self, limit: i64) -> Result<Vec<ClosedPositionRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM closed_positions ORDER BY exit_time DESC LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.iter().map(ClosedPositionRecord::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexbot_domain::TxHash;
    use dexbot_domain::enums::{CloseReason, PositionStatus, Side};

    fn short() -> Position {
        Position::new(
            Side::Short,
            Decimal::new(2000, 0),
            Decimal::new(5, 1),
            Decimal::new(2100, 0),
            Decimal::new(1800, 0),
        )
        .unwrap()
        .with_strategies(vec!["macd".into()])
        .with_entry_tx(TxHash::repeat_byte(5))
    }

    #[test]
    fn test_position_columns() {
        let record = PositionRecord::from_position(&short()).unwrap();
        assert_eq!(record.side, "short");
        assert_eq!(record.entry_tx.as_ref().map(Vec::len), Some(32));
        assert_eq!(record.into_position().unwrap().strategy_ids, vec!["macd"]);
    }

    #[test]
    fn test_closed_reason_columns() {
        let closed = short().close(Decimal::new(1790, 0), CloseReason::TakeProfit);
        let record = ClosedPositionRecord::from_closed(&closed).unwrap();
        assert_eq!(record.reason, "take_profit");
        let decoded = record.into_closed().unwrap();
        assert_eq!(decoded.status(), PositionStatus::TookProfit);
        assert_eq!(decoded.pnl, closed.pnl);
    }
}
