//! Strategy return history.

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

/// One realized return credited to a strategy.
#[derive(Debug, Clone)]
pub struct ReturnRecord {
    pub strategy_id: String,
    pub value: Decimal,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl ReturnRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            strategy_id: row.try_get("strategy_id")?,
            value: row.try_get("value")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

/// Repository for per-strategy returns.
#[derive(Clone)]
pub struct ReturnRepository {
    pool: Arc<PgPool>,
}

impl ReturnRepository {
    /// Creates a new ReturnRepository.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Appends one return.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn insert(&self, record: &ReturnRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO strategy_returns (strategy_id, value, recorded_at) VALUES ($1, $2, $3)",
        )
        .bind(&record.strategy_id)
        .bind(record.value)
        .bind(record.recorded_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// The latest `limit` returns for a strategy, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn history(
        &self,
        strategy_id: &str,
        limit: i64,
    ) -> Result<Vec<ReturnRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT strategy_id, value, recorded_at FROM strategy_returns
                WHERE strategy_id = $1
                ORDER BY recorded_at DESC
                LIMIT $2
            ) latest
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(strategy_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.iter().map(ReturnRecord::from_row).collect()
    }
}
