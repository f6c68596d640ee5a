//! Trade history repository: confirmed swaps and failed decisions.

use super::columns::{
    amount_to_text, bytes_to_hash, enum_to_text, from_bigint, hash_to_bytes, text_to_amount,
    text_to_enum, to_bigint,
};
use dexbot_domain::TradingError;
use dexbot_domain::entities::{DecisionId, ExecutedTrade, TradeFailure};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Database record for a confirmed swap.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub tx_hash: Vec<u8>,
    pub decision_id: Uuid,
    pub amount_in: String,
    pub amount_out: String,
    pub gas_used: i64,
    /// Realized PnL for closing trades.
    pub pnl: Option<Decimal>,
    pub confirmed_at: chrono::DateTime<chrono::Utc>,
}

impl TradeRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx_hash: row.try_get("tx_hash")?,
            decision_id: row.try_get("decision_id")?,
            amount_in: row.try_get("amount_in")?,
            amount_out: row.try_get("amount_out")?,
            gas_used: row.try_get("gas_used")?,
            pnl: row.try_get("pnl")?,
            confirmed_at: row.try_get("confirmed_at")?,
        })
    }

    pub fn from_trade(trade: &ExecutedTrade) -> Result<Self, TradingError> {
        Ok(Self {
            tx_hash: hash_to_bytes(&trade.tx_id),
            decision_id: trade.decision_ref.0,
            amount_in: amount_to_text(&trade.amount_in),
            amount_out: amount_to_text(&trade.amount_out),
            gas_used: to_bigint("gas_used", trade.gas_used)?,
            pnl: trade.pnl,
            confirmed_at: trade.confirmed_at,
        })
    }

    pub fn into_trade(self) -> Result<ExecutedTrade, TradingError> {
        Ok(ExecutedTrade {
            tx_id: bytes_to_hash("tx_hash", &self.tx_hash)?,
            decision_ref: DecisionId(self.decision_id),
            amount_in: text_to_amount("amount_in", &self.amount_in)?,
            amount_out: text_to_amount("amount_out", &self.amount_out)?,
            gas_used: from_bigint("gas_used", self.gas_used)?,
            confirmed_at: self.confirmed_at,
            pnl: self.pnl,
        })
    }
}

/// Database record for a decision that failed after approval.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub tx_hash: Option<Vec<u8>>,
    pub decision_id: Uuid,
    /// Rejection code name, e.g. `CONTRACT_REVERTED`.
    pub code: String,
    pub message: String,
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

impl FailureRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx_hash: row.try_get("tx_hash")?,
            decision_id: row.try_get("decision_id")?,
            code: row.try_get("code")?,
            message: row.try_get("message")?,
            failed_at: row.try_get("failed_at")?,
        })
    }

    pub fn from_failure(failure: &TradeFailure) -> Result<Self, TradingError> {
        Ok(Self {
            tx_hash: failure.tx_id.as_ref().map(hash_to_bytes),
            decision_id: failure.decision_ref.0,
            code: enum_to_text(&failure.code)?,
            message: failure.message.clone(),
            failed_at: failure.failed_at,
        })
    }

    pub fn into_failure(self) -> Result<TradeFailure, TradingError> {
        Ok(TradeFailure {
            tx_id: self
                .tx_hash
                .as_deref()
                .map(|bytes| bytes_to_hash("tx_hash", bytes))
                .transpose()?,
            decision_ref: DecisionId(self.decision_id),
            code: text_to_enum("code", &self.code)?,
            message: self.message,
            failed_at: self.failed_at,
        })
    }
}

/// Repository for the append-only trade and failure logs.
#[derive(Clone)]
pub struct TradeRepository {
    pool: Arc<PgPool>,
}

impl TradeRepository {
    /// Creates a new TradeRepository.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Appends a confirmed trade. A trade already recorded for the same
    /// hash is left unchanged.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn insert_trade(&self, record: &TradeRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO executed_trades (tx_hash, decision_id, amount_in, amount_out, gas_used,
                                         pnl, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(&record.tx_hash)
        .bind(record.decision_id)
        .bind(&record.amount_in)
        .bind(&record.amount_out)
        .bind(record.gas_used)
        .bind(record.pnl)
        .bind(record.confirmed_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Appends a failure.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn insert_failure(&self, record: &FailureRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trade_failures (tx_hash, decision_id, code, message, failed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.tx_hash)
        .bind(record.decision_id)
        .bind(&record.code)
        .bind(&record.message)
        .bind(record.failed_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Most recent trades, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM executed_trades ORDER BY confirmed_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.iter().map(TradeRecord::from_row).collect()
    }

    /// Failures recorded for one decision.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn failures_for(&self, decision_id: Uuid) -> Result<Vec<FailureRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM trade_failures WHERE decision_id = $1 ORDER BY failed_at ASC",
        )
        .bind(decision_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.iter().map(FailureRecord::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dexbot_domain::{RejectionCode, TokenAmount, TxHash};

    #[test]
    fn test_failure_without_tx() {
        let failure = TradeFailure::new(
            None,
            DecisionId::new(),
            RejectionCode::QuoteFailed,
            "router unreachable",
        );
        let record = FailureRecord::from_failure(&failure).unwrap();
        assert!(record.tx_hash.is_none());
        assert_eq!(record.code, "QUOTE_FAILED");
        assert_eq!(record.into_failure().unwrap(), failure);
    }

    #[test]
    fn test_unknown_code_rejected() {
        let failure = TradeFailure::new(
            Some(TxHash::repeat_byte(1)),
            DecisionId::new(),
            RejectionCode::ContractReverted,
            "EXPIRED",
        );
        let mut record = FailureRecord::from_failure(&failure).unwrap();
        record.code = "OUT_OF_CHEESE".into();
        assert!(record.into_failure().is_err());
    }

    #[test]
    fn test_trade_pnl_kept() {
        let trade = ExecutedTrade {
            tx_id: TxHash::repeat_byte(9),
            decision_ref: DecisionId::new(),
            amount_in: TokenAmount::from(500u64),
            amount_out: TokenAmount::from(499u64),
            gas_used: 120_000,
            confirmed_at: Utc::now(),
            pnl: Some(Decimal::new(-1525, 2)),
        };
        let record = TradeRecord::from_trade(&trade).unwrap();
        assert_eq!(record.gas_used, 120_000);
        assert_eq!(record.into_trade().unwrap().pnl, trade.pnl);
    }
}
