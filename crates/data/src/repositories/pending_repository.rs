//! Pending transaction repository.

use super::columns::{
    amount_to_text, bytes_to_hash, from_bigint, from_json, hash_to_bytes, text_to_amount,
    to_bigint, to_json,
};
use dexbot_domain::TradingError;
use dexbot_domain::entities::{DecisionId, PendingTransaction};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Database record for a submitted, unconfirmed swap.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    /// Transaction hash bytes.
    pub tx_hash: Vec<u8>,
    /// Decision the swap executes.
    pub decision_id: Uuid,
    /// Trade intent as JSON.
    pub intent: serde_json::Value,
    /// Input token as JSON.
    pub token_in: serde_json::Value,
    /// Output token as JSON.
    pub token_out: serde_json::Value,
    pub amount_in: String,
    pub expected_amount_out: String,
    pub min_amount_out: String,
    pub nonce: i64,
    pub deadline: i64,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl PendingRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx_hash: row.try_get("tx_hash")?,
            decision_id: row.try_get("decision_id")?,
            intent: row.try_get("intent")?,
            token_in: row.try_get("token_in")?,
            token_out: row.try_get("token_out")?,
            amount_in: row.try_get("amount_in")?,
            expected_amount_out: row.try_get("expected_amount_out")?,
            min_amount_out: row.try_get("min_amount_out")?,
            nonce: row.try_get("nonce")?,
            deadline: row.try_get("deadline")?,
            submitted_at: row.try_get("submitted_at")?,
        })
    }

    /// Encodes a pending transaction.
    pub fn from_pending(pending: &PendingTransaction) -> Result<Self, TradingError> {
        Ok(Self {
            tx_hash: hash_to_bytes(&pending.tx_id),
            decision_id: pending.decision_ref.0,
            intent: to_json(&pending.intent)?,
            token_in: to_json(&pending.token_in)?,
            token_out: to_json(&pending.token_out)?,
            amount_in: amount_to_text(&pending.amount_in),
            expected_amount_out: amount_to_text(&pending.expected_amount_out),
            min_amount_out: amount_to_text(&pending.min_amount_out),
            nonce: to_bigint("nonce", pending.nonce)?,
            deadline: to_bigint("deadline", pending.deadline)?,
            submitted_at: pending.submitted_at,
        })
    }

    /// Decodes the record.
    pub fn into_pending(self) -> Result<PendingTransaction, TradingError> {
        Ok(PendingTransaction {
            tx_id: bytes_to_hash("tx_hash", &self.tx_hash)?,
            decision_ref: DecisionId(self.decision_id),
            intent: from_json("intent", self.intent)?,
            token_in: from_json("token_in", self.token_in)?,
            token_out: from_json("token_out", self.token_out)?,
            amount_in: text_to_amount("amount_in", &self.amount_in)?,
            expected_amount_out: text_to_amount("expected_amount_out", &self.expected_amount_out)?,
            min_amount_out: text_to_amount("min_amount_out", &self.min_amount_out)?,
            nonce: from_bigint("nonce", self.nonce)?,
            deadline: from_bigint("deadline", self.deadline)?,
            submitted_at: self.submitted_at,
        })
    }
}

/// Repository for pending transactions and the submitted-decision set.
#[derive(Clone)]
pub struct PendingRepository {
    pool: Arc<PgPool>,
}

impl PendingRepository {
    /// Creates a new PendingRepository.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a pending transaction and marks its decision as submitted, in
    /// one transaction.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn insert(&self, record: &PendingRecord) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO submitted_decisions (decision_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(record.decision_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO pending_transactions (tx_hash, decision_id, intent, token_in, token_out,
                                              amount_in, expected_amount_out, min_amount_out,
                                              nonce, deadline, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(&record.tx_hash)
        .bind(record.decision_id)
        .bind(&record.intent)
        .bind(&record.token_in)
        .bind(&record.token_out)
        .bind(&record.amount_in)
        .bind(&record.expected_amount_out)
        .bind(&record.min_amount_out)
        .bind(record.nonce)
        .bind(record.deadline)
        .bind(record.submitted_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }

    /// Deletes a pending transaction. Returns whether a row existed.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn delete(&self, tx_hash: &[u8]) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM pending_transactions WHERE tx_hash = $1")
            .bind(tx_hash)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Loads every pending transaction in nonce order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_all(&self) -> Result<Vec<PendingRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM pending_transactions ORDER BY nonce ASC")
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.iter().map(PendingRecord::from_row).collect()
    }

    /// Whether a decision was ever submitted.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn decision_exists(&self, decision_id: Uuid) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM submitted_decisions WHERE decision_id = $1) AS seen",
        )
        .bind(decision_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        row.try_get("seen")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dexbot_domain::entities::TradeIntent;
    use dexbot_domain::enums::Side;
    use dexbot_domain::{Address, Token, TokenAmount, TxHash};
    use primitive_types::U256;
    use rust_decimal::Decimal;

    fn pending() -> PendingTransaction {
        PendingTransaction {
            tx_id: TxHash::repeat_byte(3),
            decision_ref: DecisionId::new(),
            intent: TradeIntent::Open {
                side: Side::Long,
                stop_loss: Decimal::new(1900, 0),
                take_profit: Decimal::new(2200, 0),
                strategy_ids: vec!["trend".into(), "rsi".into()],
            },
            token_in: Token::new(Address::repeat_byte(1), "USDC", 6),
            token_out: Token::new(Address::repeat_byte(2), "WETH", 18),
            amount_in: TokenAmount::from(1_000_000_000u64),
            expected_amount_out: TokenAmount(U256::exp10(18) / 2),
            min_amount_out: TokenAmount(U256::exp10(17) * 4),
            nonce: 12,
            deadline: 1_700_000_300,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_preserves_pending() {
        let original = pending();
        let record = PendingRecord::from_pending(&original).unwrap();
        assert_eq!(record.tx_hash.len(), 32);
        assert_eq!(record.intent["kind"], "open");
        assert_eq!(record.into_pending().unwrap(), original);
    }

    #[test]
    fn test_corrupt_amount_is_storage_error() {
        let mut record = PendingRecord::from_pending(&pending()).unwrap();
        record.min_amount_out = "-5".into();
        let err = record.into_pending().unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}
