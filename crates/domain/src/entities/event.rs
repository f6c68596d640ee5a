use crate::token::{Address, TxHash};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Normalized chain log. Delivered at least once per filter, so consumers key
/// on [`EventRecord::dedup_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub block_number: u64,
    pub address: Address,
    pub event_type: String,
    pub args: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn dedup_key(&self) -> (TxHash, u64) {
        (self.tx_hash, self.log_index)
    }

    /// `price` argument, accepted as a JSON number or decimal string.
    pub fn price(&self) -> Option<Decimal> {
        let price = match self.args.get("price")? {
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        };
        price.filter(|p| *p > Decimal::ZERO)
    }
}
