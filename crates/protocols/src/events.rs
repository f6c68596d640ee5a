//! Event source contract.

use async_trait::async_trait;
use dexbot_domain::{Address, TradingError, TxHash};
use primitive_types::H256;
use serde::{Deserialize, Serialize};

/// One (contract, event) subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFilter {
    /// Emitting contract.
    pub address: Address,
    /// Event name, copied into every record.
    pub event_name: String,
    /// Event signature topic. `None` matches every event of the contract.
    #[serde(default)]
    pub topic0: Option<H256>,
}

impl LogFilter {
    pub fn new(address: Address, event_name: impl Into<String>) -> Self {
        Self {
            address,
            event_name: event_name.into(),
            topic0: None,
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic0: H256) -> Self {
        self.topic0 = Some(topic0);
        self
    }
}

/// A log as returned by the source, with arguments already decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLog {
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub block_number: u64,
    pub address: Address,
    pub topics: Vec<H256>,
    pub args: serde_json::Value,
}

/// Source of chain logs.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Logs matching `filter` in blocks `>= from_block`, in emission order.
    async fn poll_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
    ) -> Result<Vec<RawLog>, TradingError>;
}
