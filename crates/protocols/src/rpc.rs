//! `eth_getLogs` over HTTP JSON-RPC.

use crate::events::{EventSource, LogFilter, RawLog};
use async_trait::async_trait;
use dexbot_domain::{Address, TradingError, TxHash};
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Configuration for the JSON-RPC log source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// HTTP endpoint.
    pub url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum block span per request.
    pub max_block_range: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            timeout_ms: 10_000,
            max_block_range: 2_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<H256>,
    data: String,
    block_number: U256,
    transaction_hash: TxHash,
    log_index: U256,
    #[serde(default)]
    removed: bool,
}

/// Event source backed by a node's `eth_getLogs`.
pub struct JsonRpcLogSource {
    client: reqwest::Client,
    config: RpcConfig,
}

impl JsonRpcLogSource {
    pub fn new(config: RpcConfig) -> Result<Self, TradingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TradingError::Config(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn block_number(&self) -> Result<u64, TradingError> {
        let latest: U256 = self.call("eth_blockNumber", json!([])).await?;
        Ok(latest.low_u64())
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, TradingError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TradingError::network(method, e))?;
        if !response.status().is_success() {
            return Err(TradingError::network(
                method,
                format!("http status {}", response.status()),
            ));
        }
        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| TradingError::network(method, format!("malformed response: {e}")))?;
        match (parsed.result, parsed.error) {
            (_, Some(err)) => Err(TradingError::network(
                method,
                format!("rpc error {}: {}", err.code, err.message),
            )),
            (Some(result), None) => Ok(result),
            (None, None) => Err(TradingError::network(method, "empty result")),
        }
    }
}

/// Decodes a log into a [`RawLog`]. Arguments carry the topics and the raw
/// data words as hex strings; `Sync` logs also get `reserve0`/`reserve1`.
fn decode(log: RpcLog, event_name: &str) -> Result<RawLog, TradingError> {
    let data = hex::decode(log.data.trim_start_matches("0x"))
        .map_err(|e| TradingError::Validation(format!("log data is not hex: {e}")))?;
    let words: Vec<String> = data
        .chunks(32)
        .map(|w| format!("0x{}", hex::encode(w)))
        .collect();
    let mut args = json!({ "words": words });
    if event_name == "Sync" && data.len() == 64 {
        args["reserve0"] = json!(U256::from_big_endian(&data[..32]).to_string());
        args["reserve1"] = json!(U256::from_big_endian(&data[32..]).to_string());
    }
    Ok(RawLog {
        tx_hash: log.transaction_hash,
        log_index: log.log_index.low_u64(),
        block_number: log.block_number.low_u64(),
        address: log.address,
        topics: log.topics,
        args,
    })
}

#[async_trait]
impl EventSource for JsonRpcLogSource {
    async fn poll_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
    ) -> Result<Vec<RawLog>, TradingError> {
        let latest = self.block_number().await?;
        if from_block > latest {
            return Ok(Vec::new());
        }
        let to_block = latest.min(from_block.saturating_add(self.config.max_block_range));
        let topics = match filter.topic0 {
            Some(topic) => json!([topic]),
            None => json!([]),
        };
        let params = json!([{
            "address": filter.address,
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
            "topics": topics,
        }]);
        let logs: Vec<RpcLog> = self.call("eth_getLogs", params).await?;
        debug!(
            event = %filter.event_name,
            from_block,
            to_block,
            count = logs.len(),
            "Fetched logs"
        );

        let mut decoded = logs
            .into_iter()
            .filter(|l| !l.removed)
            .map(|l| decode(l, &filter.event_name))
            .collect::<Result<Vec<_>, _>>()?;
        decoded.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sync_log() {
        let raw = json!({
            "address": "0x00000000000000000000000000000000000000aa",
            "topics": ["0x1c411e9a96e071241c2f21f7726b17ae89e3cab4c78be50e062b03a9fffbbad1"],
            "data": format!("0x{:064x}{:064x}", 1000u64, 2_000_000u64),
            "blockNumber": "0x10",
            "transactionHash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "logIndex": "0x2",
        });
        let log: RpcLog = serde_json::from_value(raw).unwrap();
        let decoded = decode(log, "Sync").unwrap();

        assert_eq!(decoded.block_number, 16);
        assert_eq!(decoded.log_index, 2);
        assert_eq!(decoded.args["reserve0"], "1000");
        assert_eq!(decoded.args["reserve1"], "2000000");
        assert_eq!(decoded.args["words"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_rejects_non_hex_data() {
        let raw = json!({
            "address": "0x00000000000000000000000000000000000000aa",
            "topics": [],
            "data": "0xzz",
            "blockNumber": "0x1",
            "transactionHash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "logIndex": "0x0",
        });
        let log: RpcLog = serde_json::from_value(raw).unwrap();
        assert!(matches!(decode(log, "Swap"), Err(TradingError::Validation(_))));
    }
}
