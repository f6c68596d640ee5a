//! Column encodings shared by the repositories.
//!
//! Hashes are stored as `BYTEA`, raw token amounts as decimal `TEXT` (they
//! exceed `NUMERIC` precision in `rust_decimal`) and enums by their serde name.

use dexbot_domain::{TokenAmount, TradingError, TxHash};
use primitive_types::U256;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub(crate) fn corrupt(column: &str, detail: impl std::fmt::Display) -> TradingError {
    TradingError::Storage(format!("corrupt {column} column: {detail}"))
}

pub(crate) fn hash_to_bytes(hash: &TxHash) -> Vec<u8> {
    hash.as_bytes().to_vec()
}

pub(crate) fn bytes_to_hash(column: &str, bytes: &[u8]) -> Result<TxHash, TradingError> {
    if bytes.len() != TxHash::len_bytes() {
        return Err(corrupt(column, format!("{} bytes, expected 32", bytes.len())));
    }
    Ok(TxHash::from_slice(bytes))
}

pub(crate) fn amount_to_text(amount: &TokenAmount) -> String {
    amount.0.to_string()
}

pub(crate) fn text_to_amount(column: &str, text: &str) -> Result<TokenAmount, TradingError> {
    U256::from_dec_str(text)
        .map(TokenAmount)
        .map_err(|e| corrupt(column, format!("{text:?}: {e:?}")))
}

pub(crate) fn enum_to_text<T: Serialize>(value: &T) -> Result<String, TradingError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(TradingError::Storage(format!(
            "expected a unit variant, got {other}"
        ))),
        Err(e) => Err(TradingError::Storage(e.to_string())),
    }
}

pub(crate) fn text_to_enum<T: DeserializeOwned>(column: &str, text: &str) -> Result<T, TradingError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| corrupt(column, e))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, TradingError> {
    serde_json::to_value(value).map_err(|e| TradingError::Storage(e.to_string()))
}

pub(crate) fn from_json<T: DeserializeOwned>(
    column: &str,
    value: serde_json::Value,
) -> Result<T, TradingError> {
    serde_json::from_value(value).map_err(|e| corrupt(column, e))
}

pub(crate) fn to_bigint(column: &str, value: u64) -> Result<i64, TradingError> {
    i64::try_from(value).map_err(|_| TradingError::Storage(format!("{column} {value} overflows BIGINT")))
}

pub(crate) fn from_bigint(column: &str, value: i64) -> Result<u64, TradingError> {
    u64::try_from(value).map_err(|_| corrupt(column, format!("negative value {value}")))
}
