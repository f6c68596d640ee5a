//! Adapters between the engine and the outside world.
//!
//! This crate defines the collaborator contracts the engine consumes:
//! - [`ChainClient`]: quotes, allowances, submission, receipts, nonces
//! - [`EventSource`]: raw log polling per filter
//! - [`PredictionOracle`]: opaque model score in [-1, 1]
//!
//! It also ships the retry policy used at every read call site, the signing
//! wallet, an in-memory [`PaperChain`] and an `eth_getLogs` log source.

/// Chain client contract and transaction envelopes.
pub mod chain;
/// Event source contract and raw logs.
pub mod events;
/// Prediction oracle contract.
pub mod oracle;
/// In-memory constant-product chain.
pub mod paper;
/// Retry policy for read-only calls.
pub mod retry;
/// JSON-RPC log source.
pub mod rpc;
/// Signing wallet.
pub mod wallet;

pub use chain::{
    ApprovalRequest, ChainClient, Receipt, ReceiptStatus, SignedTransaction, SwapRequest,
    TxPayload, TxRequest,
};
pub use events::{EventSource, LogFilter, RawLog};
pub use oracle::{LinearOracle, PredictionOracle};
pub use paper::PaperChain;
pub use retry::{Backoff, RetryPolicy};
pub use rpc::{JsonRpcLogSource, RpcConfig};
pub use wallet::Wallet;
