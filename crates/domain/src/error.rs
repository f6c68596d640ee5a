//! Error taxonomy and stable rejection codes.
//!
//! Consumers branch on [`TradingError::code`] and [`RejectionCode`], never on
//! message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised across the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradingError {
    /// Transient transport failure (RPC timeout, dropped connection).
    #[error("network error during {operation}: {message}")]
    Network {
        /// Operation that failed.
        operation: String,
        /// Transport message.
        message: String,
    },
    /// On-chain revert.
    #[error("contract error: {0}")]
    Contract(String),
    /// Malformed or out-of-range input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Oracle returned NaN or an out-of-range score.
    #[error("model error: {0}")]
    Model(String),
    /// A deadline was exceeded.
    #[error("{operation} timed out after {elapsed_ms} ms")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Elapsed time in milliseconds.
        elapsed_ms: u64,
    },
    /// Persistence port failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl TradingError {
    /// Creates a network error.
    pub fn network(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Network {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Contract(_) => "CONTRACT_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Model(_) => "MODEL_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Only transport failures of idempotent reads are worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Stable reason codes for rejected decisions and failed trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    NoAction,
    InvalidSize,
    LowConfidence,
    MaxPositions,
    MaxExposure,
    RiskTimeout,
    DuplicateDecision,
    CircuitOpen,
    GasTooHigh,
    QuoteFailed,
    SlippageExceeded,
    ApprovalFailed,
    SubmitFailed,
    ContractReverted,
    StorageFailed,
    ValidationFailed,
    RuleRejected,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAction => "NO_ACTION",
            Self::InvalidSize => "INVALID_SIZE",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::MaxPositions => "MAX_POSITIONS",
            Self::MaxExposure => "MAX_EXPOSURE",
            Self::RiskTimeout => "RISK_TIMEOUT",
            Self::DuplicateDecision => "DUPLICATE_DECISION",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::GasTooHigh => "GAS_TOO_HIGH",
            Self::QuoteFailed => "QUOTE_FAILED",
            Self::SlippageExceeded => "SLIPPAGE_EXCEEDED",
            Self::ApprovalFailed => "APPROVAL_FAILED",
            Self::SubmitFailed => "SUBMIT_FAILED",
            Self::ContractReverted => "CONTRACT_REVERTED",
            Self::StorageFailed => "STORAGE_FAILED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::RuleRejected => "RULE_REJECTED",
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An expected, non-exceptional refusal to trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct Rejection {
    /// Stable code.
    pub code: RejectionCode,
    /// Human-readable detail.
    pub message: String,
}

impl Rejection {
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wraps an error under a rejection code, keeping the error code in the message.
    pub fn from_error(code: RejectionCode, error: &TradingError) -> Self {
        Self::new(code, format!("[{}] {}", error.code(), error))
    }
}
