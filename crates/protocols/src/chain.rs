//! Chain client contract.
//!
//! Reads are idempotent and may be retried by the caller. Submissions are
//! never retried: a failed `send_*` surfaces as a failed trade.

use async_trait::async_trait;
use dexbot_domain::{Address, TokenAmount, TradingError, TxHash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// ERC-20 style approval of `spender` for `amount` of `token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Token being approved.
    pub token: Address,
    /// Router allowed to pull the tokens.
    pub spender: Address,
    /// Approved amount.
    pub amount: TokenAmount,
}

/// Exact-input swap through a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Router contract.
    pub router: Address,
    /// Swap path, input token first.
    pub path: Vec<Address>,
    /// Exact input amount.
    pub amount_in: TokenAmount,
    /// Revert if the output is below this amount.
    pub min_amount_out: TokenAmount,
    /// Receiver of the output tokens.
    pub recipient: Address,
    /// Unix timestamp after which the swap reverts.
    pub deadline: u64,
}

impl SwapRequest {
    /// Input token.
    pub fn token_in(&self) -> Option<Address> {
        self.path.first().copied()
    }

    /// Output token.
    pub fn token_out(&self) -> Option<Address> {
        self.path.last().copied()
    }
}

/// Call carried by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxPayload {
    Approve(ApprovalRequest),
    Swap(SwapRequest),
}

/// Unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub from: Address,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub payload: TxPayload,
}

/// Transaction signed by a [`crate::Wallet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub request: TxRequest,
    pub signature: Vec<u8>,
    /// Hash of request and signature, used as the transaction id.
    pub hash: TxHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Mined transaction outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    pub gas_used: u64,
    pub block_number: u64,
    /// Output amount decoded from the swap logs, when available.
    pub amount_out: Option<TokenAmount>,
    /// Revert reason, when the node reports one.
    pub revert_reason: Option<String>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Chain access used by the trade executor.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Expected output of swapping `amount_in` along `path`.
    async fn get_quote(
        &self,
        amount_in: TokenAmount,
        path: &[Address],
    ) -> Result<TokenAmount, TradingError>;

    /// Token balance of `owner`.
    async fn get_balance(&self, token: Address, owner: Address)
    -> Result<TokenAmount, TradingError>;

    /// Amount `spender` may pull from `owner`.
    async fn get_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount, TradingError>;

    /// Broadcasts a signed approval.
    async fn send_approval(&self, tx: &SignedTransaction) -> Result<TxHash, TradingError>;

    /// Broadcasts a signed swap.
    async fn send_swap(&self, tx: &SignedTransaction) -> Result<TxHash, TradingError>;

    /// Receipt of `tx`, or `None` while it is still pending.
    async fn get_receipt(&self, tx: TxHash) -> Result<Option<Receipt>, TradingError>;

    /// Next nonce of `address` as seen by the chain.
    async fn get_nonce(&self, address: Address) -> Result<u64, TradingError>;

    /// Current gas price in wei.
    async fn get_gas_price(&self) -> Result<U256, TradingError>;

    /// Latest block timestamp in seconds.
    async fn chain_time(&self) -> Result<u64, TradingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_path_ends() {
        let swap = SwapRequest {
            router: Address::repeat_byte(9),
            path: vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            amount_in: TokenAmount::from(10u64),
            min_amount_out: TokenAmount::zero(),
            recipient: Address::zero(),
            deadline: 0,
        };
        assert_eq!(swap.token_in(), Some(Address::repeat_byte(1)));
        assert_eq!(swap.token_out(), Some(Address::repeat_byte(2)));
    }
}
