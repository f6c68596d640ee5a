//! In-memory chain for paper trading and tests.
//!
//! Each registered pair is one constant-product pool whose address is the
//! pair's router. Swaps settle against the pool reserves with the same
//! integer math an AMM contract uses, so slippage bounds, allowances,
//! deadlines and nonces behave as they would on chain.

use crate::chain::{
    ChainClient, Receipt, ReceiptStatus, SignedTransaction, SwapRequest, TxPayload,
};
use crate::events::{EventSource, LogFilter, RawLog};
use async_trait::async_trait;
use chrono::Utc;
use dexbot_domain::math::constant_product::{calculate_out_amount, swap_exact_in};
use dexbot_domain::{Address, Token, TokenAmount, TradingError, TradingPair, TxHash};
use primitive_types::{H256, U256};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

const APPROVAL_GAS: u64 = 46_000;
const SWAP_GAS: u64 = 120_000;

/// Topic used for paper logs of `event_name`.
pub fn event_topic(event_name: &str) -> H256 {
    H256::from_slice(&Sha256::digest(event_name.as_bytes()))
}

#[derive(Debug, Clone)]
struct PaperPool {
    router: Address,
    base: Token,
    quote: Token,
    reserve_base: U256,
    reserve_quote: U256,
    fee_bps: u32,
}

impl PaperPool {
    fn reserves_for(&self, token_in: Address, token_out: Address) -> Option<(U256, U256)> {
        if token_in == self.base.address && token_out == self.quote.address {
            Some((self.reserve_base, self.reserve_quote))
        } else if token_in == self.quote.address && token_out == self.base.address {
            Some((self.reserve_quote, self.reserve_base))
        } else {
            None
        }
    }

    /// Quote per base in human units.
    fn price(&self) -> Option<Decimal> {
        let base = self.base.from_raw(TokenAmount(self.reserve_base)).ok()?;
        let quote = self.quote.from_raw(TokenAmount(self.reserve_quote)).ok()?;
        if base.is_zero() {
            return None;
        }
        Some(quote / base)
    }
}

#[derive(Debug)]
struct PaperState {
    pools: Vec<PaperPool>,
    /// (token, owner) -> balance
    balances: HashMap<(Address, Address), U256>,
    /// (token, owner, spender) -> allowance
    allowances: HashMap<(Address, Address, Address), U256>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    queued: Vec<SignedTransaction>,
    logs: Vec<RawLog>,
    block_number: u64,
    time: u64,
    gas_price: U256,
    auto_mine: bool,
    quote_calls: u32,
    failing_quotes: u32,
    failing_receipts: u32,
    failing_submits: u32,
    revert_next_swap: bool,
}

/// Simulated chain implementing [`ChainClient`] and [`EventSource`].
#[derive(Debug)]
pub struct PaperChain {
    state: Mutex<PaperState>,
}

impl Default for PaperChain {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState {
                pools: Vec::new(),
                balances: HashMap::new(),
                allowances: HashMap::new(),
                nonces: HashMap::new(),
                receipts: HashMap::new(),
                queued: Vec::new(),
                logs: Vec::new(),
                block_number: 1,
                time: u64::try_from(Utc::now().timestamp()).unwrap_or_default(),
                gas_price: U256::from(20_000_000_000u64),
                auto_mine: true,
                quote_calls: 0,
                failing_quotes: 0,
                failing_receipts: 0,
                failing_submits: 0,
                revert_next_swap: false,
            }),
        }
    }

    /// Registers a pool for `pair` seeded with human-unit reserves.
    pub async fn add_pool(
        &self,
        pair: &TradingPair,
        reserve_base: Decimal,
        reserve_quote: Decimal,
        fee_bps: u32,
    ) -> Result<(), TradingError> {
        let pool = PaperPool {
            router: pair.router,
            base: pair.base.clone(),
            quote: pair.quote.clone(),
            reserve_base: pair.base.to_raw(reserve_base)?.0,
            reserve_quote: pair.quote.to_raw(reserve_quote)?.0,
            fee_bps,
        };
        info!(pair = %pair.symbol(), price = ?pool.price(), "Paper pool added");
        let mut state = self.state.lock().await;
        state.pools.retain(|p| p.router != pair.router);
        state.pools.push(pool);
        Ok(())
    }

    /// Credits `amount` (human units) of `token` to `owner`.
    pub async fn fund(
        &self,
        owner: Address,
        token: &Token,
        amount: Decimal,
    ) -> Result<(), TradingError> {
        let raw = token.to_raw(amount)?.0;
        let mut state = self.state.lock().await;
        let balance = state.balances.entry((token.address, owner)).or_default();
        *balance = balance.saturating_add(raw);
        Ok(())
    }

    /// Moves the pool to `price` by resizing the quote reserve, emitting a
    /// `Sync` log.
    pub async fn set_price(&self, router: Address, price: Decimal) -> Result<(), TradingError> {
        let mut state = self.state.lock().await;
        let pool = state
            .pools
            .iter_mut()
            .find(|p| p.router == router)
            .ok_or_else(|| TradingError::Validation(format!("no paper pool at {router:?}")))?;
        let base = pool.base.from_raw(TokenAmount(pool.reserve_base))?;
        pool.reserve_quote = pool.quote.to_raw(base * price)?.0;
        debug!(router = ?router, %price, "Paper price moved");
        state.emit(router, "Sync", serde_json::json!({ "price": price.to_string() }), None);
        Ok(())
    }

    /// Current pool price, quote per base.
    pub async fn price(&self, router: Address) -> Option<Decimal> {
        let state = self.state.lock().await;
        state.pools.iter().find(|p| p.router == router)?.price()
    }

    pub async fn balance_of(&self, token: Address, owner: Address) -> TokenAmount {
        let state = self.state.lock().await;
        TokenAmount(state.balances.get(&(token, owner)).copied().unwrap_or_default())
    }

    pub async fn set_gas_price(&self, gas_price: U256) {
        self.state.lock().await.gas_price = gas_price;
    }

    pub async fn advance_time(&self, seconds: u64) {
        let mut state = self.state.lock().await;
        state.time = state.time.saturating_add(seconds);
    }

    /// With auto-mining off, submissions stay pending until [`Self::mine`].
    pub async fn set_auto_mine(&self, auto_mine: bool) {
        self.state.lock().await.auto_mine = auto_mine;
    }

    /// Mines every queued transaction in submission order.
    pub async fn mine(&self) {
        let mut state = self.state.lock().await;
        let queued = std::mem::take(&mut state.queued);
        for tx in queued {
            state.execute(&tx);
        }
    }

    /// Next `count` quotes fail with a network error.
    pub async fn fail_next_quotes(&self, count: u32) {
        self.state.lock().await.failing_quotes = count;
    }

    /// Next `count` receipt reads fail with a network error.
    pub async fn fail_next_receipts(&self, count: u32) {
        self.state.lock().await.failing_receipts = count;
    }

    /// Next `count` submissions are refused by the node.
    pub async fn fail_next_submits(&self, count: u32) {
        self.state.lock().await.failing_submits = count;
    }

    /// Next mined swap reverts.
    pub async fn revert_next_swap(&self) {
        self.state.lock().await.revert_next_swap = true;
    }

    /// Number of quote calls served, failed ones included.
    pub async fn quote_calls(&self) -> u32 {
        self.state.lock().await.quote_calls
    }

    async fn submit(&self, tx: &SignedTransaction, kind: &str) -> Result<TxHash, TradingError> {
        let mut state = self.state.lock().await;
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(TradingError::network(
                format!("send_{kind}"),
                "node refused connection",
            ));
        }
        let expected = state.nonces.get(&tx.request.from).copied().unwrap_or_default();
        if tx.request.nonce != expected {
            return Err(TradingError::Validation(format!(
                "nonce mismatch for {:?}: expected {expected}, got {}",
                tx.request.from, tx.request.nonce
            )));
        }
        if state.receipts.contains_key(&tx.hash) || state.queued.iter().any(|q| q.hash == tx.hash)
        {
            return Err(TradingError::Validation(format!(
                "transaction {:?} already known",
                tx.hash
            )));
        }
        state.nonces.insert(tx.request.from, expected + 1);
        debug!(tx = ?tx.hash, nonce = tx.request.nonce, kind, "Paper transaction accepted");
        if state.auto_mine {
            state.execute(tx);
        } else {
            state.queued.push(tx.clone());
        }
        Ok(tx.hash)
    }
}

impl PaperState {
    fn emit(
        &mut self,
        address: Address,
        event_name: &str,
        args: serde_json::Value,
        tx_hash: Option<TxHash>,
    ) {
        let log_index = self
            .logs
            .iter()
            .filter(|l| l.block_number == self.block_number)
            .count() as u64;
        let tx_hash = tx_hash.unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(event_name.as_bytes());
            hasher.update(self.block_number.to_be_bytes());
            hasher.update(log_index.to_be_bytes());
            H256::from_slice(&hasher.finalize())
        });
        self.logs.push(RawLog {
            tx_hash,
            log_index,
            block_number: self.block_number,
            address,
            topics: vec![event_topic(event_name)],
            args,
        });
    }

    fn execute(&mut self, tx: &SignedTransaction) {
        let outcome = match &tx.request.payload {
            TxPayload::Approve(approval) => {
                self.allowances.insert(
                    (approval.token, tx.request.from, approval.spender),
                    approval.amount.0,
                );
                Ok((APPROVAL_GAS, None))
            }
            TxPayload::Swap(swap) => self
                .settle_swap(tx.request.from, swap, tx.hash)
                .map(|out| (SWAP_GAS, Some(out))),
        };
        let receipt = match outcome {
            Ok((gas_used, amount_out)) => Receipt {
                tx_hash: tx.hash,
                status: ReceiptStatus::Success,
                gas_used,
                block_number: self.block_number,
                amount_out,
                revert_reason: None,
            },
            Err(reason) => {
                debug!(tx = ?tx.hash, %reason, "Paper transaction reverted");
                Receipt {
                    tx_hash: tx.hash,
                    status: ReceiptStatus::Reverted,
                    gas_used: APPROVAL_GAS,
                    block_number: self.block_number,
                    amount_out: None,
                    revert_reason: Some(reason),
                }
            }
        };
        self.receipts.insert(tx.hash, receipt);
        self.block_number += 1;
    }

    fn settle_swap(
        &mut self,
        from: Address,
        swap: &SwapRequest,
        tx_hash: TxHash,
    ) -> Result<TokenAmount, String> {
        if std::mem::take(&mut self.revert_next_swap) {
            return Err("forced revert".into());
        }
        if self.time > swap.deadline {
            return Err("EXPIRED".into());
        }
        let (token_in, token_out) = match swap.path.as_slice() {
            [token_in, token_out] => (*token_in, *token_out),
            _ => return Err("unsupported path".into()),
        };
        let allowance = self
            .allowances
            .get(&(token_in, from, swap.router))
            .copied()
            .unwrap_or_default();
        if allowance < swap.amount_in.0 {
            return Err("TRANSFER_FROM_FAILED: allowance".into());
        }
        let balance_in = self.balances.get(&(token_in, from)).copied().unwrap_or_default();
        if balance_in < swap.amount_in.0 {
            return Err("TRANSFER_FROM_FAILED: balance".into());
        }
        let pool = self
            .pools
            .iter_mut()
            .find(|p| p.router == swap.router)
            .ok_or("no pool at router")?;
        let (reserve_in, reserve_out) = pool
            .reserves_for(token_in, token_out)
            .ok_or("path does not match pool")?;
        let outcome = swap_exact_in(swap.amount_in, reserve_in, reserve_out, pool.fee_bps)
            .map_err(|e| e.to_string())?;
        let amount_out = outcome.amount_out;
        if amount_out < swap.min_amount_out {
            return Err("INSUFFICIENT_OUTPUT_AMOUNT".into());
        }

        if token_in == pool.base.address {
            (pool.reserve_base, pool.reserve_quote) = (outcome.reserve_in, outcome.reserve_out);
        } else {
            (pool.reserve_quote, pool.reserve_base) = (outcome.reserve_in, outcome.reserve_out);
        }
        let price = pool.price();
        let router = pool.router;

        self.balances.insert((token_in, from), balance_in - swap.amount_in.0);
        self.allowances
            .insert((token_in, from, swap.router), allowance - swap.amount_in.0);
        let balance_out = self.balances.entry((token_out, swap.recipient)).or_default();
        *balance_out = balance_out.saturating_add(amount_out.0);

        let mut args = serde_json::json!({
            "amount_in": swap.amount_in.to_string(),
            "amount_out": amount_out.to_string(),
        });
        if let Some(price) = price {
            args["price"] = serde_json::Value::String(price.to_string());
        }
        self.emit(router, "Swap", args, Some(tx_hash));
        Ok(amount_out)
    }
}

#[async_trait]
impl ChainClient for PaperChain {
    async fn get_quote(
        &self,
        amount_in: TokenAmount,
        path: &[Address],
    ) -> Result<TokenAmount, TradingError> {
        let mut state = self.state.lock().await;
        state.quote_calls += 1;
        if state.failing_quotes > 0 {
            state.failing_quotes -= 1;
            return Err(TradingError::network("get_quote", "upstream timeout"));
        }
        let (token_in, token_out) = match path {
            [token_in, token_out] => (*token_in, *token_out),
            _ => {
                return Err(TradingError::Validation(format!(
                    "paper chain routes single-hop paths only, got {} hops",
                    path.len().saturating_sub(1)
                )));
            }
        };
        let (reserve_in, reserve_out, fee_bps) = state
            .pools
            .iter()
            .find_map(|p| {
                p.reserves_for(token_in, token_out)
                    .map(|(i, o)| (i, o, p.fee_bps))
            })
            .ok_or_else(|| TradingError::Validation("no pool for path".into()))?;
        calculate_out_amount(
            amount_in,
            TokenAmount(reserve_in),
            TokenAmount(reserve_out),
            fee_bps,
        )
    }

    async fn get_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> Result<TokenAmount, TradingError> {
        Ok(self.balance_of(token, owner).await)
    }

    async fn get_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount, TradingError> {
        let state = self.state.lock().await;
        Ok(TokenAmount(
            state
                .allowances
                .get(&(token, owner, spender))
                .copied()
                .unwrap_or_default(),
        ))
    }

    async fn send_approval(&self, tx: &SignedTransaction) -> Result<TxHash, TradingError> {
        if !matches!(tx.request.payload, TxPayload::Approve(_)) {
            return Err(TradingError::Validation("expected an approval payload".into()));
        }
        self.submit(tx, "approval").await
    }

    async fn send_swap(&self, tx: &SignedTransaction) -> Result<TxHash, TradingError> {
        if !matches!(tx.request.payload, TxPayload::Swap(_)) {
            return Err(TradingError::Validation("expected a swap payload".into()));
        }
        self.submit(tx, "swap").await
    }

    async fn get_receipt(&self, tx: TxHash) -> Result<Option<Receipt>, TradingError> {
        let mut state = self.state.lock().await;
        if state.failing_receipts > 0 {
            state.failing_receipts -= 1;
            return Err(TradingError::network("get_receipt", "upstream timeout"));
        }
        Ok(state.receipts.get(&tx).cloned())
    }

    async fn get_nonce(&self, address: Address) -> Result<u64, TradingError> {
        let state = self.state.lock().await;
        Ok(state.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn get_gas_price(&self) -> Result<U256, TradingError> {
        Ok(self.state.lock().await.gas_price)
    }

    async fn chain_time(&self) -> Result<u64, TradingError> {
        Ok(self.state.lock().await.time)
    }
}

#[async_trait]
impl EventSource for PaperChain {
    async fn poll_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
    ) -> Result<Vec<RawLog>, TradingError> {
        let state = self.state.lock().await;
        let topic = filter
            .topic0
            .unwrap_or_else(|| event_topic(&filter.event_name));
        Ok(state
            .logs
            .iter()
            .filter(|l| l.block_number >= from_block)
            .filter(|l| l.address == filter.address)
            .filter(|l| l.topics.first() == Some(&topic))
            .cloned()
            .collect())
    }
}
