//! Swap submission and confirmation.

use super::{NonceManager, PendingBook};
use crate::emergency::CircuitBreaker;
use crate::position::PositionManager;
use crate::risk::DEFAULT_MIN_CONFIDENCE;
use chrono::Utc;
use dexbot_domain::entities::{
    ClosedPosition, Decision, DecisionId, ExecutedTrade, PendingTransaction, Position,
    TradeFailure, TradeIntent,
};
use dexbot_domain::enums::{Action, Side};
use dexbot_domain::ports::TradeStore;
use dexbot_domain::{
    Address, Rejection, RejectionCode, Token, TokenAmount, TradingError, TradingPair, TxHash,
};
use dexbot_protocols::{
    ApprovalRequest, ChainClient, Receipt, RetryPolicy, SwapRequest, TxPayload, TxRequest, Wallet,
};
use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const GWEI: u64 = 1_000_000_000;

/// Configuration for the trade executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Slippage tolerance in basis points.
    pub max_slippage_bps: u16,
    /// Swap deadline relative to chain time.
    pub deadline_secs: u64,
    /// Submissions are refused above this gas price.
    pub max_gas_price_gwei: u64,
    pub swap_gas_limit: u64,
    pub approval_gas_limit: u64,
    /// Approve `U256::MAX` instead of the exact input amount.
    pub unlimited_approval: bool,
    /// How long to wait for an approval to confirm.
    pub approval_timeout_ms: u64,
    pub approval_poll_ms: u64,
    /// Confirmation loop period.
    pub confirm_interval_ms: u64,
    /// Confidence floor checked again before any network call. The engine
    /// copies it from `RiskConfig::min_confidence`.
    #[serde(skip)]
    pub min_confidence: Decimal,
    /// Policy for every read-only chain call.
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: 50, // 0.5%
            deadline_secs: 300,
            max_gas_price_gwei: 200,
            swap_gas_limit: 250_000,
            approval_gas_limit: 60_000,
            unlimited_approval: false,
            approval_timeout_ms: 60_000,
            approval_poll_ms: 500,
            confirm_interval_ms: 2_000,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.max_gas_price_gwei).saturating_mul(U256::from(GWEI))
    }
}

/// Terminal outcome of a pending transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Executed(ExecutedTrade),
    Failed(TradeFailure),
}

struct SwapPlan {
    decision_ref: DecisionId,
    intent: TradeIntent,
    token_in: Token,
    token_out: Token,
    router: Address,
    amount_in: TokenAmount,
}

/// Turns approved decisions into swaps and settles them as receipts land.
pub struct TradeExecutor {
    config: ExecutorConfig,
    chain: Arc<dyn ChainClient>,
    wallet: Arc<Wallet>,
    store: Arc<dyn TradeStore>,
    positions: Arc<PositionManager>,
    breaker: Arc<CircuitBreaker>,
    nonces: NonceManager,
    book: PendingBook,
}

impl TradeExecutor {
    pub fn new(
        config: ExecutorConfig,
        chain: Arc<dyn ChainClient>,
        wallet: Arc<Wallet>,
        store: Arc<dyn TradeStore>,
        positions: Arc<PositionManager>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let nonces = NonceManager::new(wallet.address(), chain.clone(), config.retry.clone());
        Self {
            config,
            chain,
            wallet,
            store,
            positions,
            breaker,
            nonces,
            book: PendingBook::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Submits the entry swap for an approved decision.
    ///
    /// Buys spend `size * portfolio_value` of the quote token; sells spend the
    /// same notional of the base token at the decision's reference price.
    pub async fn execute(
        &self,
        decision: &Decision,
        pair: &TradingPair,
        portfolio_value: Decimal,
    ) -> Result<TxHash, Rejection> {
        if !self.breaker.is_allowed().await {
            return Err(Rejection::new(
                RejectionCode::CircuitOpen,
                "circuit breaker is open",
            ));
        }
        decision.ensure_executable(self.config.min_confidence)?;
        let side = decision
            .side()
            .ok_or_else(|| Rejection::new(RejectionCode::NoAction, "decision has no action"))?;
        let (token_in, token_out) = pair
            .route(decision.action)
            .ok_or_else(|| Rejection::new(RejectionCode::NoAction, "decision has no action"))?;

        let notional = decision.notional(portfolio_value);
        let input = match decision.action {
            Action::Sell if decision.reference_price > Decimal::ZERO => {
                notional / decision.reference_price
            }
            Action::Sell => {
                return Err(Rejection::new(
                    RejectionCode::ValidationFailed,
                    "sell decision needs a positive reference price",
                ));
            }
            _ => notional,
        };
        let amount_in = token_in
            .to_raw(input)
            .map_err(|e| Rejection::from_error(RejectionCode::InvalidSize, &e))?;
        if amount_in.is_zero() {
            return Err(Rejection::new(
                RejectionCode::InvalidSize,
                format!("{input} {} rounds to zero", token_in.symbol),
            ));
        }

        if !self.book.claim(decision.id).await {
            return Err(duplicate(decision.id));
        }
        let seen = match self.store.decision_seen(decision.id).await {
            Ok(false) => None,
            Ok(true) => Some(duplicate(decision.id)),
            Err(e) => Some(Rejection::from_error(RejectionCode::StorageFailed, &e)),
        };
        if let Some(rejection) = seen {
            self.book.release(decision.id).await;
            return Err(rejection);
        }

        let plan = SwapPlan {
            decision_ref: decision.id,
            intent: TradeIntent::Open {
                side,
                stop_loss: decision.stop_loss,
                take_profit: decision.take_profit,
                strategy_ids: decision.strategy_ids(),
            },
            token_in: token_in.clone(),
            token_out: token_out.clone(),
            router: pair.router,
            amount_in,
        };
        self.submit_plan(plan).await
    }

    /// Submits the closing swap for a position that left the open set.
    ///
    /// Exits are not gated by the circuit breaker.
    pub async fn execute_exit(
        &self,
        closed: &ClosedPosition,
        pair: &TradingPair,
    ) -> Result<TxHash, Rejection> {
        let position = &closed.position;
        let action = position.side.exit_action();
        let (token_in, token_out) = pair
            .route(action)
            .ok_or_else(|| Rejection::new(RejectionCode::NoAction, "exit has no route"))?;
        let input = match position.side {
            Side::Long => position.size,
            Side::Short => position.size * closed.exit_price,
        };
        let amount_in = token_in
            .to_raw(input)
            .map_err(|e| Rejection::from_error(RejectionCode::InvalidSize, &e))?;
        if amount_in.is_zero() {
            return Err(Rejection::new(
                RejectionCode::InvalidSize,
                "exit amount rounds to zero",
            ));
        }

        let decision_ref = DecisionId::new();
        let plan = SwapPlan {
            decision_ref,
            intent: TradeIntent::Close {
                position_id: position.id,
                pnl: closed.pnl,
            },
            token_in: token_in.clone(),
            token_out: token_out.clone(),
            router: pair.router,
            amount_in,
        };
        self.submit_plan(plan).await
    }

    async fn submit_plan(&self, plan: SwapPlan) -> Result<TxHash, Rejection> {
        let decision_ref = plan.decision_ref;
        match self.try_submit(plan).await {
            Ok(tx) => {
                self.breaker.record_success().await;
                Ok(tx)
            }
            Err(rejection) => {
                warn!(
                    decision = %decision_ref,
                    code = %rejection.code,
                    reason = %rejection.message,
                    "Trade not submitted"
                );
                self.breaker.record_failure().await;
                self.book.release(decision_ref).await;
                let failure = TradeFailure::new(
                    None,
                    decision_ref,
                    rejection.code,
                    rejection.message.clone(),
                );
                if let Err(e) = self.store.record_failure(&failure).await {
                    error!(decision = %decision_ref, error = %e, "Failed to persist trade failure");
                }
                Err(rejection)
            }
        }
    }

    async fn try_submit(&self, plan: SwapPlan) -> Result<TxHash, Rejection> {
        let retry = &self.config.retry;
        let path = vec![plan.token_in.address, plan.token_out.address];

        let expected_out = retry
            .run("get_quote", || self.chain.get_quote(plan.amount_in, &path))
            .await
            .map_err(|e| Rejection::from_error(RejectionCode::QuoteFailed, &e))?;
        if expected_out.is_zero() {
            return Err(Rejection::new(RejectionCode::QuoteFailed, "quote is zero"));
        }
        let min_out = expected_out.min_after_slippage(self.config.max_slippage_bps);

        let gas_price = retry
            .run("get_gas_price", || self.chain.get_gas_price())
            .await
            .map_err(|e| Rejection::from_error(RejectionCode::SubmitFailed, &e))?;
        if gas_price > self.config.max_gas_price() {
            return Err(Rejection::new(
                RejectionCode::GasTooHigh,
                format!(
                    "gas price {gas_price} wei above limit of {} gwei",
                    self.config.max_gas_price_gwei
                ),
            ));
        }

        self.ensure_allowance(&plan, gas_price)
            .await
            .map_err(|e| Rejection::from_error(RejectionCode::ApprovalFailed, &e))?;

        let now = retry
            .run("chain_time", || self.chain.chain_time())
            .await
            .map_err(|e| Rejection::from_error(RejectionCode::SubmitFailed, &e))?;
        let deadline = now.saturating_add(self.config.deadline_secs);

        let swap = SwapRequest {
            router: plan.router,
            path,
            amount_in: plan.amount_in,
            min_amount_out: min_out,
            recipient: self.wallet.address(),
            deadline,
        };
        let (nonce, tx_id) = self
            .nonces
            .submit_with(|nonce| async move {
                let signed = self.wallet.sign(TxRequest {
                    from: self.wallet.address(),
                    nonce,
                    gas_price,
                    gas_limit: self.config.swap_gas_limit,
                    payload: TxPayload::Swap(swap),
                })?;
                self.chain.send_swap(&signed).await
            })
            .await
            .map_err(|e| Rejection::from_error(RejectionCode::SubmitFailed, &e))?;

        let pending = PendingTransaction {
            tx_id,
            decision_ref: plan.decision_ref,
            intent: plan.intent,
            token_in: plan.token_in,
            token_out: plan.token_out,
            amount_in: plan.amount_in,
            expected_amount_out: expected_out,
            min_amount_out: min_out,
            nonce,
            deadline,
            submitted_at: Utc::now(),
        };
        self.book.insert(pending.clone()).await;
        if let Err(e) = self.store.save_pending(&pending).await {
            // The swap is live; the in-memory book still tracks it.
            error!(tx = ?tx_id, error = %e, "Failed to persist pending transaction");
        }
        info!(
            tx = ?tx_id,
            decision = %pending.decision_ref,
            nonce,
            amount_in = %pending.amount_in,
            expected_out = %expected_out,
            min_out = %min_out,
            "Swap submitted"
        );
        Ok(tx_id)
    }

    /// Approves the router for the plan's input when the allowance is short and
    /// waits for the approval to confirm.
    async fn ensure_allowance(&self, plan: &SwapPlan, gas_price: U256) -> Result<(), TradingError> {
        let owner = self.wallet.address();
        let allowance = self
            .config
            .retry
            .run("get_allowance", || {
                self.chain
                    .get_allowance(plan.token_in.address, owner, plan.router)
            })
            .await?;
        if allowance >= plan.amount_in {
            return Ok(());
        }

        let amount = if self.config.unlimited_approval {
            TokenAmount(U256::MAX)
        } else {
            plan.amount_in
        };
        let approval = ApprovalRequest {
            token: plan.token_in.address,
            spender: plan.router,
            amount,
        };
        // Each failed attempt drops the cached nonce, so a retry resyncs.
        let (nonce, tx) = self
            .config
            .retry
            .run("send_approval", || {
                let approval = approval.clone();
                self.nonces.submit_with(move |nonce| async move {
                    let signed = self.wallet.sign(TxRequest {
                        from: owner,
                        nonce,
                        gas_price,
                        gas_limit: self.config.approval_gas_limit,
                        payload: TxPayload::Approve(approval),
                    })?;
                    self.chain.send_approval(&signed).await
                })
            })
            .await?;
        debug!(tx = ?tx, nonce, token = %plan.token_in.symbol, %amount, "Approval submitted");

        let receipt = self.wait_for_receipt(tx).await?;
        if !receipt.is_success() {
            return Err(TradingError::Contract(format!(
                "approval reverted: {}",
                receipt.revert_reason.unwrap_or_default()
            )));
        }
        info!(tx = ?tx, token = %plan.token_in.symbol, "Approval confirmed");
        Ok(())
    }

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<Receipt, TradingError> {
        let timeout = Duration::from_millis(self.config.approval_timeout_ms);
        let poll = Duration::from_millis(self.config.approval_poll_ms);
        let wait = async {
            loop {
                match self
                    .config
                    .retry
                    .run("get_receipt", || self.chain.get_receipt(tx))
                    .await
                {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => debug!(tx = ?tx, error = %e, "Receipt read failed, polling again"),
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TradingError::Timeout {
                operation: "approval confirmation".into(),
                elapsed_ms: self.config.approval_timeout_ms,
            })
    }

    /// Polls receipts of every pending transaction once and settles the ones
    /// that landed.
    pub async fn confirm_pending(&self) -> Vec<Settlement> {
        let mut settlements = Vec::new();
        for pending in self.book.snapshot().await {
            let receipt = match self
                .config
                .retry
                .run("get_receipt", || self.chain.get_receipt(pending.tx_id))
                .await
            {
                Ok(Some(receipt)) => receipt,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tx = ?pending.tx_id, error = %e, "Receipt unavailable");
                    continue;
                }
            };
            let Some(pending) = self.book.take(pending.tx_id).await else {
                continue;
            };
            let settlement = if receipt.is_success() {
                Settlement::Executed(self.settle_success(&pending, &receipt).await)
            } else {
                Settlement::Failed(self.settle_revert(&pending, &receipt).await)
            };
            if let Err(e) = self.store.remove_pending(pending.tx_id).await {
                error!(tx = ?pending.tx_id, error = %e, "Failed to drop pending transaction");
            }
            // no-op when the fill already turned the reservation into a position
            self.positions.release(pending.decision_ref).await;
            settlements.push(settlement);
        }
        settlements
    }

    async fn settle_success(&self, pending: &PendingTransaction, receipt: &Receipt) -> ExecutedTrade {
        let amount_out = receipt.amount_out.unwrap_or(pending.expected_amount_out);
        let pnl = match &pending.intent {
            TradeIntent::Open {
                side,
                stop_loss,
                take_profit,
                strategy_ids,
            } => {
                self.open_from_fill(pending, amount_out, *side, *stop_loss, *take_profit, strategy_ids)
                    .await;
                None
            }
            TradeIntent::Close { position_id, pnl } => {
                info!(tx = ?pending.tx_id, position = %position_id, %pnl, "Exit swap confirmed");
                Some(*pnl)
            }
        };
        let trade = ExecutedTrade {
            tx_id: pending.tx_id,
            decision_ref: pending.decision_ref,
            amount_in: pending.amount_in,
            amount_out,
            gas_used: receipt.gas_used,
            confirmed_at: Utc::now(),
            pnl,
        };
        if let Err(e) = self.store.append_trade(&trade).await {
            error!(tx = ?trade.tx_id, error = %e, "Failed to append executed trade");
        }
        self.breaker.record_success().await;
        info!(
            tx = ?trade.tx_id,
            amount_in = %trade.amount_in,
            amount_out = %trade.amount_out,
            gas_used = trade.gas_used,
            "Trade confirmed"
        );
        trade
    }

    async fn open_from_fill(
        &self,
        pending: &PendingTransaction,
        amount_out: TokenAmount,
        side: Side,
        stop_loss: Decimal,
        take_profit: Decimal,
        strategy_ids: &[String],
    ) {
        let Some(entry) = pending.execution_price(amount_out, side) else {
            error!(tx = ?pending.tx_id, "Fill has no usable execution price");
            return;
        };
        let size = match side {
            Side::Long => pending.token_out.from_raw(amount_out),
            Side::Short => pending.token_in.from_raw(pending.amount_in),
        };
        let opened = size
            .and_then(|size| Position::new(side, entry, size, stop_loss, take_profit))
            .map(|p| {
                p.with_strategies(strategy_ids.to_vec())
                    .with_entry_tx(pending.tx_id)
            });
        match opened {
            Ok(position) => {
                if let Err(e) = self
                    .positions
                    .fill_reservation(pending.decision_ref, position)
                    .await
                {
                    error!(tx = ?pending.tx_id, error = %e, "Failed to record opened position");
                }
            }
            Err(e) => error!(
                tx = ?pending.tx_id,
                %entry,
                error = %e,
                "Fill could not open a position"
            ),
        }
    }

    async fn settle_revert(&self, pending: &PendingTransaction, receipt: &Receipt) -> TradeFailure {
        let reason = receipt
            .revert_reason
            .clone()
            .unwrap_or_else(|| "reverted".to_string());
        warn!(tx = ?pending.tx_id, decision = %pending.decision_ref, %reason, "Swap reverted");
        let failure = TradeFailure::new(
            Some(pending.tx_id),
            pending.decision_ref,
            RejectionCode::ContractReverted,
            reason,
        );
        if let Err(e) = self.store.record_failure(&failure).await {
            error!(tx = ?pending.tx_id, error = %e, "Failed to persist trade failure");
        }
        self.breaker.record_failure().await;
        failure
    }

    /// Reloads pending transactions persisted before a restart.
    pub async fn recover(&self) -> Result<usize, TradingError> {
        let pending = self.store.load_pending().await?;
        let count = pending.len();
        for p in pending {
            if let Some(notional) = entry_notional(&p) {
                self.positions.hold_reservation(p.decision_ref, notional).await;
            }
            self.book.insert(p).await;
        }
        info!(count, "Pending transactions recovered");
        Ok(count)
    }

    /// In-flight transactions ordered by nonce.
    pub async fn pending(&self) -> Vec<PendingTransaction> {
        self.book.snapshot().await
    }
}

/// Quote-side notional of an unsettled entry.
fn entry_notional(pending: &PendingTransaction) -> Option<Decimal> {
    match &pending.intent {
        TradeIntent::Open {
            side: Side::Long, ..
        } => pending.token_in.from_raw(pending.amount_in).ok(),
        TradeIntent::Open {
            side: Side::Short, ..
        } => pending.token_out.from_raw(pending.expected_amount_out).ok(),
        TradeIntent::Close { .. } => None,
    }
}

fn duplicate(id: DecisionId) -> Rejection {
    Rejection::new(
        RejectionCode::DuplicateDecision,
        format!("decision {id} was already executed"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emergency::CircuitBreakerConfig;
    use crate::position::PositionManagerConfig;
    use crate::store::InMemoryTradeStore;
    use dexbot_protocols::PaperChain;
    use rust_decimal_macros::dec;

    struct Harness {
        chain: Arc<PaperChain>,
        store: Arc<InMemoryTradeStore>,
        positions: Arc<PositionManager>,
        wallet: Arc<Wallet>,
        executor: TradeExecutor,
        pair: TradingPair,
    }

    async fn harness() -> Harness {
        let pair = TradingPair::new(
            Token::new(Address::repeat_byte(0xee), "WETH", 18),
            Token::new(Address::repeat_byte(0xcc), "USDC", 6),
            Address::repeat_byte(0xaa),
        );
        let chain = Arc::new(PaperChain::new());
        chain
            .add_pool(&pair, dec!(1000), dec!(2000000), 30)
            .await
            .unwrap();
        let wallet = Arc::new(Wallet::random());
        chain.fund(wallet.address(), &pair.quote, dec!(10000)).await.unwrap();
        chain.fund(wallet.address(), &pair.base, dec!(10)).await.unwrap();

        let store = Arc::new(InMemoryTradeStore::new());
        let positions = Arc::new(PositionManager::new(
            PositionManagerConfig::default(),
            store.clone(),
        ));
        let config = ExecutorConfig {
            retry: RetryPolicy::fixed(3, Duration::ZERO),
            approval_poll_ms: 1,
            unlimited_approval: true,
            ..Default::default()
        };
        let executor = TradeExecutor::new(
            config,
            chain.clone(),
            wallet.clone(),
            store.clone(),
            positions.clone(),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        );
        Harness {
            chain,
            store,
            positions,
            wallet,
            executor,
            pair,
        }
    }

    fn buy() -> Decision {
        Decision::new(
            Action::Buy,
            dec!(0.1),
            dec!(0.8),
            dec!(2000),
            dec!(1900),
            dec!(2200),
            vec![],
        )
    }

    #[tokio::test]
    async fn test_buy_approves_swaps_and_opens_position() {
        let h = harness().await;
        let tx = h.executor.execute(&buy(), &h.pair, dec!(10000)).await.unwrap();

        let pending = h.executor.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tx_id, tx);
        // approval took nonce 0
        assert_eq!(pending[0].nonce, 1);
        assert_eq!(
            pending[0].min_amount_out,
            pending[0].expected_amount_out.min_after_slippage(50)
        );
        assert_eq!(h.store.load_pending().await.unwrap().len(), 1);

        let settlements = h.executor.confirm_pending().await;
        assert_eq!(settlements.len(), 1);
        assert!(matches!(settlements[0], Settlement::Executed(_)));
        assert!(h.executor.pending().await.is_empty());
        assert!(h.store.load_pending().await.unwrap().is_empty());
        assert_eq!(h.store.trades().await.len(), 1);

        let open = h.positions.list_open().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].side, Side::Long);
        assert_eq!(open[0].entry_tx, Some(tx));
        assert!(open[0].entry_price > dec!(2000));
        assert_eq!(open[0].stop_loss, dec!(1900));
    }

    #[tokio::test]
    async fn test_same_decision_executes_once() {
        let h = harness().await;
        let decision = buy();
        h.executor.execute(&decision, &h.pair, dec!(10000)).await.unwrap();
        let err = h
            .executor
            .execute(&decision, &h.pair, dec!(10000))
            .await
            .unwrap_err();
        assert_eq!(err.code, RejectionCode::DuplicateDecision);
        assert_eq!(h.executor.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_gas_ceiling() {
        let h = harness().await;
        h.chain
            .set_gas_price(U256::from(500u64) * U256::from(GWEI))
            .await;
        let err = h.executor.execute(&buy(), &h.pair, dec!(10000)).await.unwrap_err();
        assert_eq!(err.code, RejectionCode::GasTooHigh);
        assert_eq!(h.chain.get_nonce(h.wallet.address()).await.unwrap(), 0);
        assert_eq!(h.store.failures().await[0].code, RejectionCode::GasTooHigh);
    }

    #[tokio::test]
    async fn test_low_confidence_rejected_before_network() {
        let h = harness().await;
        let decision = Decision {
            confidence: dec!(0.1),
            ..buy()
        };
        let err = h.executor.execute(&decision, &h.pair, dec!(10000)).await.unwrap_err();
        assert_eq!(err.code, RejectionCode::LowConfidence);
        assert_eq!(h.chain.quote_calls().await, 0);
    }

    #[tokio::test]
    async fn test_revert_records_failure() {
        let h = harness().await;
        h.chain.revert_next_swap().await;
        let tx = h.executor.execute(&buy(), &h.pair, dec!(10000)).await.unwrap();

        let settlements = h.executor.confirm_pending().await;
        match &settlements[..] {
            [Settlement::Failed(failure)] => {
                assert_eq!(failure.tx_id, Some(tx));
                assert_eq!(failure.code, RejectionCode::ContractReverted);
            }
            other => panic!("unexpected settlements {other:?}"),
        }
        assert!(h.positions.list_open().await.is_empty());
        assert_eq!(h.store.failures().await.len(), 1);
    }

    #[tokio::test]
    async fn test_refused_approval_retried_on_resynced_nonce() {
        let h = harness().await;
        // first submission is the approval
        h.chain.fail_next_submits(1).await;
        h.executor.execute(&buy(), &h.pair, dec!(10000)).await.unwrap();

        // approval landed on nonce 0 after the resync, the swap on 1
        assert_eq!(h.executor.pending().await[0].nonce, 1);
        assert!(h.store.failures().await.is_empty());
    }

    #[tokio::test]
    async fn test_approval_past_budget_releases_claim() {
        let h = harness().await;
        h.chain.fail_next_submits(3).await;
        let decision = buy();
        let err = h
            .executor
            .execute(&decision, &h.pair, dec!(10000))
            .await
            .unwrap_err();
        assert_eq!(err.code, RejectionCode::ApprovalFailed);
        assert!(!h.executor.book.is_claimed(decision.id).await);

        // nothing reached the chain, so the same decision may go again
        h.executor.execute(&decision, &h.pair, dec!(10000)).await.unwrap();
        assert_eq!(h.executor.pending().await[0].nonce, 1);
    }

    #[tokio::test]
    async fn test_settled_decision_drops_claim_and_stays_unique() {
        let h = harness().await;
        let decision = buy();
        h.executor.execute(&decision, &h.pair, dec!(10000)).await.unwrap();
        assert!(h.executor.book.is_claimed(decision.id).await);

        h.executor.confirm_pending().await;
        assert!(!h.executor.book.is_claimed(decision.id).await);
        let err = h
            .executor
            .execute(&decision, &h.pair, dec!(10000))
            .await
            .unwrap_err();
        assert_eq!(err.code, RejectionCode::DuplicateDecision);
        assert!(!h.executor.book.is_claimed(decision.id).await);
    }

    #[tokio::test]
    async fn test_unconfirmed_swap_stays_pending() {
        let h = harness().await;
        // the unlimited approval from the first trade covers the second
        h.executor.execute(&buy(), &h.pair, dec!(10000)).await.unwrap();
        h.executor.confirm_pending().await;

        h.chain.set_auto_mine(false).await;
        h.executor.execute(&buy(), &h.pair, dec!(1000)).await.unwrap();
        assert!(h.executor.confirm_pending().await.is_empty());
        assert_eq!(h.executor.pending().await.len(), 1);

        h.chain.mine().await;
        assert_eq!(h.executor.confirm_pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_recover_reloads_pending() {
        let h = harness().await;
        h.executor.execute(&buy(), &h.pair, dec!(10000)).await.unwrap();

        let restarted = TradeExecutor::new(
            h.executor.config().clone(),
            h.chain.clone(),
            h.wallet.clone(),
            h.store.clone(),
            h.positions.clone(),
            Arc::new(CircuitBreaker::default()),
        );
        assert_eq!(restarted.recover().await.unwrap(), 1);
        let settlements = restarted.confirm_pending().await;
        assert!(matches!(settlements[..], [Settlement::Executed(_)]));
        assert_eq!(h.positions.list_open().await.len(), 1);
    }
}
