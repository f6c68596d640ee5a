//! The long-lived engine context.
//!
//! One [`Engine`] is built at startup and owns every component. It wires
//! strategy output through the risk pipeline into the executor, feeds chain
//! events back in as price ticks, and credits strategies when positions close.

use crate::config::EngineConfig;
use crate::emergency::CircuitBreaker;
use crate::executor::{ExecutorConfig, Settlement, TradeExecutor};
use crate::lifecycle::{LifecycleEvent, PerformanceReport, PerformanceTracker};
use crate::position::PositionManager;
use crate::risk::{RiskContext, RiskEngine, RiskRule};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::strategy::{Strategy, StrategyManager};
use crate::sync::{EventHandler, EventListener};
use async_trait::async_trait;
use chrono::Utc;
use dexbot_domain::entities::{ClosedPosition, Decision, EventRecord, MarketData, Position, PositionId};
use dexbot_domain::ports::TradeStore;
use dexbot_domain::{Rejection, TradingError, TradingPair, TxHash};
use dexbot_protocols::{ChainClient, EventSource, LogFilter, PredictionOracle, Wallet};
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source of the market snapshot evaluated each strategy cycle.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn next_snapshot(&self) -> Result<Option<MarketData>, TradingError>;
}

/// External collaborators the engine is built from.
pub struct EngineParts {
    pub chain: Arc<dyn ChainClient>,
    pub events: Arc<dyn EventSource>,
    pub wallet: Arc<Wallet>,
    pub store: Arc<dyn TradeStore>,
}

/// Bounded set of recently seen event keys.
struct SeenEvents {
    capacity: usize,
    order: VecDeque<(TxHash, u64)>,
    keys: HashSet<(TxHash, u64)>,
}

impl SeenEvents {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            keys: HashSet::new(),
        }
    }

    /// Returns `false` for a key already in the window.
    fn insert(&mut self, key: (TxHash, u64)) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
        true
    }
}

/// Owns every component for the lifetime of the process.
pub struct Engine {
    config: EngineConfig,
    strategies: StrategyManager,
    risk: RiskEngine,
    positions: Arc<PositionManager>,
    executor: TradeExecutor,
    listener: EventListener,
    breaker: Arc<CircuitBreaker>,
    tracker: PerformanceTracker,
    lifecycle: Mutex<broadcast::Receiver<LifecycleEvent>>,
    store: Arc<dyn TradeStore>,
    seen: Mutex<SeenEvents>,
    volatility: RwLock<Decimal>,
    exit_pair: Option<TradingPair>,
}

impl Engine {
    /// Validates `config` and builds every component. Strategies listed in the
    /// configuration are registered by [`Engine::register_configured`].
    pub fn new(config: EngineConfig, parts: EngineParts) -> Result<Self, TradingError> {
        config.validate()?;
        let positions = Arc::new(PositionManager::new(
            config.position.clone(),
            parts.store.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let executor_config = ExecutorConfig {
            min_confidence: config.risk.min_confidence,
            ..config.executor.clone()
        };
        let executor = TradeExecutor::new(
            executor_config,
            parts.chain,
            parts.wallet,
            parts.store.clone(),
            positions.clone(),
            breaker.clone(),
        );
        let listener = EventListener::new(config.listener.clone(), parts.events);
        let lifecycle = Mutex::new(positions.subscribe());

        info!(
            portfolio_value = %config.portfolio_value,
            max_open_positions = config.risk.max_open_positions,
            slippage_bps = config.executor.max_slippage_bps,
            "Engine created"
        );
        Ok(Self {
            strategies: StrategyManager::new(config.strategy.clone()),
            risk: RiskEngine::new(&config.risk),
            seen: Mutex::new(SeenEvents::new(config.dedup_window)),
            positions,
            executor,
            listener,
            breaker,
            tracker: PerformanceTracker::new(),
            lifecycle,
            store: parts.store,
            volatility: RwLock::new(Decimal::ZERO),
            exit_pair: None,
            config,
        })
    }

    /// Pair used for unwinding swaps when positions close.
    #[must_use]
    pub fn with_exit_pair(mut self, pair: TradingPair) -> Self {
        self.exit_pair = Some(pair);
        self
    }

    /// Inserts a custom risk rule at its priority.
    #[must_use]
    pub fn with_risk_rule(mut self, rule: Box<dyn RiskRule>) -> Self {
        self.risk.add_rule(rule);
        self
    }

    /// Builds and registers the strategies listed in the configuration.
    pub async fn register_configured(
        &self,
        oracle: Option<Arc<dyn PredictionOracle>>,
    ) -> Result<usize, TradingError> {
        for strategy in &self.config.strategies {
            self.register_strategy(strategy.build(oracle.clone())?).await?;
        }
        Ok(self.config.strategies.len())
    }

    /// Registers `strategy`, refusing it when the confidence floor would be
    /// out of reach for the grown set of strategies without history.
    pub async fn register_strategy(&self, strategy: Arc<dyn Strategy>) -> Result<(), TradingError> {
        let count = self.strategies.strategy_ids().await.len() + 1;
        self.config.check_confidence_floor(count)?;
        self.strategies.register(strategy).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategies(&self) -> &StrategyManager {
        &self.strategies
    }

    pub fn executor(&self) -> &TradeExecutor {
        &self.executor
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Adds a log filter to the event listener.
    pub async fn watch(&self, filter: LogFilter) {
        self.listener.subscribe(filter).await;
    }

    /// Reloads open positions, pending transactions and the return history
    /// of every registered strategy from storage.
    pub async fn recover(&self) -> Result<(usize, usize), TradingError> {
        let positions = self.positions.restore().await?;
        let pending = self.executor.recover().await?;
        let history_len = self.config.strategy.history_len;
        for id in self.strategies.strategy_ids().await {
            for value in self.store.load_returns(&id, history_len).await? {
                self.strategies.update_performance(&id, value).await;
            }
        }
        Ok((positions, pending))
    }

    /// Evaluates every strategy against `market`.
    pub async fn generate_decision(&self, market: &MarketData) -> Option<Decision> {
        *self.volatility.write().await = market.volatility;
        let decision = self.strategies.generate_decision(market).await;
        if let Some(d) = &decision {
            info!(
                decision = %d.id,
                action = %d.action,
                size = %d.size,
                confidence = %d.confidence,
                "Decision generated"
            );
        }
        decision
    }

    /// Runs `decision` through the risk pipeline, reserves its exposure and
    /// submits the approved result.
    pub async fn execute(&self, decision: &Decision, pair: &TradingPair) -> Result<TxHash, Rejection> {
        let portfolio_value = self.config.portfolio_value;
        let ctx = RiskContext {
            portfolio_value,
            volatility: *self.volatility.read().await,
            exposure: self.positions.snapshot().await,
        };
        let approved = self.risk.apply(decision, &ctx).await.inspect_err(|r| {
            info!(decision = %decision.id, code = %r.code, reason = %r.message, "Decision rejected by risk");
        })?;
        self.positions
            .reserve(&approved, portfolio_value, &self.config.risk.exposure_limits())
            .await?;
        let submitted = self.executor.execute(&approved, pair, portfolio_value).await;
        if submitted.is_err() {
            self.positions.release(approved.id).await;
        }
        submitted
    }

    pub async fn list_open_positions(&self) -> Vec<Position> {
        self.positions.list_open().await
    }

    /// Calls `callback` for every position that closes from now on. Slow
    /// callbacks lose events; the engine never waits for them.
    pub fn on_trade_closed<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(ClosedPosition) + Send + 'static,
    {
        let mut events = self.positions.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Closed(closed)) => callback(closed),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Trade-closed subscriber lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Evaluates stops and targets at `price`.
    pub async fn on_price_tick(&self, price: Decimal) -> Vec<ClosedPosition> {
        let closed = self.positions.on_tick(price).await;
        for c in &closed {
            self.after_close(c).await;
        }
        closed
    }

    /// Manually closes a position. Unknown or closed ids are a no-op.
    pub async fn close_position(&self, id: PositionId, price: Decimal) -> Option<ClosedPosition> {
        let closed = self.positions.close_position(id, price).await?;
        self.after_close(&closed).await;
        Some(closed)
    }

    async fn after_close(&self, closed: &ClosedPosition) {
        let now = Utc::now();
        for strategy_id in &closed.position.strategy_ids {
            self.strategies
                .update_performance(strategy_id, closed.return_pct)
                .await;
            if let Err(e) = self
                .store
                .append_return(strategy_id, closed.return_pct, now)
                .await
            {
                error!(strategy = %strategy_id, error = %e, "Failed to persist strategy return");
            }
        }

        let pnl_fraction = closed.pnl / self.config.portfolio_value;
        if self.breaker.record_realized(pnl_fraction).await {
            warn!(position = %closed.position.id, %pnl_fraction, "Session loss limit reached, entries halted");
        }

        if self.config.exit_on_close
            && let Some(pair) = &self.exit_pair
        {
            match self.executor.execute_exit(closed, pair).await {
                Ok(tx) => debug!(position = %closed.position.id, tx = ?tx, "Exit swap submitted"),
                Err(r) => error!(
                    position = %closed.position.id,
                    code = %r.code,
                    reason = %r.message,
                    "Exit swap not submitted"
                ),
            }
        }
    }

    /// Settles landed transactions once.
    pub async fn confirm_pending(&self) -> Vec<Settlement> {
        let settlements = self.executor.confirm_pending().await;
        self.sync_performance().await;
        settlements
    }

    /// Polls every watched filter once.
    pub async fn poll_events(&self) -> usize {
        self.listener.poll_once(self).await
    }

    async fn sync_performance(&self) {
        let mut events = self.lifecycle.lock().await;
        loop {
            match events.try_recv() {
                Ok(event) => self.tracker.record(&event).await,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Performance tracker lagging, events dropped");
                }
                Err(_) => break,
            }
        }
    }

    /// Realized performance, overall and per strategy.
    pub async fn performance(&self) -> PerformanceReport {
        self.sync_performance().await;
        self.tracker.report().await
    }

    async fn strategy_cycle(&self, feed: &dyn MarketFeed, pair: &TradingPair) {
        let market = match feed.next_snapshot().await {
            Ok(Some(market)) => market,
            Ok(None) => {
                debug!("Market feed has no snapshot");
                return;
            }
            Err(e) => {
                warn!(error = %e, code = e.code(), "Market feed failed");
                return;
            }
        };
        let Some(decision) = self.generate_decision(&market).await else {
            return;
        };
        match self.execute(&decision, pair).await {
            Ok(tx) => info!(decision = %decision.id, tx = ?tx, "Decision executed"),
            Err(r) => info!(decision = %decision.id, code = %r.code, reason = %r.message, "Decision not executed"),
        }
    }

    /// Runs the strategy cycle, confirmation poll and event poll on their own
    /// timers until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        feed: Arc<dyn MarketFeed>,
        pair: TradingPair,
        shutdown: CancellationToken,
    ) {
        let mut scheduler = Scheduler::new(shutdown.clone());

        let (engine, feed, pair) = (self.clone(), feed.clone(), pair.clone());
        scheduler.add_task(ScheduledTask::new(
            "strategy_cycle",
            Duration::from_millis(self.config.strategy.interval_ms),
            move || {
                let (engine, feed, pair) = (engine.clone(), feed.clone(), pair.clone());
                async move { engine.strategy_cycle(feed.as_ref(), &pair).await }
            },
        ));

        let engine = self.clone();
        scheduler.add_task(ScheduledTask::new(
            "confirmations",
            Duration::from_millis(self.config.executor.confirm_interval_ms),
            move || {
                let engine = engine.clone();
                async move {
                    engine.confirm_pending().await;
                }
            },
        ));

        let engine = self.clone();
        scheduler.add_task(ScheduledTask::new(
            "event_listener",
            Duration::from_millis(self.config.listener.poll_interval_ms),
            move || {
                let engine = engine.clone();
                async move {
                    engine.poll_events().await;
                }
            },
        ));

        scheduler.start();
        shutdown.cancelled().await;
        scheduler.join().await;
        info!(
            pending = self.executor.pending().await.len(),
            open = self.positions.list_open().await.len(),
            "Engine stopped"
        );
    }
}

#[async_trait]
impl EventHandler for Engine {
    async fn on_event(&self, record: EventRecord) -> Result<(), TradingError> {
        if !self.seen.lock().await.insert(record.dedup_key()) {
            debug!(tx = ?record.tx_hash, log_index = record.log_index, "Duplicate event ignored");
            return Ok(());
        }
        if let Some(price) = record.price() {
            self.on_price_tick(price).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_events_window() {
        let mut seen = SeenEvents::new(2);
        let a = (TxHash::repeat_byte(1), 0);
        let b = (TxHash::repeat_byte(1), 1);
        let c = (TxHash::repeat_byte(2), 0);
        assert!(seen.insert(a));
        assert!(!seen.insert(a));
        assert!(seen.insert(b));
        assert!(seen.insert(c));
        // oldest key fell out of the window
        assert!(seen.insert(a));
    }
}
