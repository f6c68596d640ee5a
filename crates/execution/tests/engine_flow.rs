//! End-to-end flows against the paper chain.

use async_trait::async_trait;
use dexbot_domain::entities::{ClosedPosition, Decision, MarketData};
use dexbot_domain::enums::{Action, Direction, PositionStatus, Side};
use dexbot_domain::ports::TradeStore;
use dexbot_domain::{Address, RejectionCode, Token, TradingError, TradingPair};
use dexbot_execution::prelude::*;
use dexbot_protocols::{LogFilter, PaperChain, RetryPolicy, Wallet};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

struct AlwaysBuy;

#[async_trait]
impl Strategy for AlwaysBuy {
    fn id(&self) -> &str {
        "always_buy"
    }

    fn requested_size(&self) -> Decimal {
        dec!(0.1)
    }

    async fn confidence(
        &self,
        _market: &MarketData,
    ) -> Result<Option<(Direction, Decimal)>, TradingError> {
        Ok(Some((Direction::Buy, dec!(0.9))))
    }
}

/// Buys at full confidence under its own id.
struct Unanimous(&'static str);

#[async_trait]
impl Strategy for Unanimous {
    fn id(&self) -> &str {
        self.0
    }

    fn requested_size(&self) -> Decimal {
        dec!(0.05)
    }

    async fn confidence(
        &self,
        _market: &MarketData,
    ) -> Result<Option<(Direction, Decimal)>, TradingError> {
        Ok(Some((Direction::Buy, Decimal::ONE)))
    }
}

struct Paper {
    engine: Arc<Engine>,
    chain: Arc<PaperChain>,
    store: Arc<InMemoryTradeStore>,
    pair: TradingPair,
}

fn pair() -> TradingPair {
    TradingPair::new(
        Token::new(Address::repeat_byte(0xee), "WETH", 18),
        Token::new(Address::repeat_byte(0xcc), "USDC", 6),
        Address::repeat_byte(0xaa),
    )
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.executor.retry = RetryPolicy::fixed(3, Duration::ZERO);
    config.executor.approval_poll_ms = 1;
    config.listener.retry = RetryPolicy::fixed(3, Duration::ZERO);
    config
}

async fn paper(config: EngineConfig) -> Paper {
    paper_with_rules(config, Vec::new()).await
}

async fn paper_with_rules(config: EngineConfig, rules: Vec<Box<dyn RiskRule>>) -> Paper {
    let pair = pair();
    let chain = Arc::new(PaperChain::new());
    chain
        .add_pool(&pair, dec!(1000), dec!(2000000), 30)
        .await
        .unwrap();
    let wallet = Arc::new(Wallet::random());
    chain
        .fund(wallet.address(), &pair.quote, dec!(100000))
        .await
        .unwrap();

    let store = Arc::new(InMemoryTradeStore::new());
    let mut engine = Engine::new(
        config,
        EngineParts {
            chain: chain.clone(),
            events: chain.clone(),
            wallet,
            store: store.clone(),
        },
    )
    .unwrap()
    .with_exit_pair(pair.clone());
    for rule in rules {
        engine = engine.with_risk_rule(rule);
    }
    engine.watch(LogFilter::new(pair.router, "Sync")).await;

    Paper {
        engine: Arc::new(engine),
        chain,
        store,
        pair,
    }
}

fn buy(size: Decimal) -> Decision {
    Decision::new(
        Action::Buy,
        size,
        dec!(0.8),
        dec!(2000),
        dec!(1900),
        dec!(2200),
        vec![],
    )
}

#[tokio::test]
async fn test_signal_to_stop_out_and_exit() {
    let p = paper(config()).await;
    p.engine.register_strategy(Arc::new(AlwaysBuy)).await.unwrap();

    let (closed_tx, mut closed_rx) = tokio::sync::mpsc::unbounded_channel::<ClosedPosition>();
    let _subscription = p.engine.on_trade_closed(move |closed| {
        let _ = closed_tx.send(closed);
    });

    let market = MarketData::new(p.pair.symbol(), dec!(2000));
    let decision = p.engine.generate_decision(&market).await.unwrap();
    assert_eq!(decision.action, Action::Buy);
    assert_eq!(decision.strategy_ids(), vec!["always_buy".to_string()]);

    p.engine.execute(&decision, &p.pair).await.unwrap();
    assert_eq!(p.engine.confirm_pending().await.len(), 1);
    let open = p.engine.list_open_positions().await;
    assert_eq!(open.len(), 1);
    let position = open[0].clone();
    assert_eq!(position.side, Side::Long);

    // price falls through the stop and reaches the engine as a Sync log
    p.chain.set_price(p.pair.router, dec!(1850)).await.unwrap();
    assert_eq!(p.engine.poll_events().await, 1);
    assert!(p.engine.list_open_positions().await.is_empty());

    let closed = tokio::time::timeout(Duration::from_secs(1), closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.position.id, position.id);
    assert_eq!(closed.status(), PositionStatus::StoppedOut);
    assert_eq!(closed.pnl, (dec!(1850) - position.entry_price) * position.size);

    assert_eq!(p.engine.strategies().history("always_buy").await.len(), 1);
    assert_eq!(p.store.returns("always_buy").await.len(), 1);

    // the unwinding swap settles with the realized pnl attached
    let settlements = p.engine.confirm_pending().await;
    match &settlements[..] {
        [Settlement::Executed(trade)] => assert_eq!(trade.pnl, Some(closed.pnl)),
        other => panic!("unexpected settlements {other:?}"),
    }
    assert_eq!(p.store.trades().await.len(), 2);

    let report = p.engine.performance().await;
    assert_eq!(report.overall.opened_positions, 1);
    assert_eq!(report.overall.closed_positions, 1);
    assert_eq!(report.overall.losses, 1);
    assert_eq!(report.by_strategy["always_buy"].closed_positions, 1);
}

#[tokio::test]
async fn test_quote_retried_until_it_succeeds() {
    let p = paper(config()).await;
    p.chain.fail_next_quotes(2).await;

    let tx = p.engine.execute(&buy(dec!(0.1)), &p.pair).await;
    assert!(tx.is_ok());
    assert_eq!(p.chain.quote_calls().await, 3);
}

#[tokio::test]
async fn test_quote_failure_past_budget_rejects() {
    let p = paper(config()).await;
    p.chain.fail_next_quotes(3).await;

    let err = p.engine.execute(&buy(dec!(0.1)), &p.pair).await.unwrap_err();
    assert_eq!(err.code, RejectionCode::QuoteFailed);
    assert!(p.engine.executor().pending().await.is_empty());
}

#[tokio::test]
async fn test_full_book_rejects_max_positions() {
    let p = paper(config()).await;
    for _ in 0..5 {
        p.engine.execute(&buy(dec!(0.05)), &p.pair).await.unwrap();
    }
    p.engine.confirm_pending().await;
    assert_eq!(p.engine.list_open_positions().await.len(), 5);

    let err = p.engine.execute(&buy(dec!(0.05)), &p.pair).await.unwrap_err();
    assert_eq!(err.code, RejectionCode::MaxPositions);
}

#[tokio::test]
async fn test_unconfirmed_entries_count_against_max_positions() {
    let p = paper(config()).await;
    // a failed entry gives its slot back
    p.chain.fail_next_quotes(3).await;
    assert!(p.engine.execute(&buy(dec!(0.05)), &p.pair).await.is_err());

    for _ in 0..5 {
        p.engine.execute(&buy(dec!(0.05)), &p.pair).await.unwrap();
    }
    for _ in 0..2 {
        let err = p.engine.execute(&buy(dec!(0.05)), &p.pair).await.unwrap_err();
        assert_eq!(err.code, RejectionCode::MaxPositions);
    }
    assert_eq!(p.engine.executor().pending().await.len(), 5);

    p.engine.confirm_pending().await;
    assert_eq!(p.engine.list_open_positions().await.len(), 5);
    let err = p.engine.execute(&buy(dec!(0.05)), &p.pair).await.unwrap_err();
    assert_eq!(err.code, RejectionCode::MaxPositions);
}

#[tokio::test]
async fn test_unconfirmed_entries_count_against_exposure() {
    let mut config = config();
    config.risk.max_open_positions = 10;
    let p = paper(config).await;
    // five entries of 10% fill the 50% exposure limit before any confirms
    for _ in 0..5 {
        p.engine.execute(&buy(dec!(0.1)), &p.pair).await.unwrap();
    }
    let err = p.engine.execute(&buy(dec!(0.1)), &p.pair).await.unwrap_err();
    assert_eq!(err.code, RejectionCode::MaxExposure);
}

#[tokio::test]
async fn test_size_raising_rule_is_capped() {
    let triple = FnRule::new("triple", 500, |d: Decision, _: &RiskContext| {
        Ok(RuleOutcome::Adjusted(Decision {
            size: d.size * dec!(3),
            ..d
        }))
    });
    let p = paper_with_rules(config(), vec![Box::new(triple)]).await;
    p.engine.execute(&buy(dec!(0.5)), &p.pair).await.unwrap();

    let pending = p.engine.executor().pending().await;
    assert_eq!(pending[0].amount_in, p.pair.quote.to_raw(dec!(1000)).unwrap());
}

#[tokio::test]
async fn test_fresh_strategies_reach_default_floor() {
    let p = paper(config()).await;
    p.engine.register_strategy(Arc::new(Unanimous("a"))).await.unwrap();
    p.engine.register_strategy(Arc::new(Unanimous("b"))).await.unwrap();

    let market = MarketData::new(p.pair.symbol(), dec!(2000));
    let decision = p.engine.generate_decision(&market).await.unwrap();
    assert_eq!(decision.confidence, dec!(0.5));
    assert!(p.engine.execute(&decision, &p.pair).await.is_ok());
}

#[tokio::test]
async fn test_unreachable_floor_refuses_strategy() {
    let mut config = config();
    config.risk.min_confidence = dec!(0.6);
    let p = paper(config).await;
    p.engine.register_strategy(Arc::new(Unanimous("a"))).await.unwrap();
    let err = p
        .engine
        .register_strategy(Arc::new(Unanimous("b")))
        .await
        .unwrap_err();
    assert!(matches!(err, TradingError::Validation(_)));
    assert_eq!(p.engine.strategies().strategy_ids().await, vec!["a".to_string()]);
}

#[tokio::test]
async fn test_executor_follows_risk_confidence_floor() {
    let mut config = config();
    config.risk.min_confidence = dec!(0.1);
    let p = paper(config).await;
    assert_eq!(p.engine.executor().config().min_confidence, dec!(0.1));

    let decision = Decision {
        confidence: dec!(0.15),
        ..buy(dec!(0.1))
    };
    assert!(p.engine.execute(&decision, &p.pair).await.is_ok());
}

#[tokio::test]
async fn test_oversized_decision_is_capped() {
    let p = paper(config()).await;
    let decision = buy(dec!(0.5));
    p.engine.execute(&decision, &p.pair).await.unwrap();

    let pending = p.engine.executor().pending().await;
    // 10% of the 10_000 portfolio, in USDC base units
    assert_eq!(pending[0].amount_in, p.pair.quote.to_raw(dec!(1000)).unwrap());
    assert_eq!(decision.size, dec!(0.5));
}

#[tokio::test]
async fn test_decision_executes_at_most_once() {
    let p = paper(config()).await;
    let decision = buy(dec!(0.1));
    p.engine.execute(&decision, &p.pair).await.unwrap();
    let err = p.engine.execute(&decision, &p.pair).await.unwrap_err();
    assert_eq!(err.code, RejectionCode::DuplicateDecision);
    assert_eq!(p.store.load_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_close_is_idempotent() {
    let mut config = config();
    config.exit_on_close = false;
    let p = paper(config).await;
    p.engine.execute(&buy(dec!(0.1)), &p.pair).await.unwrap();
    p.engine.confirm_pending().await;
    let id = p.engine.list_open_positions().await[0].id;

    let closed = p.engine.close_position(id, dec!(2100)).await.unwrap();
    assert_eq!(closed.status(), PositionStatus::ManuallyClosed);
    assert!(p.engine.close_position(id, dec!(2100)).await.is_none());
    assert!(p.engine.executor().pending().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_events_tick_once() {
    let mut config = config();
    config.exit_on_close = false;
    let p = paper(config).await;
    p.engine.execute(&buy(dec!(0.1)), &p.pair).await.unwrap();
    p.engine.confirm_pending().await;

    let record = dexbot_domain::entities::EventRecord {
        tx_hash: dexbot_domain::TxHash::repeat_byte(4),
        log_index: 0,
        block_number: 9,
        address: p.pair.router,
        event_type: "Sync".into(),
        args: serde_json::json!({ "price": "2300" }),
        received_at: chrono::Utc::now(),
    };
    p.engine.on_event(record.clone()).await.unwrap();
    p.engine.on_event(record).await.unwrap();

    let report = p.engine.performance().await;
    assert_eq!(report.overall.closed_positions, 1);
    assert_eq!(report.overall.wins, 1);
}

#[tokio::test]
async fn test_restart_recovers_pending_positions_and_returns() {
    let p = paper(config()).await;
    p.engine.execute(&buy(dec!(0.1)), &p.pair).await.unwrap();

    let restarted = Engine::new(
        config(),
        EngineParts {
            chain: p.chain.clone(),
            events: p.chain.clone(),
            wallet: Arc::new(Wallet::random()),
            store: p.store.clone(),
        },
    )
    .unwrap();
    p.store
        .append_return("always_buy", dec!(0.02), chrono::Utc::now())
        .await
        .unwrap();
    restarted.register_strategy(Arc::new(AlwaysBuy)).await.unwrap();

    assert_eq!(restarted.recover().await.unwrap(), (0, 1));
    assert_eq!(restarted.strategies().history("always_buy").await, vec![dec!(0.02)]);
    assert_eq!(restarted.confirm_pending().await.len(), 1);
    assert_eq!(restarted.list_open_positions().await.len(), 1);
}
