//! Command line interface for the trading engine.

mod replay;
mod settings;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dexbot_data::PgTradeStore;
use dexbot_domain::ports::TradeStore;
use dexbot_execution::engine::{Engine, EngineParts};
use dexbot_execution::store::InMemoryTradeStore;
use dexbot_protocols::{EventSource, JsonRpcLogSource, LogFilter, PaperChain, PredictionOracle, Wallet};
use dotenv::dotenv;
use replay::{ReplayFeed, ReplayTick};
use settings::Settings;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dexbot")]
#[command(about = "Autonomous DEX trading engine", long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade a replayed price series against the paper chain
    Paper {
        /// Price ticks (JSON array)
        #[arg(short, long)]
        ticks: PathBuf,

        /// Milliseconds between strategy cycles; overrides the settings file
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Hex-encoded wallet secret; falls back to DEXBOT_WALLET_KEY, then a random wallet
        #[arg(long)]
        wallet_key: Option<String>,
    },
    /// Validate the settings and print them with defaults filled in
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Paper {
            ticks,
            tick_ms,
            wallet_key,
        } => {
            let mut settings = settings;
            if let Some(ms) = tick_ms {
                settings.engine.strategy.interval_ms = ms;
                settings.engine.validate()?;
            }
            let wallet_key = wallet_key.or_else(|| env::var("DEXBOT_WALLET_KEY").ok());
            run_paper(settings, ReplayFeed::read_ticks(&ticks)?, wallet_key).await?;
        }
    }
    Ok(())
}

async fn run_paper(settings: Settings, ticks: Vec<ReplayTick>, wallet_key: Option<String>) -> Result<()> {
    if ticks.is_empty() {
        bail!("tick file is empty");
    }
    let market = &settings.market;
    let pair = market.pair();

    let wallet = Arc::new(match wallet_key {
        Some(key) => Wallet::from_hex(&key)?,
        None => Wallet::random(),
    });

    let chain = Arc::new(PaperChain::new());
    chain
        .add_pool(&pair, market.reserve_base, market.reserve_quote, market.fee_bps)
        .await?;
    chain.fund(wallet.address(), &pair.base, market.fund_base).await?;
    chain.fund(wallet.address(), &pair.quote, market.fund_quote).await?;

    let events: Arc<dyn EventSource> = match &settings.rpc {
        Some(rpc) => {
            info!(url = %rpc.url, "Reading chain events over JSON-RPC");
            Arc::new(JsonRpcLogSource::new(rpc.clone())?)
        }
        None => chain.clone(),
    };

    let store: Arc<dyn TradeStore> = match &settings.database {
        Some(db) => {
            let url = env::var("DATABASE_URL").unwrap_or_else(|_| db.url.clone());
            Arc::new(
                PgTradeStore::connect(&url, db.max_connections)
                    .await
                    .context("connecting to the trade store")?,
            )
        }
        None => Arc::new(InMemoryTradeStore::new()),
    };

    let engine = Engine::new(
        settings.engine.clone(),
        EngineParts {
            chain: chain.clone(),
            events,
            wallet: wallet.clone(),
            store,
        },
    )?
    .with_exit_pair(pair.clone());

    let oracle = settings
        .oracle
        .clone()
        .map(|o| Arc::new(o) as Arc<dyn PredictionOracle>);
    let registered = engine.register_configured(oracle).await?;
    if registered == 0 {
        warn!("No strategies configured, no decisions will be generated");
    }
    let (positions, pending) = engine.recover().await?;
    engine.watch(LogFilter::new(pair.router, "Sync")).await;
    info!(
        wallet = ?wallet.address(),
        pair = %pair.symbol(),
        strategies = registered,
        recovered_positions = positions,
        recovered_pending = pending,
        "Paper trading started"
    );

    let engine = Arc::new(engine);
    let _closed = engine.on_trade_closed(|closed| {
        info!(
            position = %closed.position.id,
            reason = closed.reason.as_str(),
            pnl = %closed.pnl,
            "Position closed"
        );
    });

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            ctrl_c.cancel();
        }
    });

    let feed = Arc::new(ReplayFeed::new(
        pair.symbol(),
        pair.router,
        chain.clone(),
        ticks,
        shutdown.clone(),
    ));
    engine.clone().run(feed, pair, shutdown).await;

    // settle whatever landed after the last scheduled poll
    engine.confirm_pending().await;
    let report = engine.performance().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
