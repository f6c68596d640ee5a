//! Market feed replayed from a JSON file.
//!
//! Each tick moves the paper pool to its price before the snapshot is handed
//! to the strategies, so the event listener sees the same move as a `Sync`
//! log. When the file is exhausted the shutdown token is cancelled.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dexbot_domain::entities::{IndicatorSnapshot, MarketData};
use dexbot_domain::{Address, TradingError};
use dexbot_execution::engine::MarketFeed;
use dexbot_protocols::PaperChain;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayTick {
    pub price: Decimal,
    #[serde(default)]
    pub volatility: Decimal,
    #[serde(default)]
    pub indicators: IndicatorSnapshot,
    #[serde(default)]
    pub features: Vec<f64>,
}

pub struct ReplayFeed {
    symbol: String,
    router: Address,
    chain: Arc<PaperChain>,
    ticks: Mutex<VecDeque<ReplayTick>>,
    done: CancellationToken,
}

impl ReplayFeed {
    pub fn new(
        symbol: String,
        router: Address,
        chain: Arc<PaperChain>,
        ticks: Vec<ReplayTick>,
        done: CancellationToken,
    ) -> Self {
        Self {
            symbol,
            router,
            chain,
            ticks: Mutex::new(ticks.into()),
            done,
        }
    }

    pub fn read_ticks(path: &Path) -> Result<Vec<ReplayTick>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading ticks from {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing ticks in {}", path.display()))
    }
}

#[async_trait]
impl MarketFeed for ReplayFeed {
    async fn next_snapshot(&self) -> Result<Option<MarketData>, TradingError> {
        let Some(tick) = self.ticks.lock().await.pop_front() else {
            if !self.done.is_cancelled() {
                info!("Replay finished");
                self.done.cancel();
            }
            return Ok(None);
        };
        self.chain.set_price(self.router, tick.price).await?;
        Ok(Some(
            MarketData::new(self.symbol.clone(), tick.price)
                .with_volatility(tick.volatility)
                .with_indicators(tick.indicators)
                .with_features(tick.features),
        ))
    }
}
