//! Polling chain-log listener.

use async_trait::async_trait;
use chrono::Utc;
use dexbot_domain::TradingError;
use dexbot_domain::entities::EventRecord;
use dexbot_protocols::{EventSource, LogFilter, RawLog, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Configuration for the event listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventListenerConfig {
    /// Poll period.
    pub poll_interval_ms: u64,
    /// Policy for transport errors while polling one filter.
    pub retry: RetryPolicy,
    /// First block considered for new filters.
    pub start_block: u64,
}

impl Default for EventListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            start_block: 0,
        }
    }
}

/// Receives every record and every filter that exhausted its retries.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, record: EventRecord) -> Result<(), TradingError>;

    async fn on_poll_error(&self, filter: &LogFilter, error: &TradingError) {
        error!(
            address = ?filter.address,
            event = %filter.event_name,
            error = %error,
            "Log poll failed"
        );
    }
}

/// Position of one filter in the log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCursor {
    pub filter: LogFilter,
    /// Block the next poll starts at.
    pub from_block: u64,
    /// Last delivered (block, log index).
    pub last_seen: Option<(u64, u64)>,
}

impl FilterCursor {
    fn is_new(&self, log: &RawLog) -> bool {
        self.last_seen
            .is_none_or(|seen| (log.block_number, log.log_index) > seen)
    }
}

/// Polls every subscribed filter and hands records to one handler.
pub struct EventListener {
    config: EventListenerConfig,
    source: Arc<dyn EventSource>,
    cursors: RwLock<Vec<FilterCursor>>,
}

impl EventListener {
    pub fn new(config: EventListenerConfig, source: Arc<dyn EventSource>) -> Self {
        Self {
            config,
            source,
            cursors: RwLock::new(Vec::new()),
        }
    }

    /// Adds a filter. Subscribing the same filter twice is a no-op.
    pub async fn subscribe(&self, filter: LogFilter) {
        let mut cursors = self.cursors.write().await;
        if cursors.iter().any(|c| c.filter == filter) {
            return;
        }
        info!(address = ?filter.address, event = %filter.event_name, "Added log filter");
        cursors.push(FilterCursor {
            filter,
            from_block: self.config.start_block,
            last_seen: None,
        });
    }

    pub async fn unsubscribe(&self, filter: &LogFilter) {
        self.cursors.write().await.retain(|c| &c.filter != filter);
    }

    pub async fn cursors(&self) -> Vec<FilterCursor> {
        self.cursors.read().await.clone()
    }

    /// Polls every filter once. Returns the number of records delivered.
    pub async fn poll_once(&self, handler: &dyn EventHandler) -> usize {
        let cursors = self.cursors().await;
        let mut delivered = 0;
        for cursor in cursors {
            delivered += self.poll_filter(cursor, handler).await;
        }
        delivered
    }

    async fn poll_filter(&self, cursor: FilterCursor, handler: &dyn EventHandler) -> usize {
        let filter = &cursor.filter;
        let logs = match self
            .config
            .retry
            .run("poll_logs", || self.source.poll_logs(filter, cursor.from_block))
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                handler.on_poll_error(filter, &e).await;
                return 0;
            }
        };

        let mut last_seen = cursor.last_seen;
        let mut delivered = 0;
        for log in logs.into_iter().filter(|l| cursor.is_new(l)) {
            last_seen = Some((log.block_number, log.log_index));
            let record = EventRecord {
                tx_hash: log.tx_hash,
                log_index: log.log_index,
                block_number: log.block_number,
                address: log.address,
                event_type: filter.event_name.clone(),
                args: log.args,
                received_at: Utc::now(),
            };
            if let Err(e) = handler.on_event(record).await {
                warn!(
                    event = %filter.event_name,
                    block = log.block_number,
                    log_index = log.log_index,
                    error = %e,
                    "Event handler failed"
                );
            }
            delivered += 1;
        }

        if let Some((block, _)) = last_seen {
            let mut cursors = self.cursors.write().await;
            if let Some(c) = cursors.iter_mut().find(|c| &c.filter == filter) {
                // Later logs of the same block may still arrive.
                c.from_block = block;
                c.last_seen = last_seen;
            }
            debug!(event = %filter.event_name, delivered, block, "Filter advanced");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexbot_domain::{Address, Token, TradingPair};
    use dexbot_protocols::PaperChain;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        records: Mutex<Vec<EventRecord>>,
        poll_errors: AtomicU32,
        fail_events: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn on_event(&self, record: EventRecord) -> Result<(), TradingError> {
            self.records.lock().await.push(record);
            if self.fail_events {
                return Err(TradingError::Validation("bad record".into()));
            }
            Ok(())
        }

        async fn on_poll_error(&self, _filter: &LogFilter, _error: &TradingError) {
            self.poll_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DownSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventSource for DownSource {
        async fn poll_logs(
            &self,
            _filter: &LogFilter,
            _from_block: u64,
        ) -> Result<Vec<RawLog>, TradingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TradingError::network("poll_logs", "connection refused"))
        }
    }

    fn pair() -> TradingPair {
        TradingPair::new(
            Token::new(Address::repeat_byte(0xee), "WETH", 18),
            Token::new(Address::repeat_byte(0xcc), "USDC", 6),
            Address::repeat_byte(0xaa),
        )
    }

    fn config() -> EventListenerConfig {
        EventListenerConfig {
            retry: RetryPolicy::fixed(3, Duration::ZERO),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order_without_repeats() {
        let chain = Arc::new(PaperChain::new());
        chain.add_pool(&pair(), dec!(1000), dec!(2000000), 30).await.unwrap();
        let listener = EventListener::new(config(), chain.clone());
        listener.subscribe(LogFilter::new(pair().router, "Sync")).await;
        listener.subscribe(LogFilter::new(pair().router, "Sync")).await;
        assert_eq!(listener.cursors().await.len(), 1);

        chain.set_price(pair().router, dec!(2010)).await.unwrap();
        chain.set_price(pair().router, dec!(2020)).await.unwrap();

        let recorder = Recorder::default();
        assert_eq!(listener.poll_once(&recorder).await, 2);
        assert_eq!(listener.poll_once(&recorder).await, 0);

        chain.set_price(pair().router, dec!(2030)).await.unwrap();
        assert_eq!(listener.poll_once(&recorder).await, 1);

        let prices: Vec<_> = recorder
            .records
            .lock()
            .await
            .iter()
            .map(|r| r.price().unwrap())
            .collect();
        assert_eq!(prices, vec![dec!(2010), dec!(2020), dec!(2030)]);
    }

    #[tokio::test]
    async fn test_poll_error_reported_after_retries() {
        let source = Arc::new(DownSource {
            calls: AtomicU32::new(0),
        });
        let listener = EventListener::new(config(), source.clone());
        listener.subscribe(LogFilter::new(Address::repeat_byte(1), "Sync")).await;
        listener.subscribe(LogFilter::new(Address::repeat_byte(2), "Swap")).await;

        let recorder = Recorder::default();
        assert_eq!(listener.poll_once(&recorder).await, 0);
        // both filters were tried, three attempts each
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
        assert_eq!(recorder.poll_errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_delivery() {
        let chain = Arc::new(PaperChain::new());
        chain.add_pool(&pair(), dec!(1000), dec!(2000000), 30).await.unwrap();
        let listener = EventListener::new(config(), chain.clone());
        listener.subscribe(LogFilter::new(pair().router, "Sync")).await;
        chain.set_price(pair().router, dec!(1990)).await.unwrap();
        chain.set_price(pair().router, dec!(1980)).await.unwrap();

        let recorder = Recorder {
            fail_events: true,
            ..Default::default()
        };
        assert_eq!(listener.poll_once(&recorder).await, 2);
        assert_eq!(recorder.records.lock().await.len(), 2);
    }
}
