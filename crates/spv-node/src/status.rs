//! # Status Reporting
//!
//! Periodic chain-tip reports plus loggers for the coordinator's output
//! channels.

use header_sync::{
    ChainTip, ForkChoiceEngine, HeaderChainApi, KeyValueStore, StoredHeader, SubscriptionPush,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// Logs the canonical tip on a fixed interval.
pub struct StatusReporter<S: KeyValueStore> {
    engine: Arc<ForkChoiceEngine<S>>,
    interval: Duration,
    best: Option<ChainTip>,
}

impl<S: KeyValueStore + 'static> StatusReporter<S> {
    /// Create a reporter over `engine`.
    pub fn new(engine: Arc<ForkChoiceEngine<S>>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            best: None,
        }
    }

    /// Last tip reported.
    pub fn best(&self) -> Option<&ChainTip> {
        self.best.as_ref()
    }

    /// Report once. Returns how many blocks the tip advanced since the
    /// previous report.
    pub fn tick(&mut self) -> u64 {
        let tip = match self.engine.canonical_tip() {
            Ok(Some(tip)) => tip,
            Ok(None) => {
                info!("No headers stored yet");
                return 0;
            }
            Err(e) => {
                error!("Failed to query chain tip: {}", e);
                return 0;
            }
        };

        let advanced = match &self.best {
            Some(prev) => tip.height.saturating_sub(prev.height),
            None => 0,
        };
        if advanced > 0 {
            info!("Chain tip advanced {} blocks", advanced);
        }
        info!(
            "Best block {} at {} with {} work",
            tip.hash, tip.height, tip.accumulated_work
        );

        self.best = Some(tip);
        advanced
    }

    /// Report every interval until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Status reporter shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// Log every header the coordinator emits. Returns the count seen once
/// the channel closes.
pub async fn report_headers(mut rx: mpsc::Receiver<StoredHeader>) -> u64 {
    let mut seen = 0;
    while let Some(header) = rx.recv().await {
        seen += 1;
        match header.height() {
            Some(height) => info!("New header {} at height {}", header.hash(), height),
            None => debug!("New header {} (unresolved)", header.hash()),
        }
    }
    seen
}

/// Log every script-hash status push. Returns the count seen once the
/// channel closes.
pub async fn report_pushes(mut rx: mpsc::Receiver<SubscriptionPush>) -> u64 {
    let mut seen = 0;
    while let Some(push) = rx.recv().await {
        seen += 1;
        info!("Status of {} is now {}", push.key, push.value);
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use header_sync::test_utils::{mine_chain, EASY_BITS};
    use header_sync::{BlockHash, ChainParams, HeaderStore, InMemoryKVStore};
    use primitive_types::U256;
    use serde_json::json;

    fn engine() -> (Arc<ForkChoiceEngine<InMemoryKVStore>>, Vec<header_sync::BlockHeader>) {
        let chain = mine_chain(BlockHash::default(), 6, EASY_BITS, 0);
        let engine = ForkChoiceEngine::new(
            HeaderStore::new(InMemoryKVStore::new()),
            ChainParams::regtest(),
        );
        engine
            .seed_checkpoint(chain[0].clone(), 0, U256::one())
            .unwrap();
        (Arc::new(engine), chain)
    }

    #[test]
    fn test_tick_tracks_advances() {
        let (engine, chain) = engine();
        let mut reporter = StatusReporter::new(Arc::clone(&engine), Duration::from_secs(1));

        assert_eq!(reporter.tick(), 0);
        assert_eq!(reporter.best().unwrap().height, 0);

        engine.accept_batch(chain[1..4].to_vec()).unwrap();
        assert_eq!(reporter.tick(), 3);
        assert_eq!(reporter.best().unwrap().hash, chain[3].hash);

        assert_eq!(reporter.tick(), 0);
    }

    #[test]
    fn test_tick_on_empty_store() {
        let engine = Arc::new(ForkChoiceEngine::new(
            HeaderStore::new(InMemoryKVStore::new()),
            ChainParams::regtest(),
        ));
        let mut reporter = StatusReporter::new(engine, Duration::from_secs(1));
        assert_eq!(reporter.tick(), 0);
        assert!(reporter.best().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (engine, _) = engine();
        let reporter = StatusReporter::new(engine, Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(reporter.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reporters_drain_until_closed() {
        let (engine, chain) = engine();
        let (header_tx, header_rx) = mpsc::channel(4);
        let (push_tx, push_rx) = mpsc::channel(4);

        let stored = engine.accept(chain[1].clone()).unwrap();
        header_tx.send(stored).await.unwrap();
        drop(header_tx);

        push_tx
            .send(SubscriptionPush {
                key: "blockchain.scripthash.subscribe:ab".to_string(),
                value: json!("status"),
            })
            .await
            .unwrap();
        push_tx
            .send(SubscriptionPush {
                key: "blockchain.scripthash.subscribe:ab".to_string(),
                value: json!(null),
            })
            .await
            .unwrap();
        drop(push_tx);

        assert_eq!(report_headers(header_rx).await, 1);
        assert_eq!(report_pushes(push_rx).await, 2);
    }
}
