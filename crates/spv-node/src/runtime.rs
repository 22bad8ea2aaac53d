//! # Node Runtime
//!
//! Wires the header store, fork-choice engine and sync coordinator to one
//! protocol client and runs them until shutdown.
//!
//! ## Startup Sequence
//!
//! 1. Open the header store and check its schema version
//! 2. Seed the network genesis header (if not present)
//! 3. Subscribe to chain-tip headers
//! 4. Catch up from the local tip to the server tip (background task)
//! 5. Watch configured scripts
//! 6. Start status reporting

use crate::adapters::NodeStore;
use crate::config::NodeConfig;
use crate::status::{report_headers, report_pushes, StatusReporter};
use anyhow::{Context, Result};
use header_sync::{
    ForkChoiceEngine, HeaderChainApi, HeaderStore, HeaderSyncError, KeyValueStore, ProtocolClient,
    RelayTask, SyncCoordinator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long shutdown waits for each task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A running SPV node.
pub struct SpvNode<C: ProtocolClient + 'static, S: KeyValueStore + 'static> {
    coordinator: SyncCoordinator<C, S>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<RelayTask>,
    initial_sync: Option<JoinHandle<Result<u64, HeaderSyncError>>>,
}

impl<C: ProtocolClient + 'static> SpvNode<C, NodeStore> {
    /// Open the configured store and start the node.
    pub async fn start(config: NodeConfig, client: Arc<C>) -> Result<Self> {
        let store = NodeStore::open(&config.data_dir).context("Failed to open header store")?;
        info!("Header store backend: {}", store.backend());
        Self::start_with_store(config, client, store).await
    }
}

impl<C, S> SpvNode<C, S>
where
    C: ProtocolClient + 'static,
    S: KeyValueStore + 'static,
{
    /// Start the node over an already opened key-value store.
    pub async fn start_with_store(config: NodeConfig, client: Arc<C>, kv: S) -> Result<Self> {
        info!("===========================================");
        info!("  SPV Node v{}", crate::VERSION);
        info!("  Network: {:?}", config.network);
        info!("  Electrum: {}", config.electrum_addr);
        info!("===========================================");

        let store = HeaderStore::new(kv);
        store
            .ensure_schema()
            .context("Header store schema check failed")?;

        let engine = Arc::new(ForkChoiceEngine::new(store, config.network.params()));
        initialize_genesis(&engine, &config)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = SyncCoordinator::new(
            client,
            Arc::clone(&engine),
            config.sync.clone(),
            shutdown_rx.clone(),
        );

        let capacity = config.sync.relay_capacity.max(1);
        let (header_tx, header_rx) = mpsc::channel(capacity);
        let (push_tx, push_rx) = mpsc::channel(capacity);

        let mut tasks: Vec<RelayTask> = Vec::new();
        tasks.push(tokio::spawn(async move {
            let seen = report_headers(header_rx).await;
            info!("Header reporter finished after {} headers", seen);
            Ok::<_, HeaderSyncError>(())
        }));
        tasks.push(tokio::spawn(async move {
            let seen = report_pushes(push_rx).await;
            info!("Status push reporter finished after {} pushes", seen);
            Ok::<_, HeaderSyncError>(())
        }));

        tasks.push(
            coordinator
                .subscribe_headers(header_tx.clone())
                .await
                .context("Failed to subscribe to chain-tip headers")?,
        );

        let sync = coordinator.clone();
        let initial_sync = tokio::spawn(async move {
            let result = sync.sync_to_tip(&header_tx).await;
            match &result {
                Ok(synced) => info!("Initial catch-up finished, {} headers synced", synced),
                Err(HeaderSyncError::ShutdownRequested) => {
                    info!("Initial catch-up interrupted by shutdown")
                }
                Err(e) => error!("Initial catch-up failed: {}", e),
            }
            result
        });

        for script in config.scripts() {
            tasks.extend(coordinator.watch_script(&script, push_tx.clone()).await);
        }
        drop(push_tx);

        let reporter = StatusReporter::new(
            Arc::clone(&engine),
            Duration::from_secs(config.status_interval_secs.max(1)),
        );
        tasks.push(tokio::spawn(async move {
            reporter.run(shutdown_rx).await;
            Ok::<_, HeaderSyncError>(())
        }));

        info!("Node started");
        Ok(Self {
            coordinator,
            shutdown_tx,
            tasks,
            initial_sync: Some(initial_sync),
        })
    }

    /// Wait for the initial catch-up and return the number of headers it
    /// received.
    ///
    /// # Errors
    /// Fails if the catch-up failed or was already awaited.
    pub async fn wait_for_sync(&mut self) -> Result<u64> {
        let handle = self
            .initial_sync
            .take()
            .context("Initial catch-up already awaited")?;
        let synced = handle
            .await
            .context("Initial catch-up task panicked")?
            .context("Initial catch-up failed")?;
        Ok(synced)
    }

    /// The fork-choice engine.
    pub fn engine(&self) -> &Arc<ForkChoiceEngine<S>> {
        self.coordinator.engine()
    }

    /// The sync coordinator.
    pub fn coordinator(&self) -> &SyncCoordinator<C, S> {
        &self.coordinator
    }

    /// Shutdown the node gracefully.
    ///
    /// ## Shutdown Sequence
    ///
    /// 1. Signal shutdown to all tasks
    /// 2. Wait for each task (with timeout)
    /// 3. Abort stragglers
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        if let Some(mut sync) = self.initial_sync {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut sync).await.is_err() {
                warn!("Initial catch-up did not stop in time, aborting");
                sync.abort();
            }
        }

        for mut task in self.tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("Task ended with error: {}", e),
                Ok(Err(e)) => warn!("Task ended abnormally: {}", e),
                Err(_) => {
                    warn!("Task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        if self.coordinator.dropped_pushes() > 0 {
            warn!(
                "{} pushes were dropped on full relay channels",
                self.coordinator.dropped_pushes()
            );
        }
        info!("Shutdown complete");
    }
}

/// Seed the network genesis header as the resolved root if it is missing.
fn initialize_genesis<S: KeyValueStore>(
    engine: &ForkChoiceEngine<S>,
    config: &NodeConfig,
) -> Result<()> {
    info!("Checking for genesis header...");
    let genesis = config
        .network
        .genesis()
        .context("Invalid built-in genesis header")?;

    if engine.store().find_by_hash(&genesis.hash)?.is_some() {
        info!("Genesis header found, chain initialized");
        return Ok(());
    }

    let work = engine.params().difficulty(genesis.bits);
    engine
        .seed_checkpoint(genesis, 0, work)
        .context("Failed to seed genesis header")?;

    if let Some(tip) = engine.canonical_tip()? {
        info!("Genesis header stored: {}", tip.hash);
    }
    Ok(())
}
