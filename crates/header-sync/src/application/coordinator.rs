//! # Sync Coordinator
//!
//! Drives the fork-choice engine from an Electrum-style protocol client:
//! live header subscription, windowed catch-up, and relaying of address
//! (script hash) subscriptions to collaborators.
//!
//! Every relay writes into a bounded queue. On a full queue the configured
//! [`RelayPolicy`] either waits or drops the push. Every loop races the
//! shutdown channel and exits once it reads `true`.

use crate::application::engine::ForkChoiceEngine;
use crate::config::{RelayPolicy, SyncConfig};
use crate::domain::{
    BatchOutcome, BlockHash, HeaderNotification, HeaderSyncError, HeadersWindow, ScriptHash,
    StoredHeader, SubscriptionPush,
};
use crate::ports::inbound::HeaderChainApi;
use crate::ports::outbound::{
    subscription_key, KeyValueStore, ProtocolClient, PushStream, BLOCK_HEADERS,
    HEADERS_SUBSCRIBE, SCRIPTHASH_SUBSCRIBE,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one catch-up window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatchUpOutcome {
    /// Height of the first requested header.
    pub start_height: u64,
    /// Headers requested.
    pub requested: u64,
    /// Headers the server returned.
    pub received: u64,
    /// Maximum window the server allows.
    pub server_max: u64,
    /// What the engine did with them.
    pub outcome: BatchOutcome,
    /// Orphans resolved after the batch.
    pub orphans_resolved: usize,
}

impl CatchUpOutcome {
    /// Did the window connect to the resolved header tree?
    pub fn linked(&self) -> bool {
        self.outcome.resolved_count() > 0 || self.orphans_resolved > 0
    }
}

/// A relay task. Ends with `SubscriptionClosed` when the server closes
/// the stream, `Ok` on shutdown or when the consumer goes away.
pub type RelayTask = JoinHandle<Result<(), HeaderSyncError>>;

/// How a relay attempt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Dropped,
    Closed,
    Shutdown,
}

/// Bounded relay into a collaborator's queue.
struct Relay<T> {
    name: String,
    tx: mpsc::Sender<T>,
    policy: RelayPolicy,
    dropped: Arc<AtomicU64>,
    shutdown: watch::Receiver<bool>,
}

impl<T> Relay<T> {
    async fn send(&mut self, item: T) -> Delivery {
        match self.policy {
            RelayPolicy::Backpressure => {
                tokio::select! {
                    sent = self.tx.send(item) => match sent {
                        Ok(()) => Delivery::Delivered,
                        Err(_) => Delivery::Closed,
                    },
                    _ = wait_for_shutdown(&mut self.shutdown) => Delivery::Shutdown,
                }
            }
            RelayPolicy::DropNewest => match self.tx.try_send(item) {
                Ok(()) => Delivery::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "[header-sync] Relay {} full, dropped push ({} dropped so far)",
                        self.name, total
                    );
                    Delivery::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }
}

/// Resolves once the shutdown channel reads `true` or its sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Header sync coordinator.
pub struct SyncCoordinator<C: ProtocolClient, S: KeyValueStore> {
    client: Arc<C>,
    engine: Arc<ForkChoiceEngine<S>>,
    config: SyncConfig,
    shutdown: watch::Receiver<bool>,
    dropped: Arc<AtomicU64>,
}

impl<C: ProtocolClient, S: KeyValueStore> Clone for SyncCoordinator<C, S> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<C, S> SyncCoordinator<C, S>
where
    C: ProtocolClient + 'static,
    S: KeyValueStore + 'static,
{
    /// Create a coordinator around an already-connected client.
    pub fn new(
        client: Arc<C>,
        engine: Arc<ForkChoiceEngine<S>>,
        config: SyncConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            engine,
            config,
            shutdown,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The engine this coordinator feeds.
    pub fn engine(&self) -> &Arc<ForkChoiceEngine<S>> {
        &self.engine
    }

    /// Pushes dropped under [`RelayPolicy::DropNewest`] so far.
    pub fn dropped_pushes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn batch_size(&self) -> u64 {
        self.config.batch_size.max(1) as u64
    }

    fn is_resolved(&self, hash: &BlockHash) -> Result<bool, HeaderSyncError> {
        Ok(self
            .engine
            .store()
            .find_by_hash(hash)?
            .is_some_and(|h| h.position.is_resolved()))
    }

    fn relay<T>(&self, name: impl Into<String>, tx: mpsc::Sender<T>) -> Relay<T> {
        Relay {
            name: name.into(),
            tx,
            policy: self.config.relay_policy,
            dropped: Arc::clone(&self.dropped),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Subscribe to new chain-tip headers.
    ///
    /// The initial header and every push go through single-header accept;
    /// accepted headers are emitted on `out` in acceptance order. A header
    /// that fails to parse or validate is logged and skipped. A header
    /// that arrives unresolved triggers a catch-up up to its claimed
    /// height, reaching below the local tip when it sits on another fork.
    ///
    /// # Errors
    /// - `Protocol` if the subscription cannot be opened
    pub async fn subscribe_headers(
        &self,
        out: mpsc::Sender<StoredHeader>,
    ) -> Result<RelayTask, HeaderSyncError> {
        let (initial, stream) = self.client.subscribe(HEADERS_SUBSCRIBE, vec![]).await?;
        info!("[header-sync] Subscribed to chain-tip headers");

        let this = self.clone();
        Ok(tokio::spawn(async move {
            this.header_loop(initial, stream, out).await
        }))
    }

    async fn header_loop(
        &self,
        initial: Value,
        mut stream: PushStream,
        out: mpsc::Sender<StoredHeader>,
    ) -> Result<(), HeaderSyncError> {
        let mut relay = self.relay(HEADERS_SUBSCRIBE, out.clone());
        let mut shutdown = self.shutdown.clone();

        let mut value = initial;
        loop {
            if !self.handle_header_push(value, &mut relay, &out).await {
                return Ok(());
            }

            value = tokio::select! {
                push = stream.recv() => match push {
                    Some(value) => value,
                    None => {
                        warn!("[header-sync] Header subscription closed");
                        return Err(HeaderSyncError::SubscriptionClosed(
                            HEADERS_SUBSCRIBE.to_string(),
                        ));
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("[header-sync] Shutdown signal received, stopping header relay");
                    return Ok(());
                }
            };
        }
    }

    /// Returns false when the relay loop should stop.
    async fn handle_header_push(
        &self,
        value: Value,
        relay: &mut Relay<StoredHeader>,
        out: &mpsc::Sender<StoredHeader>,
    ) -> bool {
        let notification: HeaderNotification = match serde_json::from_value(value) {
            Ok(n) => n,
            Err(e) => {
                warn!("[header-sync] Ignoring malformed header notification: {}", e);
                return true;
            }
        };

        let stored = match self.engine.accept_hex(&notification.hex) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    "[header-sync] Rejected pushed header at claimed height {}: {}",
                    notification.height, e
                );
                return true;
            }
        };
        let hash = stored.hash();
        let resolved = stored.position.is_resolved();

        match relay.send(stored).await {
            Delivery::Delivered | Delivery::Dropped => {}
            Delivery::Closed => {
                debug!("[header-sync] Header consumer gone, stopping relay");
                return false;
            }
            Delivery::Shutdown => return false,
        }

        if !resolved {
            if let Err(e) = self.fill_gap(hash, notification.height, out).await {
                warn!(
                    "[header-sync] Gap fill up to height {} failed: {}",
                    notification.height, e
                );
            }
        }
        true
    }

    /// Fetch what an unresolved pushed header needs: first the window
    /// from the local tip up to its claimed height, then, if that does not
    /// connect, ever deeper windows below it.
    async fn fill_gap(
        &self,
        hash: BlockHash,
        claimed_height: u64,
        out: &mpsc::Sender<StoredHeader>,
    ) -> Result<(), HeaderSyncError> {
        let start = self.engine.canonical_tip()?.map_or(0, |tip| tip.height + 1);
        if claimed_height >= start {
            let count = (claimed_height - start + 1).min(self.batch_size());
            debug!(
                "[header-sync] Filling gap of {} headers from height {}",
                count, start
            );
            if self.catch_up(start, count, out).await?.linked() {
                return Ok(());
            }
        }
        if self.is_resolved(&hash)? {
            return Ok(());
        }

        let from = claimed_height.min(start);
        if !self.reach_back(from, out).await? {
            warn!(
                "[header-sync] Header {} shares no ancestor with the local chain within {} \
                 headers below height {}",
                hash,
                self.batch_size(),
                from
            );
        }
        Ok(())
    }

    /// Fetch windows below `from`, doubling the depth each time and going
    /// at most one batch deep in total, until one connects to a resolved
    /// header. Orphans above it are resolved by each catch-up.
    ///
    /// Returns whether a connecting window was found.
    async fn reach_back(
        &self,
        from: u64,
        out: &mpsc::Sender<StoredHeader>,
    ) -> Result<bool, HeaderSyncError> {
        let floor = from.saturating_sub(self.batch_size());
        let mut upper = from;
        let mut depth = 1u64;

        while upper > floor {
            let start = upper.saturating_sub(depth).max(floor);
            debug!(
                "[header-sync] Looking for a fork point between heights {} and {}",
                start, upper
            );

            let mut cursor = start;
            let mut linked = false;
            while cursor < upper {
                let result = self.catch_up(cursor, upper - cursor, out).await?;
                linked |= result.linked();
                if result.received == 0 {
                    break;
                }
                cursor += result.received;
            }
            if linked {
                info!("[header-sync] Connected fork below height {}", upper);
                return Ok(true);
            }

            upper = start;
            depth = depth.saturating_mul(2);
        }
        Ok(false)
    }

    /// Fetch `count` headers from `start_height` in one request (no retry),
    /// batch-accept them, then run orphan resolution. Accepted headers are
    /// emitted on `out`.
    ///
    /// # Errors
    /// - `Protocol` if the request fails or the response is not a headers window
    /// - `Persistence` on storage failure
    /// - `ShutdownRequested` if shutdown fires while fetching or emitting
    pub async fn catch_up(
        &self,
        start_height: u64,
        count: u64,
        out: &mpsc::Sender<StoredHeader>,
    ) -> Result<CatchUpOutcome, HeaderSyncError> {
        if self.is_shutdown() {
            return Err(HeaderSyncError::ShutdownRequested);
        }

        let mut shutdown = self.shutdown.clone();
        let request = self
            .client
            .request(BLOCK_HEADERS, vec![json!(start_height), json!(count)]);
        let response = tokio::select! {
            response = request => response?,
            _ = wait_for_shutdown(&mut shutdown) => {
                debug!("[header-sync] Shutdown during catch-up from {}", start_height);
                return Err(HeaderSyncError::ShutdownRequested);
            }
        };
        let window: HeadersWindow = serde_json::from_value(response)
            .map_err(|e| HeaderSyncError::Protocol(format!("bad headers window: {}", e)))?;

        let outcome = self.engine.accept_hex_batch(window.header_hexes())?;
        let orphans_resolved = self.engine.resolve_orphans()?;

        info!(
            "[header-sync] Catch-up from {}: received {}, accepted {}, rejected {}, malformed {}",
            start_height,
            window.count,
            outcome.accepted.len(),
            outcome.rejected,
            outcome.malformed
        );

        let mut relay = self.relay(BLOCK_HEADERS, out.clone());
        for header in &outcome.accepted {
            match relay.send(header.clone()).await {
                Delivery::Delivered | Delivery::Dropped => {}
                Delivery::Closed => {
                    debug!("[header-sync] Header consumer gone, not emitting catch-up headers");
                    break;
                }
                Delivery::Shutdown => return Err(HeaderSyncError::ShutdownRequested),
            }
        }

        Ok(CatchUpOutcome {
            start_height,
            requested: count,
            received: window.count,
            server_max: window.max,
            outcome,
            orphans_resolved,
        })
    }

    /// Catch up window by window from the local best height until the
    /// server returns a short window. A window that does not extend the
    /// local tip means the server follows another fork; the coordinator
    /// then reaches below the tip for the fork point. Returns the number
    /// of headers received.
    ///
    /// # Errors
    /// As [`Self::catch_up`].
    pub async fn sync_to_tip(
        &self,
        out: &mpsc::Sender<StoredHeader>,
    ) -> Result<u64, HeaderSyncError> {
        let mut window = self.batch_size();
        let mut total = 0;

        loop {
            let before = self.engine.canonical_tip()?;
            let start = before.as_ref().map_or(0, |tip| tip.height + 1);

            let result = self.catch_up(start, window, out).await?;
            total += result.received;
            if result.server_max > 0 {
                window = window.min(result.server_max);
            }

            if result.received > 0 && !result.linked() {
                warn!(
                    "[header-sync] Headers from height {} do not extend the local tip",
                    start
                );
                if !self.reach_back(start, out).await? {
                    warn!(
                        "[header-sync] No fork point within {} headers below height {}, stopping",
                        self.batch_size(),
                        start
                    );
                    break;
                }
            }
            if result.received < window.min(result.requested) {
                break;
            }

            let after = self.engine.canonical_tip()?;
            if after.map(|tip| tip.hash) == before.map(|tip| tip.hash) {
                warn!(
                    "[header-sync] Catch-up made no progress at height {}, stopping",
                    start
                );
                break;
            }
        }

        info!("[header-sync] Synced {} headers to tip", total);
        Ok(total)
    }

    /// Subscribe once and relay the initial value and every push onto
    /// `out` until the subscription closes or shutdown is signalled.
    ///
    /// # Errors
    /// - `Protocol` if the subscription cannot be opened
    pub async fn forward_subscription(
        &self,
        topic: &str,
        params: Vec<Value>,
        out: mpsc::Sender<SubscriptionPush>,
    ) -> Result<RelayTask, HeaderSyncError> {
        let key = subscription_key(topic, &params);
        let (initial, mut stream) = self.client.subscribe(topic, params).await?;
        debug!("[header-sync] Forwarding subscription {}", key);

        let mut relay = self.relay(key.clone(), out);
        let mut shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            let mut value = initial;
            loop {
                let push = SubscriptionPush {
                    key: key.clone(),
                    value,
                };
                match relay.send(push).await {
                    Delivery::Delivered | Delivery::Dropped => {}
                    Delivery::Closed | Delivery::Shutdown => return Ok(()),
                }

                value = tokio::select! {
                    push = stream.recv() => match push {
                        Some(value) => value,
                        None => {
                            debug!("[header-sync] Subscription {} closed by server", key);
                            return Err(HeaderSyncError::SubscriptionClosed(key));
                        }
                    },
                    _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                };
            }
        }))
    }

    /// Watch script hashes for status changes. A hash whose subscription
    /// fails is logged and skipped.
    pub async fn watch_scripthashes(
        &self,
        script_hashes: &[ScriptHash],
        out: mpsc::Sender<SubscriptionPush>,
    ) -> Vec<RelayTask> {
        let mut handles = Vec::with_capacity(script_hashes.len());
        for script_hash in script_hashes {
            let params = vec![json!(script_hash.to_string())];
            match self
                .forward_subscription(SCRIPTHASH_SUBSCRIBE, params, out.clone())
                .await
            {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("[header-sync] Cannot watch script hash {}: {}", script_hash, e),
            }
        }
        handles
    }

    /// Watch one output script (raw bytes).
    pub async fn watch_script(
        &self,
        script: &[u8],
        out: mpsc::Sender<SubscriptionPush>,
    ) -> Vec<RelayTask> {
        self.watch_scripthashes(&[ScriptHash::from_script(script)], out)
            .await
    }
}
