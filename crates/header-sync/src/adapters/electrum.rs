//! Electrum Client Adapter
//!
//! Implements the `ProtocolClient` port over one TCP connection speaking
//! newline-delimited JSON-RPC 2.0.
//!
//! A background reader task routes each incoming line:
//! - responses (`id` present) complete the matching pending request
//! - notifications (`method` present) go to the subscription keyed by
//!   [`subscription_key`]; the pushed value is the last notification
//!   parameter, matching the shape of the subscription's initial value

use crate::config::SyncConfig;
use crate::domain::HeaderSyncError;
use crate::ports::outbound::{subscription_key, ProtocolClient, PushStream};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ResponseSender = oneshot::Sender<Result<Value, HeaderSyncError>>;
type PendingMap = Arc<DashMap<u64, ResponseSender>>;
type SubscriptionMap = Arc<DashMap<String, mpsc::Sender<Value>>>;

/// Removes a pending request when its call returns or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, ResponseSender>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Electrum protocol client over a single TCP connection.
pub struct ElectrumClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    subscriptions: SubscriptionMap,
    next_id: AtomicU64,
    timeout: Duration,
    push_capacity: usize,
    reader: JoinHandle<()>,
}

impl ElectrumClient {
    /// Connect to an Electrum server.
    ///
    /// # Errors
    /// - `Protocol` if the TCP connection cannot be established
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: &SyncConfig,
    ) -> Result<Self, HeaderSyncError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| HeaderSyncError::Protocol(format!("connect failed: {}", e)))?;
        if let Ok(peer) = stream.peer_addr() {
            info!("[header-sync] Connected to Electrum server {}", peer);
        }
        let (read_half, write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(DashMap::new());
        let subscriptions: SubscriptionMap = Arc::new(DashMap::new());
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&subscriptions),
        ));

        Ok(Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            subscriptions,
            next_id: AtomicU64::new(0),
            timeout: Duration::from_secs(config.request_timeout_secs),
            push_capacity: config.relay_capacity.max(1),
            reader,
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, HeaderSyncError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let mut line = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();
        line.push('\n');

        debug!("[header-sync] -> {} (id {})", method, id);
        let write_result = {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await
        };
        if let Err(e) = write_result {
            return Err(HeaderSyncError::Protocol(format!("write failed: {}", e)));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HeaderSyncError::Protocol("connection closed".to_string())),
            Err(_) => Err(HeaderSyncError::Protocol(format!(
                "{} timed out after {:?}",
                method, self.timeout
            ))),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ElectrumClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl ProtocolClient for ElectrumClient {
    async fn subscribe(
        &self,
        topic: &str,
        params: Vec<Value>,
    ) -> Result<(Value, PushStream), HeaderSyncError> {
        let key = subscription_key(topic, &params);
        let (tx, rx) = mpsc::channel(self.push_capacity);
        // Registered before the request goes out so no push is missed.
        self.subscriptions.insert(key.clone(), tx);

        match self.call(topic, params).await {
            Ok(initial) => Ok((initial, rx)),
            Err(e) => {
                self.subscriptions.remove(&key);
                Err(e)
            }
        }
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, HeaderSyncError> {
        self.call(method, params).await
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    pending: PendingMap,
    subscriptions: SubscriptionMap,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(message) => dispatch(message, &pending, &subscriptions),
                    Err(e) => warn!("[header-sync] Unparseable server line: {}", e),
                }
            }
            Ok(None) => {
                info!("[header-sync] Electrum server closed the connection");
                break;
            }
            Err(e) => {
                warn!("[header-sync] Electrum read failed: {}", e);
                break;
            }
        }
    }

    // Dropping the senders fails pending calls and ends every push stream.
    pending.clear();
    subscriptions.clear();
}

fn dispatch(message: Value, pending: &PendingMap, subscriptions: &SubscriptionMap) {
    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        let Some((_, tx)) = pending.remove(&id) else {
            debug!("[header-sync] Response for unknown id {}", id);
            return;
        };
        let result = match message.get("error") {
            Some(err) if !err.is_null() => Err(HeaderSyncError::Protocol(err.to_string())),
            _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
        return;
    }

    let Some(method) = message.get("method").and_then(Value::as_str) else {
        debug!("[header-sync] Ignoring message without id or method");
        return;
    };
    let params = match message.get("params") {
        Some(Value::Array(params)) => params.clone(),
        _ => Vec::new(),
    };
    let key = subscription_key(method, &params);
    let value = params.last().cloned().unwrap_or(Value::Null);

    let sent = match subscriptions.get(&key) {
        Some(tx) => tx.try_send(value),
        None => {
            debug!("[header-sync] Notification for unknown subscription {}", key);
            return;
        }
    };
    match sent {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("[header-sync] Push stream {} full, notification dropped", key);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("[header-sync] Subscription {} has no reader, removing", key);
            subscriptions.remove(&key);
        }
    }
}
