//! # Outbound Ports
//!
//! Traits for external dependencies: the key-value store under the header
//! store, and the Electrum-style protocol collaborator.

use crate::domain::{HeaderSyncError, KVStoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Subscription topic for new chain-tip headers.
pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";

/// Method for a ranged header fetch.
pub const BLOCK_HEADERS: &str = "blockchain.block.headers";

/// Subscription topic for script-hash status changes.
pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";

/// Abstract key-value store interface.
///
/// `prefix_scan` returns entries in ascending key order.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either all operations in the batch are applied, or none are.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;

    /// The entry with the greatest key starting with `prefix`.
    ///
    /// Backends with reverse iteration should override the full scan.
    fn prefix_last(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(self.prefix_scan(prefix)?.pop())
    }
}

/// Smallest key greater than every key starting with `prefix`, or `None`
/// if the prefix is all `0xff`.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put {
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// Key
        key: Vec<u8>,
    },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Stream of pushed notifications for one subscription.
///
/// Ends (`recv` returns `None`) when the subscription closes.
pub type PushStream = mpsc::Receiver<Value>;

/// Electrum-style protocol collaborator - outbound port.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Subscribe to `topic`. Returns the initial value and the stream of
    /// later pushes.
    async fn subscribe(
        &self,
        topic: &str,
        params: Vec<Value>,
    ) -> Result<(Value, PushStream), HeaderSyncError>;

    /// One request/response call.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, HeaderSyncError>;
}

/// Key a subscription by topic and, when the first parameter is a string
/// (a script hash), by that parameter too.
///
/// Applies equally to subscribe requests and to server notifications, so
/// both sides of a subscription land on the same key.
pub fn subscription_key(topic: &str, params: &[Value]) -> String {
    match params.first() {
        Some(Value::String(s)) => format!("{}:{}", topic, s),
        _ => topic.to_string(),
    }
}

// =============================================================================
// Mock Implementation for Testing
// =============================================================================

/// Mock protocol client for testing.
///
/// Serves `blockchain.block.headers` from `headers` (hex, indexed by
/// height) and lets tests push notifications into open subscriptions.
pub struct MockProtocolClient {
    /// Headers by height, hex encoded.
    pub headers: Vec<String>,
    /// Maximum window the mock server returns.
    pub max_window: u64,
    /// Should return errors?
    pub should_fail: bool,
    /// Capacity of each push stream.
    pub push_capacity: usize,
    /// Delay before answering each request.
    pub request_delay: Option<Duration>,
    initial: Mutex<HashMap<String, Value>>,
    senders: Mutex<HashMap<String, mpsc::Sender<Value>>>,
    requests: Mutex<Vec<(String, Vec<Value>)>>,
}

impl Default for MockProtocolClient {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            max_window: 2016,
            should_fail: false,
            push_capacity: 64,
            request_delay: None,
            initial: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockProtocolClient {
    /// Mock serving the given headers (hex, by height).
    pub fn with_headers(headers: Vec<String>) -> Self {
        Self {
            headers,
            ..Default::default()
        }
    }

    /// Set the initial value returned when `key` is subscribed.
    pub fn set_initial(&self, key: impl Into<String>, value: Value) {
        self.initial.lock().insert(key.into(), value);
    }

    /// Push a notification into the subscription under `key`.
    ///
    /// Returns false if nothing is subscribed under `key` or the receiver
    /// is gone.
    pub async fn push(&self, key: &str, value: Value) -> bool {
        let sender = self.senders.lock().get(key).cloned();
        match sender {
            Some(tx) => tx.send(value).await.is_ok(),
            None => false,
        }
    }

    /// Close the subscription under `key`.
    pub fn close(&self, key: &str) {
        self.senders.lock().remove(key);
    }

    /// Is anything subscribed under `key`?
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.senders.lock().contains_key(key)
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<(String, Vec<Value>)> {
        self.requests.lock().clone()
    }

    fn headers_window(&self, params: &[Value]) -> Result<Value, HeaderSyncError> {
        let start = params.first().and_then(Value::as_u64).ok_or_else(|| {
            HeaderSyncError::Protocol("missing start height".to_string())
        })?;
        let count = params
            .get(1)
            .and_then(Value::as_u64)
            .ok_or_else(|| HeaderSyncError::Protocol("missing count".to_string()))?;

        let start = start as usize;
        let end = (start + count.min(self.max_window) as usize).min(self.headers.len());
        let slice = if start >= self.headers.len() {
            &[][..]
        } else {
            &self.headers[start..end]
        };

        Ok(serde_json::json!({
            "count": slice.len(),
            "hex": slice.concat(),
            "max": self.max_window,
        }))
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    async fn subscribe(
        &self,
        topic: &str,
        params: Vec<Value>,
    ) -> Result<(Value, PushStream), HeaderSyncError> {
        if self.should_fail {
            return Err(HeaderSyncError::Protocol("Mock failure".to_string()));
        }

        let key = subscription_key(topic, &params);
        let initial = self.initial.lock().get(&key).cloned().unwrap_or(Value::Null);
        let (tx, rx) = mpsc::channel(self.push_capacity.max(1));
        self.senders.lock().insert(key, tx);
        Ok((initial, rx))
    }

    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, HeaderSyncError> {
        self.requests.lock().push((method.to_string(), params.clone()));
        if let Some(delay) = self.request_delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(HeaderSyncError::Protocol("Mock failure".to_string()));
        }

        match method {
            BLOCK_HEADERS => self.headers_window(&params),
            other => Err(HeaderSyncError::Protocol(format!(
                "unsupported method {}",
                other
            ))),
        }
    }
}
