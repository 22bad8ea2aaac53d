//! # Storage Adapters
//!
//! Backends for the header store. RocksDB is compiled in with the
//! `rocksdb` feature; without it the node keeps headers in memory.

#[cfg(feature = "rocksdb")]
pub mod rocksdb_store;

#[cfg(feature = "rocksdb")]
pub use rocksdb_store::{RocksDbConfig, RocksDbStore};

use header_sync::ports::{BatchOperation, KeyValueStore};
use header_sync::{InMemoryKVStore, KVStoreError};
use std::path::Path;
use tracing::info;

/// The key-value backend selected at startup.
pub enum NodeStore {
    /// Ephemeral store; headers are lost on exit.
    Memory(InMemoryKVStore),
    /// Persistent RocksDB store.
    #[cfg(feature = "rocksdb")]
    RocksDb(RocksDbStore),
}

impl NodeStore {
    /// Open the best available backend at `data_dir`.
    #[cfg(feature = "rocksdb")]
    pub fn open(data_dir: &Path) -> Result<Self, KVStoreError> {
        info!("Opening RocksDB header store at {:?}", data_dir);
        RocksDbStore::open_default(data_dir).map(NodeStore::RocksDb)
    }

    /// Open the best available backend at `data_dir`.
    #[cfg(not(feature = "rocksdb"))]
    pub fn open(data_dir: &Path) -> Result<Self, KVStoreError> {
        tracing::warn!(
            "Built without the rocksdb feature, ignoring {:?} and keeping headers in memory",
            data_dir
        );
        Ok(Self::memory())
    }

    /// Ephemeral in-memory store.
    pub fn memory() -> Self {
        info!("Using in-memory header store");
        NodeStore::Memory(InMemoryKVStore::new())
    }

    /// Backend name for logs.
    pub fn backend(&self) -> &'static str {
        match self {
            NodeStore::Memory(_) => "memory",
            #[cfg(feature = "rocksdb")]
            NodeStore::RocksDb(_) => "rocksdb",
        }
    }

    fn inner(&self) -> &dyn KeyValueStore {
        match self {
            NodeStore::Memory(store) => store,
            #[cfg(feature = "rocksdb")]
            NodeStore::RocksDb(store) => store,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn KeyValueStore {
        match self {
            NodeStore::Memory(store) => store,
            #[cfg(feature = "rocksdb")]
            NodeStore::RocksDb(store) => store,
        }
    }
}

impl KeyValueStore for NodeStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.inner().get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.inner_mut().put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.inner_mut().delete(key)
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        self.inner_mut().atomic_batch_write(operations)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        self.inner().exists(key)
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        self.inner().prefix_scan(prefix)
    }

    fn prefix_last(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        self.inner().prefix_last(prefix)
    }
}
