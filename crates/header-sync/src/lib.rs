//! # Header Sync
//!
//! Consensus-tracking core of an SPV (lightweight) client.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Maintain a persisted view of the strongest known block-header chain fed
//! by an untrusted Electrum-style server:
//! - Parse 80-byte headers and check each one's proof of work
//! - Track height and accumulated work through the header tree, including
//!   headers that arrive before their parents
//! - Report the heaviest tips, with a deterministic tie-break on request
//!
//! ## Pipeline
//!
//! ```text
//! SyncCoordinator -> BlockHeader::parse -> ForkChoiceEngine -> HeaderStore
//!        |                                        |
//!   ProtocolClient                         output channel -> collaborators
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! header-sync/
//! ├── domain/          # BlockHeader, StoredHeader, ChainPosition, errors
//! ├── algorithms/      # Proof of work, batch linkage, tip tie-break
//! ├── ports/           # HeaderChainApi (inbound) + KeyValueStore, ProtocolClient (outbound)
//! ├── adapters/        # InMemoryKVStore, ElectrumClient
//! ├── application/     # HeaderStore, ForkChoiceEngine, SyncCoordinator
//! └── config.rs        # SyncConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports
pub use adapters::{ElectrumClient, InMemoryKVStore};
pub use algorithms::{check_work, difficulty, select_canonical, sha256d, target};
pub use application::{
    CatchUpOutcome, ForkChoiceEngine, HeaderStore, RelayTask, StoreWriter, SyncCoordinator,
};
pub use config::{RelayPolicy, SyncConfig};
pub use domain::{
    BatchOutcome, BlockHash, BlockHeader, ChainParams, ChainPosition, ChainTip, CompactTarget,
    HeaderNotification, HeaderSyncError, HeadersWindow, KVStoreError, ScriptHash, StoredHeader,
    SubscriptionPush, DEFAULT_BATCH_SIZE, DEFAULT_RELAY_CAPACITY, HEADER_SIZE,
};
pub use ports::{
    BatchOperation, HeaderChainApi, KeyValueStore, MockProtocolClient, ProtocolClient, PushStream,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
