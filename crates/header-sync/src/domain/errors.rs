//! # Domain Errors
//!
//! Error types for header sync.
//!
//! Recoverable conditions (bad encoding, insufficient work, storage
//! failures) surface as explicit `Err` values at every API boundary.
//! An unknown parent is not an error: the header is stored unresolved.

use super::value_objects::BlockHash;
use thiserror::Error;

/// Header sync error types.
#[derive(Debug, Error)]
pub enum HeaderSyncError {
    /// Malformed header encoding (bad hex or length != 80 bytes).
    #[error("Malformed header: {0}")]
    Format(String),

    /// Header hash does not satisfy its own compact target.
    #[error("Insufficient proof of work for header {hash}")]
    Consensus {
        /// Hash of the rejected header
        hash: BlockHash,
    },

    /// Storage layer failure.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] KVStoreError),

    /// Linking would overflow the parent's height or accumulated work.
    #[error("Chain position overflows at header {hash}")]
    PositionOverflow {
        /// Hash of the header that could not be linked
        hash: BlockHash,
    },

    /// Protocol collaborator returned an error or an unexpected payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server ended a subscription stream (keyed as by
    /// `subscription_key`).
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    /// The shutdown signal fired while an operation was in flight.
    #[error("Shutdown requested")]
    ShutdownRequested,
}

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError {
        /// Backend message
        message: String,
    },
    /// Data corruption in the store (undecodable row, schema mismatch).
    #[error("KV store corruption: {message}")]
    CorruptionError {
        /// Backend message
        message: String,
    },
}
