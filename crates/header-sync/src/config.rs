//! # Sync Configuration
//!
//! Configuration for the header sync coordinator and protocol client.

use crate::domain::{DEFAULT_BATCH_SIZE, DEFAULT_RELAY_CAPACITY};
use serde::{Deserialize, Serialize};

/// What a relay does when its bounded output queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPolicy {
    /// Wait for the consumer to make room.
    #[default]
    Backpressure,
    /// Drop the incoming push and log it.
    DropNewest,
}

/// Header sync configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum headers requested per catch-up window.
    pub batch_size: usize,

    /// Capacity of each bounded relay queue and push stream.
    pub relay_capacity: usize,

    /// Overflow behaviour of relay queues.
    pub relay_policy: RelayPolicy,

    /// Protocol request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            relay_capacity: DEFAULT_RELAY_CAPACITY,
            relay_policy: RelayPolicy::Backpressure,
            request_timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Create a config for testing (smaller values).
    pub fn for_testing() -> Self {
        Self {
            batch_size: 16,
            relay_capacity: 8,
            relay_policy: RelayPolicy::Backpressure,
            request_timeout_secs: 5,
        }
    }
}
