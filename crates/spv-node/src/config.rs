//! # Node Configuration
//!
//! Runtime parameters for the SPV node, with defaults overridable from the
//! environment.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SPV_ELECTRUM_ADDR` | `electrum_addr` |
//! | `SPV_DATA_DIR` | `data_dir` |
//! | `SPV_NETWORK` | `network` (`mainnet` / `regtest`) |
//! | `SPV_STATUS_INTERVAL_SECS` | `status_interval_secs` |
//! | `SPV_BATCH_SIZE` | `sync.batch_size` |
//! | `SPV_WATCH_SCRIPTS` | `watch_scripts` (comma-separated script hex) |

use header_sync::{BlockHeader, ChainParams, HeaderSyncError, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Mainnet genesis header.
const MAINNET_GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

/// Regtest genesis header.
const REGTEST_GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4adae5494dffff7f2002000000";

/// Network the node follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// Main network.
    #[default]
    Mainnet,
    /// Local regression-test network (trivial proof of work).
    Regtest,
}

impl Network {
    /// Proof-of-work parameters.
    pub fn params(self) -> ChainParams {
        match self {
            Network::Mainnet => ChainParams::mainnet(),
            Network::Regtest => ChainParams::regtest(),
        }
    }

    /// Genesis header, seeded as the resolved root at height 0.
    pub fn genesis(self) -> Result<BlockHeader, HeaderSyncError> {
        match self {
            Network::Mainnet => BlockHeader::from_hex(MAINNET_GENESIS_HEX),
            Network::Regtest => BlockHeader::from_hex(REGTEST_GENESIS_HEX),
        }
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ConfigError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Network name not recognised.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// Electrum server address missing.
    #[error("Electrum server address is empty")]
    MissingElectrumAddr,

    /// A watched script is not valid hex.
    #[error("Watched script is not valid hex: {0}")]
    InvalidScript(String),

    /// A numeric setting is out of range.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Offending field
        field: &'static str,
    },
}

/// Complete node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Electrum server, `host:port`.
    pub electrum_addr: String,
    /// Directory of the persistent header store.
    pub data_dir: PathBuf,
    /// Network to follow.
    pub network: Network,
    /// Seconds between status reports.
    pub status_interval_secs: u64,
    /// Output scripts (hex) whose script hashes are watched.
    pub watch_scripts: Vec<String>,
    /// Sync coordinator settings.
    pub sync: SyncConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            electrum_addr: "127.0.0.1:50001".to_string(),
            data_dir: PathBuf::from("./data/headers"),
            network: Network::Mainnet,
            status_interval_secs: 15,
            watch_scripts: Vec::new(),
            sync: SyncConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Defaults overridden from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Apply overrides from `lookup` (environment variable name to value).
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SPV_ELECTRUM_ADDR") {
            self.electrum_addr = addr;
        }
        if let Some(dir) = lookup("SPV_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(network) = lookup("SPV_NETWORK") {
            match network.parse() {
                Ok(n) => self.network = n,
                Err(e) => warn!("Ignoring SPV_NETWORK: {}", e),
            }
        }
        if let Some(secs) = lookup("SPV_STATUS_INTERVAL_SECS") {
            match secs.parse() {
                Ok(s) => self.status_interval_secs = s,
                Err(_) => warn!("Ignoring SPV_STATUS_INTERVAL_SECS: not a number"),
            }
        }
        if let Some(size) = lookup("SPV_BATCH_SIZE") {
            match size.parse() {
                Ok(s) => self.sync.batch_size = s,
                Err(_) => warn!("Ignoring SPV_BATCH_SIZE: not a number"),
            }
        }
        if let Some(scripts) = lookup("SPV_WATCH_SCRIPTS") {
            self.watch_scripts = scripts
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            info!("Watching {} scripts from environment", self.watch_scripts.len());
        }
    }

    /// Check the configuration before startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.electrum_addr.trim().is_empty() {
            return Err(ConfigError::MissingElectrumAddr);
        }
        if self.status_interval_secs == 0 {
            return Err(ConfigError::Zero {
                field: "status_interval_secs",
            });
        }
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Zero {
                field: "sync.batch_size",
            });
        }
        if self.sync.relay_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "sync.relay_capacity",
            });
        }
        for script in &self.watch_scripts {
            if hex::decode(script).is_err() {
                return Err(ConfigError::InvalidScript(script.clone()));
            }
        }
        Ok(())
    }

    /// Decoded watched scripts. Call after [`Self::validate`].
    pub fn scripts(&self) -> Vec<Vec<u8>> {
        self.watch_scripts
            .iter()
            .filter_map(|s| hex::decode(s).ok())
            .collect()
    }
}
