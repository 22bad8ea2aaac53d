//! # SPV Node Library
//!
//! This library exposes the internal modules of the SPV node for testing.
//! The main entry point is the `main.rs` binary.
//!
//! ## Modular Structure
//!
//! - `config` - `NodeConfig` with environment overrides
//! - `adapters/` - Header store backends (memory, RocksDB)
//! - `status` - Periodic tip reports and output-channel loggers
//! - `runtime` - `SpvNode` startup and graceful shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod config;
pub mod runtime;
pub mod status;

pub use adapters::NodeStore;
pub use config::{ConfigError, Network, NodeConfig};
pub use runtime::SpvNode;
pub use status::StatusReporter;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
