//! # Application Module
//!
//! Application services orchestrating the domain and outbound ports.

pub mod coordinator;
pub mod engine;
pub mod store;

pub use coordinator::{CatchUpOutcome, RelayTask, SyncCoordinator};
pub use engine::ForkChoiceEngine;
pub use store::{HeaderStore, StoreWriter, SCHEMA_VERSION};
