//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements the outbound port traits: storage and the Electrum protocol.

mod electrum;
mod memory;

pub use electrum::ElectrumClient;
pub use memory::InMemoryKVStore;
