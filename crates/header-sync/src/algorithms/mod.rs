//! # Algorithms Module
//!
//! Proof-of-work math and fork-choice helpers.

pub mod fork_choice;
pub mod pow;

pub use fork_choice::{backfill_once, link_batch, select_canonical};
pub use pow::{check_work, difficulty, sha256d, target};
