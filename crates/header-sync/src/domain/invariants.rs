//! # Domain Invariants
//!
//! Rules every persisted header must satisfy.

use super::entities::StoredHeader;
use super::errors::HeaderSyncError;
use crate::algorithms::pow::check_work;

/// Default number of headers requested per catch-up window
/// (one retarget period).
pub const DEFAULT_BATCH_SIZE: usize = 2016;

/// Default capacity of each relay queue.
pub const DEFAULT_RELAY_CAPACITY: usize = 1024;

/// Invariant: a header failing proof-of-work is never persisted.
pub fn invariant_proof_of_work(header: &StoredHeader) -> Result<(), HeaderSyncError> {
    if !check_work(&header.header) {
        return Err(HeaderSyncError::Consensus {
            hash: header.hash(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockHeader, ChainParams};

    #[test]
    fn test_proof_of_work_rejects_impossible_target() {
        let mut raw = [0u8; 80];
        raw[72..76].copy_from_slice(&0x0300_0001u32.to_le_bytes());
        let header = BlockHeader::parse(&raw).unwrap();
        let stored = StoredHeader::unresolved(header, &ChainParams::regtest());
        assert!(matches!(
            invariant_proof_of_work(&stored),
            Err(HeaderSyncError::Consensus { .. })
        ));
    }
}
