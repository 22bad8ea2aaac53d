//! # Proof of Work
//!
//! Header hashing and target checks.

use crate::domain::{BlockHeader, ChainParams, CompactTarget};
use primitive_types::U256;
use sha2::{Digest, Sha256};

/// Double SHA-256, in internal (little-endian) byte order.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Target encoded by `bits`, or `None` if it overflows 256 bits.
pub fn target(bits: CompactTarget) -> Option<U256> {
    bits.to_target()
}

/// Difficulty of `bits` relative to the network's maximum target.
pub fn difficulty(params: &ChainParams, bits: CompactTarget) -> U256 {
    params.difficulty(bits)
}

/// True iff the header hash, read as a big-endian integer, is at most
/// the target its own `bits` encode.
pub fn check_work(header: &BlockHeader) -> bool {
    match header.bits.to_target() {
        Some(target) => header.hash.to_u256() <= target,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    fn raw_header(bits: u32, nonce: u32, timestamp: u32) -> [u8; 80] {
        let mut raw = [0u8; 80];
        raw[0..4].copy_from_slice(&1i32.to_le_bytes());
        raw[68..72].copy_from_slice(&timestamp.to_le_bytes());
        raw[72..76].copy_from_slice(&bits.to_le_bytes());
        raw[76..80].copy_from_slice(&nonce.to_le_bytes());
        raw
    }

    #[test]
    fn test_sha256d_empty() {
        // Well-known double SHA-256 of the empty string
        assert_eq!(
            hex::encode(sha256d(&[])),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_genesis_passes_mainnet_work() {
        let genesis = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        assert!(check_work(&genesis));
        assert_eq!(difficulty(&ChainParams::mainnet(), genesis.bits), U256::one());
    }

    #[test]
    fn test_tampered_genesis_fails_work() {
        let mut raw = *BlockHeader::from_hex(GENESIS_HEX).unwrap().raw();
        raw[76] ^= 0x01;
        let tampered = BlockHeader::parse(&raw).unwrap();
        assert!(!check_work(&tampered));
    }

    #[test]
    fn test_overflowing_target_never_passes() {
        let header = BlockHeader::parse(&raw_header(0xff7f_ffff, 0, 0)).unwrap();
        assert_eq!(target(header.bits), None);
        assert!(!check_work(&header));
    }

    proptest! {
        #[test]
        fn prop_check_work_matches_target_comparison(
            exponent in 0u32..=0x22,
            mantissa in 0u32..0x0080_0000,
            nonce in any::<u32>(),
            timestamp in any::<u32>(),
        ) {
            let bits = (exponent << 24) | mantissa;
            let header = BlockHeader::parse(&raw_header(bits, nonce, timestamp)).unwrap();
            let expected = match target(header.bits) {
                Some(t) => header.hash.to_u256() <= t,
                None => false,
            };
            prop_assert_eq!(check_work(&header), expected);
        }

        #[test]
        fn prop_hash_above_target_rejected(nonce in any::<u32>(), timestamp in any::<u32>()) {
            // target = 0xffff: any realistic hash exceeds it
            let header = BlockHeader::parse(&raw_header(0x0300_ffff, nonce, timestamp)).unwrap();
            prop_assume!(header.hash.to_u256() > U256::from(0xffffu64));
            prop_assert!(!check_work(&header));
        }
    }
}
