//! # Test Utilities
//!
//! Header mining against easy targets. Enabled by the `test-utils` feature
//! and always available to this crate's own unit tests.

use crate::algorithms::pow::check_work;
use crate::domain::{BlockHash, BlockHeader, HEADER_SIZE};

/// Easy compact target used for mined test headers (regtest limit).
pub const EASY_BITS: u32 = 0x207f_ffff;

/// Encode a header with the given fields.
pub fn encode_header(
    prev: BlockHash,
    merkle_root: [u8; 32],
    timestamp: u32,
    bits: u32,
    nonce: u32,
) -> [u8; HEADER_SIZE] {
    let mut raw = [0u8; HEADER_SIZE];
    raw[0..4].copy_from_slice(&1i32.to_le_bytes());
    raw[4..36].copy_from_slice(&prev.to_internal_bytes());
    raw[36..68].copy_from_slice(&merkle_root);
    raw[68..72].copy_from_slice(&timestamp.to_le_bytes());
    raw[72..76].copy_from_slice(&bits.to_le_bytes());
    raw[76..80].copy_from_slice(&nonce.to_le_bytes());
    raw
}

/// Mine a header on `prev` that satisfies `bits`.
///
/// `timestamp` doubles as a salt: siblings mined with different timestamps
/// get different hashes.
///
/// # Panics
/// If no nonce satisfies `bits` (use easy targets only).
pub fn mine_header(prev: BlockHash, bits: u32, timestamp: u32) -> BlockHeader {
    for nonce in 0..=u32::MAX {
        let raw = encode_header(prev, [0u8; 32], timestamp, bits, nonce);
        if let Ok(header) = BlockHeader::parse(&raw) {
            if check_work(&header) {
                return header;
            }
        }
    }
    panic!("no nonce satisfies bits {:#010x}", bits);
}

/// Mine a header whose hash does NOT satisfy `bits`.
pub fn mine_invalid_header(prev: BlockHash, bits: u32, timestamp: u32) -> BlockHeader {
    for nonce in 0..=u32::MAX {
        let raw = encode_header(prev, [0u8; 32], timestamp, bits, nonce);
        if let Ok(header) = BlockHeader::parse(&raw) {
            if !check_work(&header) {
                return header;
            }
        }
    }
    panic!("every nonce satisfies bits {:#010x}", bits);
}

/// Mine `len` linked headers on top of `prev`, all with `bits`.
pub fn mine_chain(prev: BlockHash, len: usize, bits: u32, start_time: u32) -> Vec<BlockHeader> {
    let mut out = Vec::with_capacity(len);
    let mut parent = prev;
    for i in 0..len {
        let header = mine_header(parent, bits, start_time + i as u32);
        parent = header.hash;
        out.push(header);
    }
    out
}
