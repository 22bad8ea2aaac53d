//! # Domain Entities
//!
//! The 80-byte block header, its stored form, and the linkage
//! (height / accumulated work) derived when it joins the header tree.

use super::errors::HeaderSyncError;
use super::value_objects::{BlockHash, ChainParams, CompactTarget};
use crate::algorithms::pow::sha256d;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Encoded size of a block header.
pub const HEADER_SIZE: usize = 80;

/// Block header parsed from its fixed 80-byte wire encoding.
///
/// Layout: version (4 LE) | prev_hash (32) | merkle_root (32) |
/// timestamp (4 LE) | bits (4 LE) | nonce (4 LE).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Double-SHA-256 of `raw`, display order.
    pub hash: BlockHash,
    /// Block version.
    pub version: i32,
    /// Parent hash, display order.
    pub prev_hash: BlockHash,
    /// Merkle root in wire order.
    #[serde(with = "hex_array")]
    pub merkle_root: [u8; 32],
    /// Unix timestamp.
    pub timestamp: u32,
    /// Compact target.
    pub bits: CompactTarget,
    /// Nonce.
    pub nonce: u32,
    /// Exact wire encoding.
    #[serde(with = "hex_array")]
    raw: [u8; HEADER_SIZE],
}

impl BlockHeader {
    /// Parse a header from its wire encoding.
    ///
    /// # Errors
    /// - `Format` if `raw` is not exactly 80 bytes
    pub fn parse(raw: &[u8]) -> Result<Self, HeaderSyncError> {
        let raw: [u8; HEADER_SIZE] = raw.try_into().map_err(|_| {
            HeaderSyncError::Format(format!(
                "expected {} bytes, got {}",
                HEADER_SIZE,
                raw.len()
            ))
        })?;

        Ok(Self {
            hash: BlockHash::from_internal_bytes(sha256d(&raw)),
            version: i32::from_le_bytes(field(&raw, 0)),
            prev_hash: BlockHash::from_internal_bytes(field(&raw, 4)),
            merkle_root: field(&raw, 36),
            timestamp: u32::from_le_bytes(field(&raw, 68)),
            bits: CompactTarget::from_le_bytes(field(&raw, 72)),
            nonce: u32::from_le_bytes(field(&raw, 76)),
            raw,
        })
    }

    /// Parse a hex-encoded header.
    ///
    /// # Errors
    /// - `Format` on invalid hex or a decoded length other than 80 bytes
    pub fn from_hex(hex_str: &str) -> Result<Self, HeaderSyncError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| HeaderSyncError::Format(format!("invalid hex: {}", e)))?;
        Self::parse(&bytes)
    }

    /// Wire encoding.
    pub fn raw(&self) -> &[u8; HEADER_SIZE] {
        &self.raw
    }

    /// Wire encoding, hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }
}

mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; N];
        hex::decode_to_slice(&s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}

fn field<const N: usize>(raw: &[u8; HEADER_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[offset..offset + N]);
    out
}

/// Where a stored header sits in the header tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainPosition {
    /// Parent not yet known (or itself unresolved); no height or work.
    Unresolved,
    /// Linked to a resolved ancestor.
    Resolved {
        /// Block height.
        height: u64,
        /// Sum of difficulties from the earliest resolvable ancestor.
        accumulated_work: U256,
    },
}

impl ChainPosition {
    /// Height, if resolved.
    pub fn height(&self) -> Option<u64> {
        match self {
            Self::Resolved { height, .. } => Some(*height),
            Self::Unresolved => None,
        }
    }

    /// Accumulated work, if resolved.
    pub fn accumulated_work(&self) -> Option<U256> {
        match self {
            Self::Resolved {
                accumulated_work, ..
            } => Some(*accumulated_work),
            Self::Unresolved => None,
        }
    }

    /// Is this position resolved?
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    /// Position of a child with the given difficulty, or `None` if its
    /// height or accumulated work would overflow.
    pub fn child(&self, difficulty: U256) -> Option<Self> {
        match self {
            Self::Resolved {
                height,
                accumulated_work,
            } => Some(Self::Resolved {
                height: height.checked_add(1)?,
                accumulated_work: accumulated_work.checked_add(difficulty)?,
            }),
            Self::Unresolved => Some(Self::Unresolved),
        }
    }
}

/// Header as persisted in the header store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    /// The parsed header.
    pub header: BlockHeader,
    /// `target(pow_limit) / target(bits)`.
    pub difficulty: U256,
    /// Linkage into the header tree.
    pub position: ChainPosition,
}

impl StoredHeader {
    /// Wrap a header with its difficulty, unresolved.
    pub fn unresolved(header: BlockHeader, params: &ChainParams) -> Self {
        let difficulty = params.difficulty(header.bits);
        Self {
            header,
            difficulty,
            position: ChainPosition::Unresolved,
        }
    }

    /// Hash shortcut.
    pub fn hash(&self) -> BlockHash {
        self.header.hash
    }

    /// Parent hash shortcut.
    pub fn prev_hash(&self) -> BlockHash {
        self.header.prev_hash
    }

    /// Height, if resolved.
    pub fn height(&self) -> Option<u64> {
        self.position.height()
    }

    /// Accumulated work, if resolved.
    pub fn accumulated_work(&self) -> Option<U256> {
        self.position.accumulated_work()
    }

    /// Link under a parent position.
    ///
    /// # Errors
    /// - `PositionOverflow` if the parent sits at the maximum height or work
    pub fn link_to(&mut self, parent: &ChainPosition) -> Result<(), HeaderSyncError> {
        self.position = parent
            .child(self.difficulty)
            .ok_or(HeaderSyncError::PositionOverflow { hash: self.hash() })?;
        Ok(())
    }
}

/// Result of a batch accept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Headers persisted, in batch order.
    pub accepted: Vec<StoredHeader>,
    /// Headers dropped for insufficient proof of work.
    pub rejected: usize,
    /// Entries that failed to parse.
    pub malformed: usize,
}

impl BatchOutcome {
    /// Number of accepted headers that ended up resolved.
    pub fn resolved_count(&self) -> usize {
        self.accepted
            .iter()
            .filter(|h| h.position.is_resolved())
            .count()
    }
}
