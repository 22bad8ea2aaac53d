//! # Domain Value Objects
//!
//! Immutable value types for header sync: hashes, compact targets,
//! chain parameters and the typed views of protocol payloads.

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Block hash, held in display (big-endian) byte order.
///
/// The wire encoding and the raw double-SHA-256 output are little-endian;
/// use [`BlockHash::from_internal_bytes`] for those.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// Build from bytes already in display order.
    pub const fn from_display_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from wire/internal (little-endian) order.
    pub fn from_internal_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// Display-order bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Wire-order bytes.
    pub fn to_internal_bytes(&self) -> [u8; 32] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    /// Hash interpreted as a big-endian integer (for target comparison).
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Compact ("nBits") target encoding.
///
/// The high byte is the exponent, the low three bytes the mantissa:
/// `target = mantissa * 256^(exponent - 3)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompactTarget(pub u32);

impl CompactTarget {
    /// Decode from the 4 wire bytes (little-endian).
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// Wire bytes (little-endian).
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Exponent byte.
    pub fn exponent(self) -> u32 {
        self.0 >> 24
    }

    /// Low three bytes.
    pub fn mantissa(self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    /// Expand to the full 256-bit target.
    ///
    /// Returns `None` when the expanded value does not fit in 256 bits;
    /// such a header can never satisfy its target.
    pub fn to_target(self) -> Option<U256> {
        let mantissa = U256::from(self.mantissa());
        let exponent = self.exponent() as usize;

        if exponent <= 3 {
            return Some(mantissa >> (8 * (3 - exponent)));
        }
        if mantissa.is_zero() {
            return Some(U256::zero());
        }

        let shift = 8 * (exponent - 3);
        if mantissa.bits() + shift > 256 {
            return None;
        }
        Some(mantissa << shift)
    }
}

impl fmt::Display for CompactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Network consensus parameters used for difficulty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Compact encoding of the easiest allowed target (difficulty 1).
    pub pow_limit_bits: CompactTarget,
}

impl ChainParams {
    /// Reference maximum-target bits of the main network.
    pub const MAINNET_POW_LIMIT_BITS: u32 = 0x1d00_ffff;

    /// Reference maximum-target bits of regression-test networks.
    pub const REGTEST_POW_LIMIT_BITS: u32 = 0x207f_ffff;

    /// Main network parameters.
    pub const fn mainnet() -> Self {
        Self {
            pow_limit_bits: CompactTarget(Self::MAINNET_POW_LIMIT_BITS),
        }
    }

    /// Regression-test parameters (trivially minable targets).
    pub const fn regtest() -> Self {
        Self {
            pow_limit_bits: CompactTarget(Self::REGTEST_POW_LIMIT_BITS),
        }
    }

    /// Maximum target.
    pub fn pow_limit(&self) -> U256 {
        self.pow_limit_bits.to_target().unwrap_or_else(U256::zero)
    }

    /// Difficulty of `bits`: `target(pow_limit) / target(bits)`, integer
    /// division. Zero for targets that are zero or out of range.
    pub fn difficulty(&self, bits: CompactTarget) -> U256 {
        match bits.to_target() {
            Some(target) if !target.is_zero() => self.pow_limit() / target,
            _ => U256::zero(),
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Electrum script hash: SHA-256 of an output script, byte-reversed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHash([u8; 32]);

impl ScriptHash {
    /// Hash an output script.
    pub fn from_script(script: &[u8]) -> Self {
        let mut digest: [u8; 32] = Sha256::digest(script).into();
        digest.reverse();
        Self(digest)
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptHash({})", self)
    }
}

impl FromStr for ScriptHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Header notification payload (`blockchain.headers.subscribe`, raw mode).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderNotification {
    /// 80-byte header, hex encoded.
    pub hex: String,
    /// Height claimed by the server (untrusted).
    pub height: u64,
}

/// Response to a ranged header fetch (`blockchain.block.headers`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeadersWindow {
    /// Number of headers returned.
    pub count: u64,
    /// Concatenated headers, hex encoded.
    pub hex: String,
    /// Maximum count the server will return per request.
    pub max: u64,
}

impl HeadersWindow {
    /// Hex length of one encoded header.
    pub const HEADER_HEX_LEN: usize = 160;

    /// Split the concatenated hex into per-header chunks.
    ///
    /// A trailing short chunk is returned as-is so the parser can report
    /// it as malformed.
    pub fn header_hexes(&self) -> Vec<&str> {
        let mut chunks = Vec::with_capacity(self.hex.len() / Self::HEADER_HEX_LEN + 1);
        let mut rest = self.hex.as_str();
        while !rest.is_empty() {
            let end = rest
                .char_indices()
                .nth(Self::HEADER_HEX_LEN)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let (chunk, tail) = rest.split_at(end);
            chunks.push(chunk);
            rest = tail;
        }
        chunks
    }
}

/// One value relayed from a protocol subscription.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionPush {
    /// Subscription key (topic, plus script hash for address watches).
    pub key: String,
    /// Initial value or pushed notification.
    pub value: serde_json::Value,
}

/// Current chain tip.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainTip {
    /// Tip header hash.
    pub hash: BlockHash,
    /// Tip height.
    pub height: u64,
    /// Accumulated work at the tip.
    pub accumulated_work: U256,
}
