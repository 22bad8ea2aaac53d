//! # Inbound Ports
//!
//! API trait defining what the header chain can do.

use crate::domain::{BatchOutcome, BlockHeader, ChainTip, HeaderSyncError, StoredHeader};

/// Header chain API - inbound port.
///
/// Implemented by the fork-choice engine; the sync coordinator and the
/// node binary drive the chain only through this trait.
pub trait HeaderChainApi: Send + Sync {
    /// Validate and persist a single header.
    ///
    /// # Errors
    /// - `Consensus` if the header fails proof-of-work (nothing persisted)
    /// - `Persistence` on storage failure
    fn accept(&self, header: BlockHeader) -> Result<StoredHeader, HeaderSyncError>;

    /// Parse, validate and persist a hex-encoded header.
    fn accept_hex(&self, hex_str: &str) -> Result<StoredHeader, HeaderSyncError> {
        self.accept(BlockHeader::from_hex(hex_str)?)
    }

    /// Validate, link and persist a batch in one atomic write.
    fn accept_batch(&self, headers: Vec<BlockHeader>) -> Result<BatchOutcome, HeaderSyncError>;

    /// Resolve stored orphans whose ancestry became known. Returns how
    /// many headers were resolved.
    fn resolve_orphans(&self) -> Result<usize, HeaderSyncError>;

    /// All headers tied at maximum accumulated work.
    fn heaviest(&self) -> Result<Vec<StoredHeader>, HeaderSyncError>;

    /// Heaviest header after the deterministic tie-break.
    fn canonical_tip(&self) -> Result<Option<ChainTip>, HeaderSyncError>;
}
