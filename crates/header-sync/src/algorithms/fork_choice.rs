//! # Fork Choice
//!
//! Linking batches of headers into the header tree and picking a tip
//! among equally heavy candidates.
//!
//! ## Batch linkage
//!
//! 1. Seed: the first header (in batch order) whose parent is already
//!    resolved outside the batch takes its position from that parent.
//! 2. One backfill pass in batch order: an unresolved header whose parent
//!    is a resolved member of the same batch inherits from it.
//!
//! Because the pass runs in order, a height-ordered contiguous batch
//! resolves completely. Out-of-order members more than one hop from a
//! resolved ancestor stay unresolved until a later resolution pass.

use crate::domain::{BlockHash, ChainPosition, HeaderSyncError, StoredHeader};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Link a batch in place. `resolved_parent` looks a hash up outside the
/// batch and returns its position if known.
///
/// Returns the index of the seeded header, if any.
pub fn link_batch<F>(
    batch: &mut [StoredHeader],
    mut resolved_parent: F,
) -> Result<Option<usize>, HeaderSyncError>
where
    F: FnMut(&BlockHash) -> Result<Option<ChainPosition>, HeaderSyncError>,
{
    let mut seeded = None;
    for (i, header) in batch.iter_mut().enumerate() {
        if let Some(parent) = resolved_parent(&header.prev_hash())? {
            if parent.is_resolved() {
                header.link_to(&parent)?;
                seeded = Some(i);
                break;
            }
        }
    }

    backfill_once(batch)?;
    Ok(seeded)
}

/// One in-order backfill pass over intra-batch parent links.
///
/// Returns the number of headers resolved by this pass.
pub fn backfill_once(batch: &mut [StoredHeader]) -> Result<usize, HeaderSyncError> {
    let index: HashMap<BlockHash, usize> = batch
        .iter()
        .enumerate()
        .map(|(i, h)| (h.hash(), i))
        .collect();

    let mut resolved = 0;
    for i in 0..batch.len() {
        if batch[i].position.is_resolved() {
            continue;
        }
        let Some(&parent_idx) = index.get(&batch[i].prev_hash()) else {
            continue;
        };
        let parent = batch[parent_idx].position;
        if parent.is_resolved() {
            batch[i].link_to(&parent)?;
            resolved += 1;
        }
    }
    Ok(resolved)
}

/// Deterministic pick among candidate tips: most work, then greatest
/// height, then smallest hash.
pub fn select_canonical(candidates: &[StoredHeader]) -> Option<&StoredHeader> {
    candidates
        .iter()
        .filter(|h| h.position.is_resolved())
        .max_by_key(|h| (h.accumulated_work(), h.height(), Reverse(h.hash())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockHeader, ChainParams};
    use primitive_types::U256;

    fn make(prev: BlockHash, nonce: u32) -> StoredHeader {
        let mut raw = [0u8; 80];
        raw[4..36].copy_from_slice(&prev.to_internal_bytes());
        raw[72..76].copy_from_slice(&0x207f_ffffu32.to_le_bytes());
        raw[76..80].copy_from_slice(&nonce.to_le_bytes());
        StoredHeader::unresolved(BlockHeader::parse(&raw).unwrap(), &ChainParams::regtest())
    }

    fn chain(root_prev: BlockHash, len: u32) -> Vec<StoredHeader> {
        let mut out: Vec<StoredHeader> = Vec::new();
        let mut prev = root_prev;
        for n in 0..len {
            let h = make(prev, n);
            prev = h.hash();
            out.push(h);
        }
        out
    }

    fn root_position() -> ChainPosition {
        ChainPosition::Resolved {
            height: 100,
            accumulated_work: U256::from(1000u64),
        }
    }

    #[test]
    fn test_ordered_batch_fully_resolves() {
        let anchor = BlockHash::from_display_bytes([9u8; 32]);
        let mut batch = chain(anchor, 5);

        let seeded = link_batch(&mut batch, |h| {
            Ok((*h == anchor).then(root_position))
        })
        .unwrap();

        assert_eq!(seeded, Some(0));
        for (i, h) in batch.iter().enumerate() {
            assert_eq!(h.height(), Some(101 + i as u64));
            assert_eq!(h.accumulated_work(), Some(U256::from(1001u64 + i as u64)));
        }
    }

    #[test]
    fn test_reversed_batch_resolves_one_hop() {
        let anchor = BlockHash::from_display_bytes([9u8; 32]);
        let mut batch = chain(anchor, 3);
        batch.reverse(); // [h2, h1, h0]

        link_batch(&mut batch, |h| Ok((*h == anchor).then(root_position))).unwrap();

        // h0 seeded, h1 resolved from h0 in the pass, h2 visited before h1
        assert_eq!(batch[2].height(), Some(101));
        assert_eq!(batch[1].height(), Some(102));
        assert_eq!(batch[0].height(), None);
    }

    #[test]
    fn test_unresolved_store_parent_does_not_seed() {
        let anchor = BlockHash::from_display_bytes([9u8; 32]);
        let mut batch = chain(anchor, 2);

        let seeded =
            link_batch(&mut batch, |_| Ok(Some(ChainPosition::Unresolved))).unwrap();

        assert_eq!(seeded, None);
        assert!(batch.iter().all(|h| !h.position.is_resolved()));
    }

    #[test]
    fn test_lookup_error_propagates() {
        let mut batch = chain(BlockHash::default(), 1);
        let result = link_batch(&mut batch, |_| {
            Err(HeaderSyncError::Protocol("boom".to_string()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_overflowing_parent_fails_batch() {
        let anchor = BlockHash::from_display_bytes([9u8; 32]);
        let mut batch = chain(anchor, 2);
        let top = ChainPosition::Resolved {
            height: u64::MAX,
            accumulated_work: U256::one(),
        };

        let result = link_batch(&mut batch, |h| Ok((*h == anchor).then_some(top)));
        assert!(matches!(result, Err(HeaderSyncError::PositionOverflow { .. })));
    }

    #[test]
    fn test_select_canonical_tie_break() {
        let mut a = make(BlockHash::default(), 1);
        let mut b = make(BlockHash::default(), 2);
        let tied = ChainPosition::Resolved {
            height: 5,
            accumulated_work: U256::from(50u64),
        };
        a.position = tied;
        b.position = tied;

        let expected = if a.hash() < b.hash() { a.hash() } else { b.hash() };
        let candidates = vec![a.clone(), b.clone()];
        assert_eq!(select_canonical(&candidates).unwrap().hash(), expected);

        b.position = ChainPosition::Resolved {
            height: 5,
            accumulated_work: U256::from(51u64),
        };
        let candidates = vec![a, b.clone()];
        assert_eq!(select_canonical(&candidates).unwrap().hash(), b.hash());
    }

    #[test]
    fn test_select_canonical_empty() {
        assert!(select_canonical(&[]).is_none());
    }
}
