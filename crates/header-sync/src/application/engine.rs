//! # Fork-Choice Engine
//!
//! Validates headers, links them into the header tree and scores them by
//! accumulated work. The engine never breaks ties between equally heavy
//! tips; [`ForkChoiceEngine::canonical_tip`] applies the caller policy.

use crate::algorithms::fork_choice::{link_batch, select_canonical};
use crate::algorithms::pow::check_work;
use crate::application::store::{HeaderStore, StoreWriter};
use crate::domain::{
    invariant_proof_of_work, BatchOutcome, BlockHash, BlockHeader, ChainParams, ChainPosition,
    ChainTip, HeaderSyncError, StoredHeader,
};
use crate::ports::inbound::HeaderChainApi;
use crate::ports::outbound::KeyValueStore;
use primitive_types::U256;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Fork-choice engine over a header store.
pub struct ForkChoiceEngine<S: KeyValueStore> {
    store: HeaderStore<S>,
    params: ChainParams,
}

impl<S: KeyValueStore> ForkChoiceEngine<S> {
    /// Create an engine for the given network parameters.
    pub fn new(store: HeaderStore<S>, params: ChainParams) -> Self {
        Self { store, params }
    }

    /// The underlying store.
    pub fn store(&self) -> &HeaderStore<S> {
        &self.store
    }

    /// Network parameters.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Parse and accept a raw 80-byte header.
    pub fn accept_raw(&self, raw: &[u8]) -> Result<StoredHeader, HeaderSyncError> {
        self.accept(BlockHeader::parse(raw)?)
    }

    /// Parse and batch-accept hex-encoded headers. Entries that fail to
    /// parse are counted in `malformed` and skipped.
    pub fn accept_hex_batch<I, T>(&self, hexes: I) -> Result<BatchOutcome, HeaderSyncError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut headers = Vec::new();
        let mut malformed = 0;
        for hex_str in hexes {
            match BlockHeader::from_hex(hex_str.as_ref()) {
                Ok(header) => headers.push(header),
                Err(e) => {
                    warn!("[header-sync] Skipping malformed header: {}", e);
                    malformed += 1;
                }
            }
        }

        let mut outcome = self.accept_batch(headers)?;
        outcome.malformed += malformed;
        Ok(outcome)
    }

    /// Store a proof-of-work valid header as a resolved root (genesis or a
    /// trusted checkpoint).
    pub fn seed_checkpoint(
        &self,
        header: BlockHeader,
        height: u64,
        accumulated_work: U256,
    ) -> Result<StoredHeader, HeaderSyncError> {
        let mut stored = StoredHeader::unresolved(header, &self.params);
        invariant_proof_of_work(&stored)?;
        stored.position = ChainPosition::Resolved {
            height,
            accumulated_work,
        };
        self.store.upsert(&stored)?;
        info!(
            "[header-sync] Seeded checkpoint {} at height {}",
            stored.hash(),
            height
        );
        Ok(stored)
    }

    /// Wrap a header for storage, keeping the position of an already
    /// resolved copy so a re-delivered header is never un-resolved.
    fn provisional(
        &self,
        rows: &StoreWriter<'_, S>,
        header: BlockHeader,
    ) -> Result<StoredHeader, HeaderSyncError> {
        let mut stored = StoredHeader::unresolved(header, &self.params);
        if let Some(existing) = rows.find_by_hash(&stored.hash())? {
            if existing.position.is_resolved() {
                stored.position = existing.position;
            }
        }
        Ok(stored)
    }
}

fn resolved_position<S: KeyValueStore>(
    rows: &StoreWriter<'_, S>,
    hash: &BlockHash,
) -> Result<Option<ChainPosition>, HeaderSyncError> {
    Ok(rows
        .find_by_hash(hash)?
        .map(|h| h.position)
        .filter(ChainPosition::is_resolved))
}

impl<S: KeyValueStore> HeaderChainApi for ForkChoiceEngine<S> {
    fn accept(&self, header: BlockHeader) -> Result<StoredHeader, HeaderSyncError> {
        if !check_work(&header) {
            warn!("[header-sync] Rejected header {}: insufficient work", header.hash);
            return Err(HeaderSyncError::Consensus { hash: header.hash });
        }

        let stored = self.store.write_with(|rows| {
            let mut stored = self.provisional(rows, header)?;
            if !stored.position.is_resolved() {
                if let Some(parent) = resolved_position(rows, &stored.prev_hash())? {
                    stored.link_to(&parent)?;
                }
            }
            rows.upsert_batch(std::slice::from_ref(&stored))?;
            Ok(stored)
        })?;
        debug!(
            hash = %stored.hash(),
            height = ?stored.height(),
            "[header-sync] Accepted header"
        );
        Ok(stored)
    }

    fn accept_batch(&self, headers: Vec<BlockHeader>) -> Result<BatchOutcome, HeaderSyncError> {
        let mut rejected = 0;
        let mut valid = Vec::with_capacity(headers.len());
        for header in headers {
            if check_work(&header) {
                valid.push(header);
            } else {
                debug!(
                    "[header-sync] Dropping header {} from batch: insufficient work",
                    header.hash
                );
                rejected += 1;
            }
        }
        if rejected > 0 {
            warn!("[header-sync] Dropped {} headers failing proof of work", rejected);
        }

        let batch = self.store.write_with(|rows| {
            let mut batch = valid
                .into_iter()
                .map(|header| self.provisional(rows, header))
                .collect::<Result<Vec<_>, _>>()?;
            link_batch(&mut batch, |hash| resolved_position(rows, hash))?;
            rows.upsert_batch(&batch)?;
            Ok(batch)
        })?;

        let outcome = BatchOutcome {
            accepted: batch,
            rejected,
            malformed: 0,
        };
        debug!(
            "[header-sync] Batch stored {} headers ({} resolved)",
            outcome.accepted.len(),
            outcome.resolved_count()
        );
        Ok(outcome)
    }

    fn resolve_orphans(&self) -> Result<usize, HeaderSyncError> {
        let mut total = 0;
        loop {
            let resolved = self.store.write_with(|rows| {
                let mut resolved_now: HashMap<BlockHash, ChainPosition> = HashMap::new();
                let mut updated = Vec::new();
                for mut orphan in rows.find_unresolved()? {
                    let parent = match resolved_now.get(&orphan.prev_hash()) {
                        Some(position) => Some(*position),
                        None => resolved_position(rows, &orphan.prev_hash())?,
                    };
                    if let Some(parent) = parent {
                        orphan.link_to(&parent)?;
                        resolved_now.insert(orphan.hash(), orphan.position);
                        updated.push(orphan);
                    }
                }
                rows.upsert_batch(&updated)?;
                Ok(updated.len())
            })?;

            if resolved == 0 {
                break;
            }
            total += resolved;
        }

        if total > 0 {
            info!("[header-sync] Resolved {} orphaned headers", total);
        }
        Ok(total)
    }

    fn heaviest(&self) -> Result<Vec<StoredHeader>, HeaderSyncError> {
        self.store.find_heaviest()
    }

    fn canonical_tip(&self) -> Result<Option<ChainTip>, HeaderSyncError> {
        let heaviest = self.heaviest()?;
        Ok(select_canonical(&heaviest).and_then(|tip| {
            Some(ChainTip {
                hash: tip.hash(),
                height: tip.height()?,
                accumulated_work: tip.accumulated_work()?,
            })
        }))
    }
}
