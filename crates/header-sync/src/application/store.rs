//! # Header Store
//!
//! Append-only persistence of [`StoredHeader`] rows over a [`KeyValueStore`].
//!
//! ## Key layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `meta:schema_version` | schema version, decimal |
//! | `hdr:<hash>` | JSON `StoredHeader` |
//! | `hgt:<height BE u64><hash>` | empty (resolved headers) |
//! | `wrk:<work BE 32 bytes><hash>` | empty (resolved headers) |
//! | `orp:<hash>` | empty (unresolved headers) |
//!
//! Big-endian index keys sort numerically, so the last key under `hgt:`
//! or `wrk:` names the highest or heaviest headers.
//!
//! Every write happens under one write lock and lands as one atomic batch
//! containing the row and all of its index changes.

use crate::domain::{BlockHash, HeaderSyncError, KVStoreError, StoredHeader};
use crate::ports::outbound::{BatchOperation, KeyValueStore};
use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::HashMap;
use tracing::debug;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_KEY: &[u8] = b"meta:schema_version";
const HEADER_PREFIX: &[u8] = b"hdr:";
const HEIGHT_PREFIX: &[u8] = b"hgt:";
const WORK_PREFIX: &[u8] = b"wrk:";
const ORPHAN_PREFIX: &[u8] = b"orp:";

const HASH_LEN: usize = 32;
const WORK_LEN: usize = 32;

/// Persisted header store. Never deletes a header.
pub struct HeaderStore<S: KeyValueStore> {
    kv: RwLock<S>,
}

impl<S: KeyValueStore> HeaderStore<S> {
    /// Wrap a key-value store.
    pub fn new(kv: S) -> Self {
        Self {
            kv: RwLock::new(kv),
        }
    }

    /// Write the schema marker if missing. Safe to call on every startup.
    ///
    /// # Errors
    /// - `Persistence` if the store carries a different schema version
    pub fn ensure_schema(&self) -> Result<(), HeaderSyncError> {
        let mut kv = self.kv.write();
        match kv.get(SCHEMA_KEY)? {
            None => {
                kv.put(SCHEMA_KEY, SCHEMA_VERSION.to_string().as_bytes())?;
                debug!("[header-sync] Initialized header store schema v{}", SCHEMA_VERSION);
                Ok(())
            }
            Some(found) if found == SCHEMA_VERSION.to_string().as_bytes() => Ok(()),
            Some(found) => Err(KVStoreError::CorruptionError {
                message: format!(
                    "schema version {} does not match expected {}",
                    String::from_utf8_lossy(&found),
                    SCHEMA_VERSION
                ),
            }
            .into()),
        }
    }

    /// Insert or replace one header.
    pub fn upsert(&self, header: &StoredHeader) -> Result<(), HeaderSyncError> {
        self.upsert_batch(std::slice::from_ref(header))
    }

    /// Insert or replace headers in one atomic write. Keyed by hash; when
    /// the same hash appears more than once the last occurrence wins.
    pub fn upsert_batch(&self, headers: &[StoredHeader]) -> Result<(), HeaderSyncError> {
        self.write_with(|writer| writer.upsert_batch(headers))
    }

    /// Run `f` while holding the write lock. Rows read through the
    /// [`StoreWriter`] cannot change until `f` returns, so a position
    /// computed from them is still current when it is written.
    ///
    /// `f` must not call back into this store.
    pub fn write_with<R, F>(&self, f: F) -> Result<R, HeaderSyncError>
    where
        F: FnOnce(&mut StoreWriter<'_, S>) -> Result<R, HeaderSyncError>,
    {
        let mut kv = self.kv.write();
        let mut writer = StoreWriter { kv: &mut *kv };
        f(&mut writer)
    }

    /// Header by hash.
    pub fn find_by_hash(&self, hash: &BlockHash) -> Result<Option<StoredHeader>, HeaderSyncError> {
        let kv = self.kv.read();
        read_row(&*kv, hash)
    }

    /// All resolved headers at `height` (more than one on a fork).
    pub fn find_by_height(&self, height: u64) -> Result<Vec<StoredHeader>, HeaderSyncError> {
        let kv = self.kv.read();
        let mut prefix = HEIGHT_PREFIX.to_vec();
        prefix.extend_from_slice(&height.to_be_bytes());
        rows_for_index(&*kv, &prefix)
    }

    /// All headers at the maximum resolved height.
    pub fn find_highest(&self) -> Result<Vec<StoredHeader>, HeaderSyncError> {
        let kv = self.kv.read();
        let Some((key, _)) = kv.prefix_last(HEIGHT_PREFIX)? else {
            return Ok(Vec::new());
        };
        let prefix_len = HEIGHT_PREFIX.len() + 8;
        rows_for_index(&*kv, &key[..prefix_len.min(key.len())])
    }

    /// All headers at the maximum accumulated work.
    pub fn find_heaviest(&self) -> Result<Vec<StoredHeader>, HeaderSyncError> {
        let kv = self.kv.read();
        let Some((key, _)) = kv.prefix_last(WORK_PREFIX)? else {
            return Ok(Vec::new());
        };
        let prefix_len = WORK_PREFIX.len() + WORK_LEN;
        rows_for_index(&*kv, &key[..prefix_len.min(key.len())])
    }

    /// All unresolved headers.
    pub fn find_unresolved(&self) -> Result<Vec<StoredHeader>, HeaderSyncError> {
        let kv = self.kv.read();
        rows_for_index(&*kv, ORPHAN_PREFIX)
    }

    /// Number of stored headers.
    pub fn len(&self) -> Result<usize, HeaderSyncError> {
        Ok(self.kv.read().prefix_scan(HEADER_PREFIX)?.len())
    }

    /// True if no header is stored.
    pub fn is_empty(&self) -> Result<bool, HeaderSyncError> {
        Ok(self.kv.read().prefix_last(HEADER_PREFIX)?.is_none())
    }
}

/// Read and write access under the store's write lock.
pub struct StoreWriter<'a, S: KeyValueStore> {
    kv: &'a mut S,
}

impl<S: KeyValueStore> StoreWriter<'_, S> {
    /// Header by hash.
    pub fn find_by_hash(&self, hash: &BlockHash) -> Result<Option<StoredHeader>, HeaderSyncError> {
        read_row(&*self.kv, hash)
    }

    /// All unresolved headers.
    pub fn find_unresolved(&self) -> Result<Vec<StoredHeader>, HeaderSyncError> {
        rows_for_index(&*self.kv, ORPHAN_PREFIX)
    }

    /// As [`HeaderStore::upsert_batch`].
    pub fn upsert_batch(&mut self, headers: &[StoredHeader]) -> Result<(), HeaderSyncError> {
        if headers.is_empty() {
            return Ok(());
        }

        let mut latest: HashMap<BlockHash, &StoredHeader> = HashMap::with_capacity(headers.len());
        let mut order = Vec::with_capacity(headers.len());
        for header in headers {
            if latest.insert(header.hash(), header).is_none() {
                order.push(header.hash());
            }
        }

        let mut ops = Vec::with_capacity(order.len() * 3);
        for hash in &order {
            let header = latest[hash];
            if let Some(previous) = read_row(&*self.kv, hash)? {
                ops.extend(index_keys(&previous).into_iter().map(BatchOperation::delete));
            }
            ops.push(BatchOperation::put(row_key(hash), encode_row(header)?));
            ops.extend(
                index_keys(header)
                    .into_iter()
                    .map(|key| BatchOperation::put(key, Vec::new())),
            );
        }
        self.kv.atomic_batch_write(ops)?;

        debug!("[header-sync] Stored {} header rows", order.len());
        Ok(())
    }
}

fn row_key(hash: &BlockHash) -> Vec<u8> {
    let mut key = HEADER_PREFIX.to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

fn index_keys(header: &StoredHeader) -> Vec<Vec<u8>> {
    let hash = header.hash();
    match (header.height(), header.accumulated_work()) {
        (Some(height), Some(work)) => {
            let mut by_height = HEIGHT_PREFIX.to_vec();
            by_height.extend_from_slice(&height.to_be_bytes());
            by_height.extend_from_slice(hash.as_bytes());

            let mut by_work = WORK_PREFIX.to_vec();
            by_work.extend_from_slice(&work_bytes(work));
            by_work.extend_from_slice(hash.as_bytes());

            vec![by_height, by_work]
        }
        _ => {
            let mut orphan = ORPHAN_PREFIX.to_vec();
            orphan.extend_from_slice(hash.as_bytes());
            vec![orphan]
        }
    }
}

fn work_bytes(work: U256) -> [u8; WORK_LEN] {
    let mut out = [0u8; WORK_LEN];
    work.to_big_endian(&mut out);
    out
}

fn encode_row(header: &StoredHeader) -> Result<Vec<u8>, HeaderSyncError> {
    serde_json::to_vec(header).map_err(|e| {
        KVStoreError::IOError {
            message: format!("encode header {}: {}", header.hash(), e),
        }
        .into()
    })
}

fn read_row<S: KeyValueStore + ?Sized>(
    kv: &S,
    hash: &BlockHash,
) -> Result<Option<StoredHeader>, HeaderSyncError> {
    let Some(bytes) = kv.get(&row_key(hash))? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        KVStoreError::CorruptionError {
            message: format!("decode header {}: {}", hash, e),
        }
        .into()
    })
}

/// Rows named by index keys under `prefix`; the hash is the key's last
/// 32 bytes.
fn rows_for_index<S: KeyValueStore + ?Sized>(
    kv: &S,
    prefix: &[u8],
) -> Result<Vec<StoredHeader>, HeaderSyncError> {
    let mut rows = Vec::new();
    for (key, _) in kv.prefix_scan(prefix)? {
        if key.len() < HASH_LEN {
            return Err(KVStoreError::CorruptionError {
                message: format!("short index key {}", hex::encode(&key)),
            }
            .into());
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&key[key.len() - HASH_LEN..]);
        let hash = BlockHash::from_display_bytes(bytes);
        match read_row(kv, &hash)? {
            Some(row) => rows.push(row),
            None => {
                return Err(KVStoreError::CorruptionError {
                    message: format!("index entry for missing header {}", hash),
                }
                .into())
            }
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryKVStore;
    use crate::domain::{BlockHeader, ChainParams, ChainPosition};
    use crate::test_utils::{encode_header, EASY_BITS};

    fn header(salt: u32) -> StoredHeader {
        let raw = encode_header(BlockHash::default(), [0u8; 32], salt, EASY_BITS, 0);
        StoredHeader::unresolved(BlockHeader::parse(&raw).unwrap(), &ChainParams::regtest())
    }

    fn resolved(salt: u32, height: u64, work: u64) -> StoredHeader {
        let mut h = header(salt);
        h.position = ChainPosition::Resolved {
            height,
            accumulated_work: U256::from(work),
        };
        h
    }

    fn hashes(rows: &[StoredHeader]) -> Vec<BlockHash> {
        let mut out: Vec<_> = rows.iter().map(StoredHeader::hash).collect();
        out.sort();
        out
    }

    #[test]
    fn test_ensure_schema_idempotent() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_ensure_schema_mismatch() {
        let mut kv = InMemoryKVStore::new();
        kv.put(SCHEMA_KEY, b"99").unwrap();
        let store = HeaderStore::new(kv);
        assert!(matches!(
            store.ensure_schema(),
            Err(HeaderSyncError::Persistence(KVStoreError::CorruptionError { .. }))
        ));
    }

    #[test]
    fn test_upsert_and_find_by_hash() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        let h = resolved(1, 0, 1);
        store.upsert(&h).unwrap();

        assert_eq!(store.find_by_hash(&h.hash()).unwrap(), Some(h.clone()));
        assert_eq!(store.find_by_hash(&BlockHash::default()).unwrap(), None);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_upsert_idempotent_last_write_wins() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        let orphan = header(1);
        store.upsert(&orphan).unwrap();
        store.upsert(&orphan).unwrap();
        assert_eq!(store.find_unresolved().unwrap().len(), 1);

        let mut later = orphan.clone();
        later.position = ChainPosition::Resolved {
            height: 4,
            accumulated_work: U256::from(9u64),
        };
        store.upsert(&later).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.find_by_hash(&orphan.hash()).unwrap(), Some(later.clone()));
        assert!(store.find_unresolved().unwrap().is_empty());
        assert_eq!(hashes(&store.find_by_height(4).unwrap()), vec![later.hash()]);
    }

    #[test]
    fn test_reindex_drops_stale_height() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        store.upsert(&resolved(1, 3, 30)).unwrap();
        store.upsert(&resolved(1, 5, 50)).unwrap();

        assert!(store.find_by_height(3).unwrap().is_empty());
        assert_eq!(store.find_by_height(5).unwrap().len(), 1);
        assert_eq!(store.find_heaviest().unwrap()[0].accumulated_work(), Some(U256::from(50u64)));
    }

    #[test]
    fn test_batch_duplicate_hash_last_wins() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        let first = resolved(1, 1, 1);
        let second = resolved(1, 2, 2);
        store.upsert_batch(&[first, second.clone()]).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.find_by_hash(&second.hash()).unwrap(), Some(second));
        assert!(store.find_by_height(1).unwrap().is_empty());
    }

    #[test]
    fn test_find_highest_and_heaviest_ties() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        let a = resolved(1, 10, 100);
        let b = resolved(2, 10, 100);
        let c = resolved(3, 11, 90);
        let orphan = header(4);
        store
            .upsert_batch(&[a.clone(), b.clone(), c.clone(), orphan.clone()])
            .unwrap();

        let mut tied = vec![a.hash(), b.hash()];
        tied.sort();
        assert_eq!(hashes(&store.find_heaviest().unwrap()), tied);
        assert_eq!(hashes(&store.find_highest().unwrap()), vec![c.hash()]);
        assert_eq!(hashes(&store.find_unresolved().unwrap()), vec![orphan.hash()]);
        assert_eq!(store.len().unwrap(), 4);
    }

    #[test]
    fn test_work_index_orders_beyond_u64() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        let mut big = header(1);
        big.position = ChainPosition::Resolved {
            height: 1,
            accumulated_work: U256::from(u64::MAX) + U256::one(),
        };
        let small = resolved(2, 2, u64::MAX);
        store.upsert_batch(&[big.clone(), small]).unwrap();

        assert_eq!(hashes(&store.find_heaviest().unwrap()), vec![big.hash()]);
    }

    #[test]
    fn test_empty_store_queries() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        assert!(store.find_heaviest().unwrap().is_empty());
        assert!(store.find_highest().unwrap().is_empty());
        assert!(store.find_unresolved().unwrap().is_empty());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_write_failure_is_persistence_error() {
        let mut kv = InMemoryKVStore::new();
        kv.fail_writes = true;
        let store = HeaderStore::new(kv);
        assert!(matches!(
            store.upsert(&header(1)),
            Err(HeaderSyncError::Persistence(KVStoreError::IOError { .. }))
        ));
    }

    #[test]
    fn test_write_with_reads_then_writes() {
        let store = HeaderStore::new(InMemoryKVStore::new());
        let orphan = header(1);
        store.upsert(&orphan).unwrap();

        let linked = store
            .write_with(|writer| {
                let mut row = writer.find_by_hash(&orphan.hash())?.unwrap();
                assert_eq!(writer.find_unresolved()?.len(), 1);
                row.position = ChainPosition::Resolved {
                    height: 1,
                    accumulated_work: U256::from(2u64),
                };
                writer.upsert_batch(std::slice::from_ref(&row))?;
                assert!(writer.find_unresolved()?.is_empty());
                Ok(row)
            })
            .unwrap();

        assert_eq!(store.find_by_hash(&orphan.hash()).unwrap(), Some(linked));
        assert_eq!(store.find_by_height(1).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_row() {
        let mut kv = InMemoryKVStore::new();
        let h = header(1);
        kv.put(&row_key(&h.hash()), b"not json").unwrap();
        let store = HeaderStore::new(kv);
        assert!(matches!(
            store.find_by_hash(&h.hash()),
            Err(HeaderSyncError::Persistence(KVStoreError::CorruptionError { .. }))
        ));
    }
}
