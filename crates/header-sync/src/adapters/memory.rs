//! In-memory key-value store.

use crate::domain::KVStoreError;
use crate::ports::outbound::{prefix_upper_bound, BatchOperation, KeyValueStore};
use std::collections::BTreeMap;
use std::ops::Bound;

/// In-memory key-value store for tests and ephemeral nodes.
///
/// Ordered map, so prefix scans come back in key order like RocksDB's.
#[derive(Default)]
pub struct InMemoryKVStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Fail every write with an I/O error.
    pub fail_writes: bool,
}

impl InMemoryKVStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if no keys are held.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check_writable(&self) -> Result<(), KVStoreError> {
        if self.fail_writes {
            return Err(KVStoreError::IOError {
                message: "write failure injected".to_string(),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.check_writable()?;
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.check_writable()?;
        self.data.remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        self.check_writable()?;
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let results = self
            .data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(results)
    }

    fn prefix_last(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let upper = match prefix_upper_bound(prefix) {
            Some(upper) => Bound::Excluded(upper),
            None => Bound::Unbounded,
        };
        let last = self
            .data
            .range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), upper))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_kv_store() {
        let mut store = InMemoryKVStore::new();

        store.put(b"key1", b"value1").unwrap();
        store.put(b"key2", b"value2").unwrap();

        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"key3").unwrap(), None);
        assert!(store.exists(b"key1").unwrap());

        store.delete(b"key1").unwrap();
        assert!(!store.exists(b"key1").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_prefix_scan_ordered() {
        let mut store = InMemoryKVStore::new();
        store.put(b"b:2", b"").unwrap();
        store.put(b"a:9", b"").unwrap();
        store.put(b"b:1", b"").unwrap();
        store.put(b"c:0", b"").unwrap();

        let keys: Vec<_> = store
            .prefix_scan(b"b:")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"b:1".to_vec(), b"b:2".to_vec()]);

        let (last, _) = store.prefix_last(b"b:").unwrap().unwrap();
        assert_eq!(last, b"b:2".to_vec());
        assert!(store.prefix_last(b"z:").unwrap().is_none());
    }

    #[test]
    fn test_atomic_batch_write() {
        let mut store = InMemoryKVStore::new();
        store.put(b"gone", b"x").unwrap();
        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"k1".to_vec(), b"v1".to_vec()),
                BatchOperation::delete(b"gone".to_vec()),
            ])
            .unwrap();
        assert!(store.exists(b"k1").unwrap());
        assert!(!store.exists(b"gone").unwrap());
    }

    #[test]
    fn test_injected_write_failure() {
        let mut store = InMemoryKVStore::new();
        store.fail_writes = true;
        let ops = vec![BatchOperation::put(b"k".to_vec(), b"v".to_vec())];
        let result = store.atomic_batch_write(ops);
        assert!(matches!(result, Err(KVStoreError::IOError { .. })));
        assert!(store.is_empty());
    }
}
