//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::{
    collections::BTreeMap,
    sync::RwLock,
};

use super::{KvStore, StorageError, WriteBatch};

/// BTreeMap-backed store for tests and ephemeral (`--start-debug`) runs.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for (key, value) in batch.into_ops() {
            match value {
                Some(value) => {
                    map.insert(key, value);
                },
                None => {
                    map.remove(&key);
                },
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let iter = map.range(prefix.to_vec()..);
        Ok(iter
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn scan_prefix_rev(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let iter = map.range(prefix.to_vec()..);
        Ok(iter
            .take_while(|(k, _)| k.starts_with(prefix))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(map
            .range(start.to_vec()..end.to_vec())
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_atomic_and_ordered() {
        let store = MemoryKvStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a-1".to_vec(), b"1".to_vec());
        batch.put(b"a-2".to_vec(), b"2".to_vec());
        batch.put(b"b-1".to_vec(), b"3".to_vec());
        store.write(batch).unwrap();

        let scanned = store.scan_prefix(b"a-").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"a-1".to_vec());
        assert_eq!(scanned[1].0, b"a-2".to_vec());
    }

    #[test]
    fn reverse_scan_respects_limit() {
        let store = MemoryKvStore::new();
        for i in 0..5u8 {
            store.put(vec![b'k', b'-', b'0' + i], vec![i]).unwrap();
        }
        let last_two = store.scan_prefix_rev(b"k-", 2).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].0, b"k-4".to_vec());
        assert_eq!(last_two[1].0, b"k-3".to_vec());
    }

    #[test]
    fn delete_in_batch() {
        let store = MemoryKvStore::new();
        store.put(b"x".to_vec(), b"1".to_vec()).unwrap();
        let mut batch = WriteBatch::new();
        batch.delete(b"x".to_vec());
        store.write(batch).unwrap();
        assert_eq!(store.get(b"x").unwrap(), None);
    }
}
