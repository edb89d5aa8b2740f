//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The persistence layer: an opaque ordered byte-key store plus typed
//! repositories keyed `<table>-<chain>-<index>-<id>`.

pub mod keys;
mod memory;
mod repository;

pub use memory::MemoryKvStore;
pub use repository::{
    BlockRepository,
    ChainInfoRepository,
    ChainStores,
    EnvRepository,
    EventRepository,
    SliceRepository,
    TransactionRepository,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Unrecoverable store I/O; per the error policy the process logs and
    /// exits, then resyncs from peers on restart.
    #[error("fatal storage i/o: {0}")]
    FatalIo(String),
    #[error("value codec: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A set of writes applied atomically.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        self.ops.into_iter().map(|op| match op {
            BatchOp::Put(k, v) => (k, Some(v)),
            BatchOp::Delete(k) => (k, None),
        })
    }
}

/// An ordered byte-keyed store with range scans and atomic batches.
pub trait KvStore: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, ascending by key.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Up to `limit` entries with the given prefix, descending by key.
    fn scan_prefix_rev(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Entries in `[start, end)`, ascending, up to `limit`.
    fn scan_range(&self, start: &[u8], end: &[u8], limit: usize)
        -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<(), StorageError>
    where Self: Sized {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }
}

/// The exclusive upper bound for a prefix scan: the prefix with its last byte
/// incremented (carrying into shorter prefixes as needed).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}
