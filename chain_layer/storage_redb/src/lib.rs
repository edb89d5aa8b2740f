//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The persistent KV backend: one redb table, keys ordered byte-wise, one
//! write transaction per batch.

use std::path::Path;

use bywise_chain::storage::{prefix_end, KvStore, StorageError, WriteBatch};
use log::*;
use redb::{Database, ReadableTable, TableDefinition};

const LOG_TARGET: &str = "bywise::storage::redb";

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("bywise");

pub struct RedbKvStore {
    db: Database,
}

impl RedbKvStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(fatal)?;
        // make sure the table exists so first reads don't fail
        let txn = db.begin_write().map_err(fatal)?;
        txn.open_table(TABLE).map_err(fatal)?;
        txn.commit().map_err(fatal)?;
        info!(target: LOG_TARGET, "💾 store opened at {}", path.as_ref().display());
        Ok(Self { db })
    }
}

fn fatal<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::FatalIo(e.to_string())
}

impl KvStore for RedbKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read().map_err(fatal)?;
        let table = txn.open_table(TABLE).map_err(fatal)?;
        Ok(table.get(key).map_err(fatal)?.map(|guard| guard.value().to_vec()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(fatal)?;
        {
            let mut table = txn.open_table(TABLE).map_err(fatal)?;
            for (key, value) in batch.into_ops() {
                match value {
                    Some(value) => {
                        table.insert(key.as_slice(), value.as_slice()).map_err(fatal)?;
                    },
                    None => {
                        table.remove(key.as_slice()).map_err(fatal)?;
                    },
                }
            }
        }
        txn.commit().map_err(fatal)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read().map_err(fatal)?;
        let table = txn.open_table(TABLE).map_err(fatal)?;
        let iter = match prefix_end(prefix) {
            Some(end) => table.range(prefix..end.as_slice()).map_err(fatal)?,
            None => table.range(prefix..).map_err(fatal)?,
        };
        let mut out = Vec::new();
        for entry in iter {
            let (key, value) = entry.map_err(fatal)?;
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn scan_prefix_rev(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read().map_err(fatal)?;
        let table = txn.open_table(TABLE).map_err(fatal)?;
        let iter = match prefix_end(prefix) {
            Some(end) => table.range(prefix..end.as_slice()).map_err(fatal)?,
            None => table.range(prefix..).map_err(fatal)?,
        };
        let mut out = Vec::new();
        for entry in iter.rev().take(limit) {
            let (key, value) = entry.map_err(fatal)?;
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read().map_err(fatal)?;
        let table = txn.open_table(TABLE).map_err(fatal)?;
        let iter = table.range(start..end).map_err(fatal)?;
        let mut out = Vec::new();
        for entry in iter.take(limit) {
            let (key, value) = entry.map_err(fatal)?;
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }
}
