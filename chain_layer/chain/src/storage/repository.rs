//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Typed views over the KV store. Values are the canonical JSON wire forms,
//! secondary indexes store the primary hash.

use std::{collections::BTreeMap, sync::Arc};

use bywise_common_types::{Address, Hash};
use serde::{de::DeserializeOwned, Serialize};

use super::{
    keys::{self, padded},
    KvStore,
    StorageError,
    WriteBatch,
};
use crate::models::{Block, ContractEvent, Slice, Transaction};

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// All typed repositories over one KV store.
#[derive(Clone)]
pub struct ChainStores {
    pub blocks: BlockRepository,
    pub transactions: TransactionRepository,
    pub slices: SliceRepository,
    pub events: EventRepository,
    pub env: EnvRepository,
    pub chain_info: ChainInfoRepository,
}

impl ChainStores {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            blocks: BlockRepository::new(store.clone()),
            transactions: TransactionRepository::new(store.clone()),
            slices: SliceRepository::new(store.clone()),
            events: EventRepository::new(store.clone()),
            env: EnvRepository::new(store.clone()),
            chain_info: ChainInfoRepository::new(store),
        }
    }
}

#[derive(Clone)]
pub struct BlockRepository {
    store: Arc<dyn KvStore>,
}

impl BlockRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persists a canonical block: by hash, plus the height index. Only one
    /// block per height is ever persisted (at immutability).
    pub fn save(&self, block: &Block) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(
            keys::key(keys::TABLE_BLOCKS, &block.chain, keys::INDEX_HASH, &block.hash.to_hex()),
            encode(block)?,
        );
        batch.put(
            keys::key(keys::TABLE_BLOCKS, &block.chain, keys::INDEX_HEIGHT, &padded(block.height)),
            block.hash.to_hex().into_bytes(),
        );
        self.store.write(batch)
    }

    pub fn get_by_hash(&self, chain: &str, hash: &Hash) -> Result<Option<Block>, StorageError> {
        let key = keys::key(keys::TABLE_BLOCKS, chain, keys::INDEX_HASH, &hash.to_hex());
        self.store.get(&key)?.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn get_by_height(&self, chain: &str, height: u64) -> Result<Option<Block>, StorageError> {
        let key = keys::key(keys::TABLE_BLOCKS, chain, keys::INDEX_HEIGHT, &padded(height));
        let Some(hash_bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let hash = String::from_utf8_lossy(&hash_bytes)
            .parse::<Hash>()
            .map_err(|e| StorageError::FatalIo(format!("corrupt height index: {e}")))?;
        self.get_by_hash(chain, &hash)
    }

    /// The most recently persisted blocks, highest first.
    pub fn last(&self, chain: &str, count: usize) -> Result<Vec<Block>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_BLOCKS, chain, keys::INDEX_HEIGHT);
        let rows = self.store.scan_prefix_rev(&prefix, count)?;
        rows.into_iter()
            .filter_map(|(_, hash_bytes)| {
                String::from_utf8_lossy(&hash_bytes).parse::<Hash>().ok()
            })
            .map(|hash| {
                self.get_by_hash(chain, &hash)?
                    .ok_or_else(|| StorageError::FatalIo(format!("dangling block index {hash}")))
            })
            .collect()
    }

    /// An ascending window of persisted blocks starting at `from_height`.
    pub fn pack(&self, chain: &str, from_height: u64, limit: usize) -> Result<Vec<Block>, StorageError> {
        let start = keys::key(keys::TABLE_BLOCKS, chain, keys::INDEX_HEIGHT, &padded(from_height));
        let prefix = keys::prefix(keys::TABLE_BLOCKS, chain, keys::INDEX_HEIGHT);
        let end = super::prefix_end(&prefix).unwrap_or_default();
        let rows = self.store.scan_range(&start, &end, limit)?;
        rows.into_iter()
            .filter_map(|(_, hash_bytes)| {
                String::from_utf8_lossy(&hash_bytes).parse::<Hash>().ok()
            })
            .map(|hash| {
                self.get_by_hash(chain, &hash)?
                    .ok_or_else(|| StorageError::FatalIo(format!("dangling block index {hash}")))
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct TransactionRepository {
    store: Arc<dyn KvStore>,
}

impl TransactionRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, tx: &Transaction) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        let hash_hex = tx.hash.to_hex();
        batch.put(
            keys::key(keys::TABLE_TXS, &tx.chain, keys::INDEX_HASH, &hash_hex),
            encode(tx)?,
        );
        batch.put(
            keys::key(
                keys::TABLE_TXS,
                &tx.chain,
                keys::INDEX_CREATED,
                &format!("{}:{}", padded(tx.created), hash_hex),
            ),
            hash_hex.clone().into_bytes(),
        );
        for from in &tx.from {
            batch.put(
                keys::key(
                    keys::TABLE_TXS,
                    &tx.chain,
                    keys::INDEX_FROM,
                    &format!("{}:{}:{}", from, padded(tx.created), hash_hex),
                ),
                hash_hex.clone().into_bytes(),
            );
        }
        for to in &tx.to {
            batch.put(
                keys::key(
                    keys::TABLE_TXS,
                    &tx.chain,
                    keys::INDEX_TO,
                    &format!("{}:{}:{}", to, padded(tx.created), hash_hex),
                ),
                hash_hex.clone().into_bytes(),
            );
        }
        for fk in &tx.foreign_keys {
            batch.put(
                keys::key(
                    keys::TABLE_TXS,
                    &tx.chain,
                    keys::INDEX_FOREIGN_KEY,
                    &format!("{}:{}", fk, hash_hex),
                ),
                hash_hex.clone().into_bytes(),
            );
        }
        self.store.write(batch)
    }

    pub fn get_by_hash(&self, chain: &str, hash: &Hash) -> Result<Option<Transaction>, StorageError> {
        let key = keys::key(keys::TABLE_TXS, chain, keys::INDEX_HASH, &hash.to_hex());
        self.store.get(&key)?.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn last(&self, chain: &str, count: usize) -> Result<Vec<Transaction>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_TXS, chain, keys::INDEX_CREATED);
        self.resolve_index(chain, self.store.scan_prefix_rev(&prefix, count)?)
    }

    pub fn find_by_from(&self, chain: &str, from: &Address, limit: usize)
        -> Result<Vec<Transaction>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_TXS, chain, keys::INDEX_FROM);
        let scoped = [prefix, format!("{from}:").into_bytes()].concat();
        self.resolve_index(chain, self.store.scan_prefix_rev(&scoped, limit)?)
    }

    pub fn find_by_to(&self, chain: &str, to: &Address, limit: usize)
        -> Result<Vec<Transaction>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_TXS, chain, keys::INDEX_TO);
        let scoped = [prefix, format!("{to}:").into_bytes()].concat();
        self.resolve_index(chain, self.store.scan_prefix_rev(&scoped, limit)?)
    }

    pub fn find_by_foreign_key(&self, chain: &str, fk: &str, limit: usize)
        -> Result<Vec<Transaction>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_TXS, chain, keys::INDEX_FOREIGN_KEY);
        let scoped = [prefix, format!("{fk}:").into_bytes()].concat();
        self.resolve_index(chain, self.store.scan_prefix_rev(&scoped, limit)?)
    }

    fn resolve_index(&self, chain: &str, rows: Vec<(Vec<u8>, Vec<u8>)>)
        -> Result<Vec<Transaction>, StorageError> {
        rows.into_iter()
            .filter_map(|(_, hash_bytes)| {
                String::from_utf8_lossy(&hash_bytes).parse::<Hash>().ok()
            })
            .map(|hash| {
                self.get_by_hash(chain, &hash)?
                    .ok_or_else(|| StorageError::FatalIo(format!("dangling tx index {hash}")))
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct SliceRepository {
    store: Arc<dyn KvStore>,
}

impl SliceRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, slice: &Slice) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        let hash_hex = slice.hash.to_hex();
        batch.put(
            keys::key(keys::TABLE_SLICES, &slice.chain, keys::INDEX_HASH, &hash_hex),
            encode(slice)?,
        );
        batch.put(
            keys::key(
                keys::TABLE_SLICES,
                &slice.chain,
                keys::INDEX_CREATED,
                &format!("{}:{}", padded(slice.created), hash_hex),
            ),
            hash_hex.into_bytes(),
        );
        self.store.write(batch)
    }

    pub fn get_by_hash(&self, chain: &str, hash: &Hash) -> Result<Option<Slice>, StorageError> {
        let key = keys::key(keys::TABLE_SLICES, chain, keys::INDEX_HASH, &hash.to_hex());
        self.store.get(&key)?.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn last(&self, chain: &str, count: usize) -> Result<Vec<Slice>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_SLICES, chain, keys::INDEX_CREATED);
        let rows = self.store.scan_prefix_rev(&prefix, count)?;
        rows.into_iter()
            .filter_map(|(_, hash_bytes)| {
                String::from_utf8_lossy(&hash_bytes).parse::<Hash>().ok()
            })
            .map(|hash| {
                self.get_by_hash(chain, &hash)?
                    .ok_or_else(|| StorageError::FatalIo(format!("dangling slice index {hash}")))
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct EventRepository {
    store: Arc<dyn KvStore>,
}

impl EventRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, chain: &str, event: &ContractEvent) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        let suffix = format!("{}:{}", padded(event.block_height), event.tx_hash.to_hex());
        batch.put(
            keys::key(
                keys::TABLE_EVENTS,
                chain,
                keys::INDEX_NAME,
                &format!("{}:{}:{}", event.contract, event.name, suffix),
            ),
            encode(event)?,
        );
        for entry in &event.entries {
            batch.put(
                keys::key(
                    keys::TABLE_EVENTS,
                    chain,
                    keys::INDEX_KEY_VALUE,
                    &format!("{}:{}:{}:{}:{}", event.contract, event.name, entry.key, entry.value, suffix),
                ),
                encode(event)?,
            );
        }
        self.store.write(batch)
    }

    pub fn find(&self, chain: &str, contract: &Address, name: &str, limit: usize)
        -> Result<Vec<ContractEvent>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_EVENTS, chain, keys::INDEX_NAME);
        let scoped = [prefix, format!("{contract}:{name}:").into_bytes()].concat();
        let rows = self.store.scan_prefix_rev(&scoped, limit)?;
        rows.into_iter().map(|(_, bytes)| decode(&bytes)).collect()
    }

    pub fn find_by_entry(
        &self,
        chain: &str,
        contract: &Address,
        name: &str,
        key: &str,
        value: &str,
        limit: usize,
    ) -> Result<Vec<ContractEvent>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_EVENTS, chain, keys::INDEX_KEY_VALUE);
        let scoped = [prefix, format!("{contract}:{name}:{key}:{value}:").into_bytes()].concat();
        let rows = self.store.scan_prefix_rev(&scoped, limit)?;
        rows.into_iter().map(|(_, bytes)| decode(&bytes)).collect()
    }
}

/// Consolidated environment values: the flattened state below the overlay
/// chain, plus the marker of the last consolidated commit.
#[derive(Clone)]
pub struct EnvRepository {
    store: Arc<dyn KvStore>,
}

impl EnvRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, chain: &str, env_key: &str) -> Result<Option<String>, StorageError> {
        let key = keys::key(keys::TABLE_ENV, chain, keys::INDEX_DATA, env_key);
        Ok(self
            .store
            .get(&key)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Applies a consolidated diff and advances the tip marker atomically.
    pub fn apply(
        &self,
        chain: &str,
        diff: &BTreeMap<String, Option<String>>,
        new_tip: &Hash,
    ) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        for (env_key, value) in diff {
            let key = keys::key(keys::TABLE_ENV, chain, keys::INDEX_DATA, env_key);
            match value {
                Some(value) => {
                    batch.put(key, value.clone().into_bytes());
                },
                None => {
                    batch.delete(key);
                },
            }
        }
        batch.put(
            keys::key(keys::TABLE_ENV, chain, keys::INDEX_META, "consolidated"),
            new_tip.to_hex().into_bytes(),
        );
        self.store.write(batch)
    }

    pub fn consolidated_tip(&self, chain: &str) -> Result<Option<Hash>, StorageError> {
        let key = keys::key(keys::TABLE_ENV, chain, keys::INDEX_META, "consolidated");
        Ok(self
            .store
            .get(&key)?
            .and_then(|bytes| String::from_utf8_lossy(&bytes).parse().ok()))
    }

    /// Every consolidated entry with the given key prefix (used by wallet
    /// and contract-storage listings).
    pub fn scan(&self, chain: &str, env_key_prefix: &str) -> Result<Vec<(String, String)>, StorageError> {
        let prefix = keys::prefix(keys::TABLE_ENV, chain, keys::INDEX_DATA);
        let scoped = [prefix.clone(), env_key_prefix.as_bytes().to_vec()].concat();
        let rows = self.store.scan_prefix(&scoped)?;
        Ok(rows
            .into_iter()
            .map(|(k, v)| {
                let key = String::from_utf8_lossy(&k[prefix.len()..]).into_owned();
                (key, String::from_utf8_lossy(&v).into_owned())
            })
            .collect())
    }
}

/// Persisted chain metadata: genesis block and the immutable tip marker.
#[derive(Clone)]
pub struct ChainInfoRepository {
    store: Arc<dyn KvStore>,
}

impl ChainInfoRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn save_genesis(&self, block: &Block) -> Result<(), StorageError> {
        self.store.write({
            let mut batch = WriteBatch::new();
            batch.put(
                keys::key(keys::TABLE_CHAINS, &block.chain, keys::INDEX_META, "genesis"),
                encode(block)?,
            );
            batch
        })
    }

    pub fn genesis(&self, chain: &str) -> Result<Option<Block>, StorageError> {
        let key = keys::key(keys::TABLE_CHAINS, chain, keys::INDEX_META, "genesis");
        self.store.get(&key)?.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn set_immutable_tip(&self, chain: &str, hash: &Hash) -> Result<(), StorageError> {
        self.store.write({
            let mut batch = WriteBatch::new();
            batch.put(
                keys::key(keys::TABLE_CHAINS, chain, keys::INDEX_META, "tip"),
                hash.to_hex().into_bytes(),
            );
            batch
        })
    }

    pub fn immutable_tip(&self, chain: &str) -> Result<Option<Hash>, StorageError> {
        let key = keys::key(keys::TABLE_CHAINS, chain, keys::INDEX_META, "tip");
        Ok(self
            .store
            .get(&key)?
            .and_then(|bytes| String::from_utf8_lossy(&bytes).parse().ok()))
    }
}
