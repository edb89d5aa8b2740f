//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Per-chain pool of pending transactions and slices.
//!
//! The transaction index is sharded (dashmap) because both the HTTP surface
//! and the gossip inbound write to it; slice trains are only touched by the
//! network side and sit behind one lock.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use bywise_common_types::{Address, Hash};
use dashmap::DashMap;
use log::*;
use thiserror::Error;

use crate::models::{Slice, Transaction};

const LOG_TARGET: &str = "bywise::chain::mempool";

/// Pending transactions expire one hour after their `created` stamp.
pub const TX_TTL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {0} already pending")]
    DuplicateTransaction(Hash),
    #[error("transaction expired at {expired_at}, now {now}")]
    Expired { expired_at: u64, now: u64 },
    #[error("transaction belongs to chain {0}")]
    WrongChain(String),
}

/// A pending transaction and, once it lands in a canonical block, the block
/// that included it. Included entries stay resolvable (sibling forks may
/// reference them) but are no longer packaged into new slices.
type PendingEntry = (Transaction, Option<Hash>);

#[derive(Debug)]
pub struct Mempool {
    chain: String,
    pending_txs: DashMap<Hash, PendingEntry>,
    pending_slices: Mutex<HashMap<(Address, u64), Vec<Slice>>>,
}

impl Mempool {
    pub fn new(chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            pending_txs: DashMap::new(),
            pending_slices: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Admits a transaction. Duplicates and expired transactions are
    /// rejected; structural/signature validation happens at ingress before
    /// this point.
    pub fn add_transaction(&self, tx: Transaction, now: u64) -> Result<(), MempoolError> {
        if tx.chain != self.chain {
            return Err(MempoolError::WrongChain(tx.chain));
        }
        if tx.is_expired(now, TX_TTL_SECS) {
            return Err(MempoolError::Expired {
                expired_at: tx.created.saturating_add(TX_TTL_SECS),
                now,
            });
        }
        if self.pending_txs.contains_key(&tx.hash) {
            return Err(MempoolError::DuplicateTransaction(tx.hash));
        }
        debug!(target: LOG_TARGET, "[{}] pending tx {}", self.chain, tx.hash);
        self.pending_txs.insert(tx.hash, (tx, None));
        Ok(())
    }

    pub fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.pending_txs.get(hash).map(|e| e.value().0.clone())
    }

    pub fn contains_transaction(&self, hash: &Hash) -> bool {
        self.pending_txs.contains_key(hash)
    }

    pub fn transaction_count(&self) -> usize {
        self.pending_txs.len()
    }

    /// Drains up to `limit` currently-valid, not-yet-included transactions
    /// for a new slice, oldest first. The entries stay pending until evicted
    /// on finality.
    pub fn take_for_slice(&self, limit: usize, now: u64) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .pending_txs
            .iter()
            .filter(|e| e.value().1.is_none() && !e.value().0.is_expired(now, TX_TTL_SECS))
            .map(|e| e.value().0.clone())
            .collect();
        txs.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.hash.cmp(&b.hash)));
        txs.truncate(limit);
        txs
    }

    /// Marks transactions as included in a canonical block so they are not
    /// packaged again; sibling forks can still resolve them.
    pub fn mark_included(&self, hashes: &[Hash], block: Hash) {
        for hash in hashes {
            if let Some(mut entry) = self.pending_txs.get_mut(hash) {
                entry.value_mut().1 = Some(block);
            }
        }
    }

    /// Reverses `mark_included` for a block rolled back by a reorg.
    pub fn unmark_included(&self, block: &Hash) {
        for mut entry in self.pending_txs.iter_mut() {
            if entry.value().1.as_ref() == Some(block) {
                entry.value_mut().1 = None;
            }
        }
    }

    /// Removes transactions included in a now-immutable block.
    pub fn evict_finalized(&self, hashes: &[Hash]) {
        for hash in hashes {
            self.pending_txs.remove(hash);
        }
    }

    /// Drops everything past its TTL. Returns how many were evicted.
    pub fn evict_expired(&self, now: u64) -> usize {
        let expired: Vec<Hash> = self
            .pending_txs
            .iter()
            .filter(|e| e.value().0.is_expired(now, TX_TTL_SECS))
            .map(|e| *e.key())
            .collect();
        for hash in &expired {
            self.pending_txs.remove(hash);
        }
        if !expired.is_empty() {
            info!(
                target: LOG_TARGET,
                "[{}] evicted {} expired transactions", self.chain, expired.len()
            );
        }
        expired.len()
    }

    /// Re-admits transactions from an invalidated block when still valid.
    pub fn readmit(&self, txs: Vec<Transaction>, now: u64) -> usize {
        let mut readmitted = 0;
        for mut tx in txs {
            tx.output = None;
            if self.add_transaction(tx, now).is_ok() {
                readmitted += 1;
            }
        }
        readmitted
    }

    pub fn add_slice(&self, slice: Slice) {
        let key = (slice.from.clone(), slice.block_height);
        let mut slices = self.pending_slices.lock().unwrap_or_else(|e| e.into_inner());
        slices.entry(key).or_default().push(slice);
    }

    pub fn take_slices_for(&self, block_height: u64) -> Vec<Slice> {
        let mut slices = self.pending_slices.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<(Address, u64)> = slices
            .keys()
            .filter(|(_, h)| *h == block_height)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| slices.remove(&k))
            .flatten()
            .collect()
    }

    /// Evicts slice trains for block heights at or below the finalized
    /// horizon.
    pub fn evict_slices_up_to(&self, block_height: u64) {
        let mut slices = self.pending_slices.lock().unwrap_or_else(|e| e.into_inner());
        slices.retain(|(_, h), _| *h > block_height);
    }
}

#[cfg(test)]
mod tests {
    use bywise_common_types::KeyPair;

    use super::*;
    use crate::models::Transaction as Tx;

    fn tx_at(created: u64, nonce: u8) -> Tx {
        let sender = KeyPair::from_seed(&format!("mempool-{nonce}"));
        Tx::builder("main")
            .transfer(sender.address(), "1")
            .with_created(created)
            .build_signed(&[&sender])
    }

    #[test]
    fn duplicate_detection_is_by_hash() {
        let pool = Mempool::new("main");
        let tx = tx_at(100, 1);
        pool.add_transaction(tx.clone(), 100).unwrap();
        assert!(matches!(
            pool.add_transaction(tx, 100),
            Err(MempoolError::DuplicateTransaction(_))
        ));
        assert_eq!(pool.transaction_count(), 1);
    }

    #[test]
    fn ttl_eviction() {
        let pool = Mempool::new("main");
        pool.add_transaction(tx_at(100, 1), 100).unwrap();
        pool.add_transaction(tx_at(4000, 2), 4000).unwrap();
        assert_eq!(pool.evict_expired(100 + TX_TTL_SECS), 1);
        assert_eq!(pool.transaction_count(), 1);
    }

    #[test]
    fn rejects_expired_on_admission() {
        let pool = Mempool::new("main");
        assert!(matches!(
            pool.add_transaction(tx_at(100, 1), 100 + TX_TTL_SECS),
            Err(MempoolError::Expired { .. })
        ));
    }

    #[test]
    fn take_for_slice_is_oldest_first_and_bounded() {
        let pool = Mempool::new("main");
        pool.add_transaction(tx_at(300, 1), 300).unwrap();
        pool.add_transaction(tx_at(100, 2), 300).unwrap();
        pool.add_transaction(tx_at(200, 3), 300).unwrap();
        let taken = pool.take_for_slice(2, 300);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].created, 100);
        assert_eq!(taken[1].created, 200);
    }

    #[test]
    fn included_transactions_are_not_repackaged() {
        let pool = Mempool::new("main");
        let tx = tx_at(100, 1);
        let hash = tx.hash;
        pool.add_transaction(tx, 100).unwrap();
        let block = Hash::from_bytes([7u8; 32]);
        pool.mark_included(&[hash], block);
        assert!(pool.take_for_slice(10, 100).is_empty());
        // still resolvable for sibling forks
        assert!(pool.get_transaction(&hash).is_some());
        // a reorg makes it packageable again
        pool.unmark_included(&block);
        assert_eq!(pool.take_for_slice(10, 100).len(), 1);
    }

    #[test]
    fn finalized_eviction_removes_by_hash() {
        let pool = Mempool::new("main");
        let tx = tx_at(100, 1);
        let hash = tx.hash;
        pool.add_transaction(tx, 100).unwrap();
        pool.evict_finalized(&[hash]);
        assert_eq!(pool.transaction_count(), 0);
    }
}
