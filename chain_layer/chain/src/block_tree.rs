//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Per-chain in-memory DAG of blocks and slices.
//!
//! The tree is single-writer: only the chain's pipeline worker mutates it.
//! Children reference parents by hash only; there are no owned cycles.

use std::collections::{BTreeMap, HashMap, HashSet};

use bywise_common_types::{Address, Hash};
use log::*;
use thiserror::Error;

use crate::{
    distance,
    models::{Block, BlockStatus, Slice},
};

const LOG_TARGET: &str = "bywise::chain::block_tree";

#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub block: Block,
    pub status: BlockStatus,
    /// Environment commit produced when this block was executed.
    pub commit: Option<Hash>,
}

#[derive(Debug, Clone)]
pub struct SliceEntry {
    pub slice: Slice,
    /// All referenced transactions are locally materialized.
    pub is_complete: bool,
    /// The slice's transactions were applied to an overlay.
    pub is_executed: bool,
    pub commit: Option<Hash>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AddBlockOutcome {
    /// Inserted; includes any orphans adopted as a consequence.
    Added { adopted: Vec<Hash> },
    Duplicate,
    /// Parent unknown; the caller should request `find_block(missing)`.
    Orphaned { missing: Hash },
}

#[derive(Debug, PartialEq, Eq)]
pub enum AddSliceOutcome {
    Added,
    /// Replaced a previous slice at the same (proposer, block height, height).
    Superseded,
    Duplicate,
    /// Lost the supersede tie-break against the slice already held.
    Ignored,
}

#[derive(Debug, Error)]
pub enum BlockTreeError {
    #[error("block belongs to chain {actual}, tree tracks {expected}")]
    WrongChain { expected: String, actual: String },
    #[error("genesis block must be at height 0 with a zero parent")]
    InvalidGenesis,
    #[error("conflicting genesis block {0}")]
    ConflictingGenesis(Hash),
    #[error("block {hash} height {height} does not follow parent height {parent_height}")]
    HeightMismatch {
        hash: Hash,
        height: u64,
        parent_height: u64,
    },
    #[error("unknown block {0}")]
    UnknownBlock(Hash),
    #[error("unknown slice {0}")]
    UnknownSlice(Hash),
    #[error("blocks {0} and {1} share no ancestor")]
    NoCommonAncestor(Hash, Hash),
}

#[derive(Debug)]
pub struct BlockTree {
    chain: String,
    zero_block_hash: Hash,
    current_minted: Option<Hash>,
    entries: HashMap<Hash, BlockEntry>,
    by_height: BTreeMap<u64, Vec<Hash>>,
    /// Blocks whose parent is not yet known, keyed by the missing parent.
    orphans: HashMap<Hash, Vec<Block>>,
    slice_entries: HashMap<Hash, SliceEntry>,
    slice_chains: HashMap<(Address, u64), BTreeMap<u64, Hash>>,
}

impl BlockTree {
    pub fn new(genesis: Block) -> Result<Self, BlockTreeError> {
        if !genesis.is_genesis() || !genesis.last_hash.is_zero() {
            return Err(BlockTreeError::InvalidGenesis);
        }
        let chain = genesis.chain.clone();
        let zero_block_hash = genesis.hash;
        let mut tree = Self {
            chain,
            zero_block_hash,
            current_minted: None,
            entries: HashMap::new(),
            by_height: BTreeMap::new(),
            orphans: HashMap::new(),
            slice_entries: HashMap::new(),
            slice_chains: HashMap::new(),
        };
        tree.insert_entry(genesis);
        Ok(tree)
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn zero_block_hash(&self) -> Hash {
        self.zero_block_hash
    }

    /// The tip of the canonical chain: the highest MINED block, or genesis
    /// while nothing is mined yet.
    pub fn tip_hash(&self) -> Hash {
        self.current_minted.unwrap_or(self.zero_block_hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockEntry> {
        self.entries.get(hash)
    }

    pub fn get_slice(&self, hash: &Hash) -> Option<&SliceEntry> {
        self.slice_entries.get(hash)
    }

    pub fn blocks_at_height(&self, height: u64) -> Vec<Hash> {
        self.by_height.get(&height).cloned().unwrap_or_default()
    }

    pub fn max_height(&self) -> u64 {
        self.by_height.keys().next_back().copied().unwrap_or(0)
    }

    /// Hashes in exactly `status`, ascending by height.
    pub fn hashes_with_status(&self, status: BlockStatus) -> Vec<Hash> {
        self.by_height
            .values()
            .flatten()
            .filter(|hash| self.entries.get(*hash).map(|e| e.status == status).unwrap_or(false))
            .copied()
            .collect()
    }

    /// Hashes whose status has progressed at least to `status`, ascending by
    /// height.
    pub fn hashes_at_least(&self, status: BlockStatus) -> Vec<Hash> {
        self.by_height
            .values()
            .flatten()
            .filter(|hash| {
                self.entries
                    .get(*hash)
                    .map(|e| e.status.at_least(status))
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    pub fn add_block(&mut self, block: Block) -> Result<AddBlockOutcome, BlockTreeError> {
        if block.chain != self.chain {
            return Err(BlockTreeError::WrongChain {
                expected: self.chain.clone(),
                actual: block.chain,
            });
        }
        if self.entries.contains_key(&block.hash) {
            return Ok(AddBlockOutcome::Duplicate);
        }
        if block.is_genesis() {
            // Exactly one genesis per chain; a different one is an attack or
            // a misconfigured peer.
            return Err(BlockTreeError::ConflictingGenesis(block.hash));
        }
        match self.entries.get(&block.last_hash) {
            Some(parent) => {
                if parent.block.height + 1 != block.height {
                    return Err(BlockTreeError::HeightMismatch {
                        hash: block.hash,
                        height: block.height,
                        parent_height: parent.block.height,
                    });
                }
                let hash = block.hash;
                self.insert_entry(block);
                let adopted = self.adopt_orphans(hash);
                Ok(AddBlockOutcome::Added { adopted })
            },
            None => {
                let missing = block.last_hash;
                debug!(
                    target: LOG_TARGET,
                    "block {} orphaned, missing parent {}", block.hash, missing
                );
                self.orphans.entry(missing).or_default().push(block);
                Ok(AddBlockOutcome::Orphaned { missing })
            },
        }
    }

    fn insert_entry(&mut self, block: Block) {
        self.by_height.entry(block.height).or_default().push(block.hash);
        self.entries.insert(block.hash, BlockEntry {
            block,
            status: BlockStatus::Mempool,
            commit: None,
        });
    }

    /// Re-plays orphans waiting on `parent`, depth first, and returns every
    /// hash that made it into the tree.
    fn adopt_orphans(&mut self, parent: Hash) -> Vec<Hash> {
        let mut adopted = Vec::new();
        let mut pending = vec![parent];
        while let Some(hash) = pending.pop() {
            let Some(waiting) = self.orphans.remove(&hash) else {
                continue;
            };
            for block in waiting {
                let parent_height = match self.entries.get(&block.last_hash) {
                    Some(entry) => entry.block.height,
                    None => continue,
                };
                if parent_height + 1 != block.height || self.entries.contains_key(&block.hash) {
                    continue;
                }
                let child = block.hash;
                self.insert_entry(block);
                adopted.push(child);
                pending.push(child);
            }
        }
        adopted
    }

    /// Drops orphans that waited on a parent that never arrived.
    pub fn drop_orphans_waiting_on(&mut self, missing: &Hash) -> usize {
        self.orphans.remove(missing).map(|v| v.len()).unwrap_or(0)
    }

    pub fn orphaned_parents(&self) -> Vec<Hash> {
        self.orphans.keys().copied().collect()
    }

    pub fn add_slice(&mut self, slice: Slice) -> Result<AddSliceOutcome, BlockTreeError> {
        if slice.chain != self.chain {
            return Err(BlockTreeError::WrongChain {
                expected: self.chain.clone(),
                actual: slice.chain,
            });
        }
        if self.slice_entries.contains_key(&slice.hash) {
            return Ok(AddSliceOutcome::Duplicate);
        }
        let key = (slice.from.clone(), slice.block_height);
        let chain = self.slice_chains.entry(key).or_default();
        match chain.get(&slice.height).copied() {
            Some(existing_hash) => {
                let existing = self
                    .slice_entries
                    .get(&existing_hash)
                    .ok_or(BlockTreeError::UnknownSlice(existing_hash))?;
                if supersedes(&slice, &existing.slice) {
                    chain.insert(slice.height, slice.hash);
                    self.slice_entries.remove(&existing_hash);
                    self.slice_entries.insert(slice.hash, SliceEntry {
                        slice,
                        is_complete: false,
                        is_executed: false,
                        commit: None,
                    });
                    Ok(AddSliceOutcome::Superseded)
                } else {
                    Ok(AddSliceOutcome::Ignored)
                }
            },
            None => {
                chain.insert(slice.height, slice.hash);
                self.slice_entries.insert(slice.hash, SliceEntry {
                    slice,
                    is_complete: false,
                    is_executed: false,
                    commit: None,
                });
                Ok(AddSliceOutcome::Added)
            },
        }
    }

    pub fn mark_slice_complete(&mut self, hash: &Hash) -> Result<(), BlockTreeError> {
        let entry = self
            .slice_entries
            .get_mut(hash)
            .ok_or(BlockTreeError::UnknownSlice(*hash))?;
        entry.is_complete = true;
        Ok(())
    }

    pub fn mark_slice_executed(&mut self, hash: &Hash, commit: Hash) -> Result<(), BlockTreeError> {
        let entry = self
            .slice_entries
            .get_mut(hash)
            .ok_or(BlockTreeError::UnknownSlice(*hash))?;
        entry.is_executed = true;
        entry.commit = Some(commit);
        Ok(())
    }

    /// The longest fully materialized prefix `0..=k` of a proposer's slice
    /// train for `block_height`, stopping at the first gap, the first slice
    /// that is not complete+executed, or just after the first `end = true`.
    pub fn get_best_slice(&self, proposer: &Address, block_height: u64) -> Vec<Slice> {
        let Some(chain) = self.slice_chains.get(&(proposer.clone(), block_height)) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for height in 0u64.. {
            let Some(hash) = chain.get(&height) else {
                break;
            };
            let Some(entry) = self.slice_entries.get(hash) else {
                break;
            };
            if !entry.is_complete || !entry.is_executed {
                break;
            }
            out.push(entry.slice.clone());
            if entry.slice.end {
                break;
            }
        }
        out
    }

    /// Every slice currently held in the tree.
    pub fn slice_hashes(&self) -> Vec<Hash> {
        self.slice_entries.keys().copied().collect()
    }

    /// The slice a proposer queued at `height` within `block_height`'s train.
    pub fn slice_at(&self, proposer: &Address, block_height: u64, height: u64) -> Option<&SliceEntry> {
        let chain = self.slice_chains.get(&(proposer.clone(), block_height))?;
        self.slice_entries.get(chain.get(&height)?)
    }

    /// Moves the canonical tip back to `hash` during a reorg; the caller
    /// re-mints the winning path from here.
    pub fn rewind_tip(&mut self, hash: Hash) -> Result<(), BlockTreeError> {
        if !self.entries.contains_key(&hash) {
            return Err(BlockTreeError::UnknownBlock(hash));
        }
        self.current_minted = Some(hash);
        Ok(())
    }

    /// Proposers with at least one slice queued for `block_height`.
    pub fn slice_proposers_at(&self, block_height: u64) -> Vec<Address> {
        self.slice_chains
            .keys()
            .filter(|(_, h)| *h == block_height)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    pub fn set_status(&mut self, hash: &Hash, status: BlockStatus) -> Result<(), BlockTreeError> {
        let entry = self
            .entries
            .get_mut(hash)
            .ok_or(BlockTreeError::UnknownBlock(*hash))?;
        entry.status = status;
        Ok(())
    }

    pub fn set_commit(&mut self, hash: &Hash, commit: Hash) -> Result<(), BlockTreeError> {
        let entry = self
            .entries
            .get_mut(hash)
            .ok_or(BlockTreeError::UnknownBlock(*hash))?;
        entry.commit = Some(commit);
        Ok(())
    }

    /// Marks `hash` MINED and moves the canonical tip to it.
    pub fn set_minted(&mut self, hash: Hash) -> Result<(), BlockTreeError> {
        self.set_status(&hash, BlockStatus::Mined)?;
        self.current_minted = Some(hash);
        info!(target: LOG_TARGET, "⛏️  [{}] new canonical tip {}", self.chain, hash);
        Ok(())
    }

    /// Walks parent links from `hash` down to genesis, inclusive.
    fn ancestry(&self, hash: &Hash) -> Result<Vec<Hash>, BlockTreeError> {
        let mut out = Vec::new();
        let mut cursor = *hash;
        loop {
            let entry = self
                .entries
                .get(&cursor)
                .ok_or(BlockTreeError::UnknownBlock(cursor))?;
            out.push(cursor);
            if cursor == self.zero_block_hash {
                return Ok(out);
            }
            cursor = entry.block.last_hash;
        }
    }

    pub fn common_ancestor(&self, a: &Hash, b: &Hash) -> Result<Hash, BlockTreeError> {
        let mut ca = *a;
        let mut cb = *b;
        let mut ha = self.height_of(&ca)?;
        let mut hb = self.height_of(&cb)?;
        while ha > hb {
            ca = self.parent_of(&ca)?;
            ha -= 1;
        }
        while hb > ha {
            cb = self.parent_of(&cb)?;
            hb -= 1;
        }
        while ca != cb {
            if ha == 0 {
                return Err(BlockTreeError::NoCommonAncestor(*a, *b));
            }
            ca = self.parent_of(&ca)?;
            cb = self.parent_of(&cb)?;
            ha -= 1;
        }
        Ok(ca)
    }

    fn height_of(&self, hash: &Hash) -> Result<u64, BlockTreeError> {
        Ok(self
            .entries
            .get(hash)
            .ok_or(BlockTreeError::UnknownBlock(*hash))?
            .block
            .height)
    }

    fn parent_of(&self, hash: &Hash) -> Result<Hash, BlockTreeError> {
        Ok(self
            .entries
            .get(hash)
            .ok_or(BlockTreeError::UnknownBlock(*hash))?
            .block
            .last_hash)
    }

    /// Hashes on the path `ancestor..=tip`, ascending, excluding `ancestor`.
    pub fn path_between(&self, ancestor: &Hash, tip: &Hash) -> Result<Vec<Hash>, BlockTreeError> {
        let mut out = Vec::new();
        let mut cursor = *tip;
        while cursor != *ancestor {
            out.push(cursor);
            if cursor == self.zero_block_hash {
                return Err(BlockTreeError::NoCommonAncestor(*ancestor, *tip));
            }
            cursor = self.parent_of(&cursor)?;
        }
        out.reverse();
        Ok(out)
    }

    fn links_between(&self, ancestor: &Hash, tip: &Hash) -> Result<Vec<(Hash, Address)>, BlockTreeError> {
        self.path_between(ancestor, tip)?
            .into_iter()
            .map(|hash| {
                let entry = self.entries.get(&hash).ok_or(BlockTreeError::UnknownBlock(hash))?;
                Ok((entry.block.last_hash, entry.block.from.clone()))
            })
            .collect()
    }

    /// Fork choice between two candidate tips. The higher tip wins outright;
    /// at equal height the suffixes from the common ancestor are compared by
    /// summed distance, then by tip hash.
    pub fn compare_blocks(&self, a: &Hash, b: &Hash) -> Result<Hash, BlockTreeError> {
        if a == b {
            return Ok(*a);
        }
        let ha = self.height_of(a)?;
        let hb = self.height_of(b)?;
        if ha != hb {
            return Ok(if ha > hb { *a } else { *b });
        }
        let ancestor = self.common_ancestor(a, b)?;
        let links_a = self.links_between(&ancestor, a)?;
        let links_b = self.links_between(&ancestor, b)?;
        match distance::compare_chains(&links_a, a, &links_b, b) {
            std::cmp::Ordering::Greater => Ok(*b),
            _ => Ok(*a),
        }
    }

    pub fn is_canonical(&self, hash: &Hash) -> bool {
        let tip = self.tip_hash();
        match (self.height_of(hash), self.ancestry(&tip)) {
            (Ok(_), Ok(ancestry)) => ancestry.contains(hash),
            _ => false,
        }
    }

    pub fn canonical_hash_at(&self, height: u64) -> Option<Hash> {
        let tip = self.tip_hash();
        let mut cursor = tip;
        loop {
            let entry = self.entries.get(&cursor)?;
            if entry.block.height == height {
                return Some(cursor);
            }
            if entry.block.height < height || cursor == self.zero_block_hash {
                return None;
            }
            cursor = entry.block.last_hash;
        }
    }

    /// Removes losing-branch blocks and stale slice trains at or below
    /// `height`. Canonical entries are kept so the node can keep serving
    /// them; their overlays have been consolidated by then.
    pub fn compact_up_to(&mut self, height: u64) {
        let canonical: HashSet<Hash> = {
            let mut set = HashSet::new();
            let mut cursor = self.tip_hash();
            loop {
                let Some(entry) = self.entries.get(&cursor) else {
                    break;
                };
                set.insert(cursor);
                if cursor == self.zero_block_hash {
                    break;
                }
                cursor = entry.block.last_hash;
            }
            set
        };
        let mut removed = 0usize;
        let heights: Vec<u64> = self.by_height.range(..=height).map(|(h, _)| *h).collect();
        for h in heights {
            let Some(hashes) = self.by_height.get_mut(&h) else {
                continue;
            };
            hashes.retain(|hash| {
                let keep = canonical.contains(hash);
                if !keep {
                    removed += 1;
                }
                keep
            });
            let keep: Vec<Hash> = hashes.clone();
            self.entries.retain(|hash, entry| entry.block.height != h || keep.contains(hash));
        }
        let stale: Vec<(Address, u64)> = self
            .slice_chains
            .keys()
            .filter(|(_, bh)| *bh <= height)
            .cloned()
            .collect();
        for key in stale {
            if let Some(chain) = self.slice_chains.remove(&key) {
                for hash in chain.values() {
                    self.slice_entries.remove(hash);
                }
            }
        }
        if removed > 0 {
            debug!(
                target: LOG_TARGET,
                "[{}] compacted {} non-canonical blocks up to height {}", self.chain, removed, height
            );
        }
    }

    /// Removes a single block (e.g. INVALID or expired orphan ancestor) and
    /// every descendant that hangs off it.
    pub fn remove_branch(&mut self, hash: &Hash) -> Vec<Block> {
        let mut removed = Vec::new();
        let mut pending = vec![*hash];
        while let Some(cursor) = pending.pop() {
            let children: Vec<Hash> = self
                .entries
                .values()
                .filter(|e| e.block.last_hash == cursor && e.block.hash != cursor)
                .map(|e| e.block.hash)
                .collect();
            pending.extend(children);
            if let Some(entry) = self.entries.remove(&cursor) {
                if let Some(hashes) = self.by_height.get_mut(&entry.block.height) {
                    hashes.retain(|h| h != &cursor);
                }
                removed.push(entry.block);
            }
        }
        removed
    }
}

fn supersedes(new: &Slice, old: &Slice) -> bool {
    (new.transactions_count, new.created, std::cmp::Reverse(new.hash))
        > (old.transactions_count, old.created, std::cmp::Reverse(old.hash))
}

#[cfg(test)]
mod tests {
    use bywise_common_types::KeyPair;

    use super::*;

    fn proposer() -> KeyPair {
        KeyPair::from_seed("tree-proposer")
    }

    fn genesis(p: &KeyPair) -> Block {
        Block::new_signed("main", 0, vec![], 1_700_000_000, Hash::zero(), 0, p)
    }

    fn child(p: &KeyPair, parent: &Block, height: u64) -> Block {
        Block::new_signed("main", height, vec![], parent.created + 30, parent.hash, 0, p)
    }

    fn tree() -> (KeyPair, Block, BlockTree) {
        let p = proposer();
        let g = genesis(&p);
        let tree = BlockTree::new(g.clone()).unwrap();
        (p, g, tree)
    }

    fn slice_at(p: &KeyPair, height: u64, block_height: u64, txs: u64, end: bool) -> Slice {
        let tx_hashes = (0..txs).map(|i| Hash::from_bytes([i as u8 + 1; 32])).collect();
        Slice::new_signed("main", height, block_height, tx_hashes, 1_700_000_000 + height, end, p)
    }

    fn materialize(tree: &mut BlockTree, slice: &Slice) {
        tree.mark_slice_complete(&slice.hash).unwrap();
        tree.mark_slice_executed(&slice.hash, Hash::from_bytes([0xcc; 32])).unwrap();
    }

    #[test]
    fn blocks_chain_onto_known_parents() {
        let (p, g, mut tree) = tree();
        let b1 = child(&p, &g, 1);
        assert_eq!(
            tree.add_block(b1.clone()).unwrap(),
            AddBlockOutcome::Added { adopted: vec![] }
        );
        assert_eq!(tree.add_block(b1.clone()).unwrap(), AddBlockOutcome::Duplicate);
        assert_eq!(tree.max_height(), 1);
    }

    #[test]
    fn orphan_is_adopted_when_parent_arrives() {
        let (p, g, mut tree) = tree();
        let b1 = child(&p, &g, 1);
        let b2 = child(&p, &b1, 2);
        assert_eq!(
            tree.add_block(b2.clone()).unwrap(),
            AddBlockOutcome::Orphaned { missing: b1.hash }
        );
        assert_eq!(
            tree.add_block(b1.clone()).unwrap(),
            AddBlockOutcome::Added {
                adopted: vec![b2.hash]
            }
        );
        assert!(tree.get(&b2.hash).is_some());
    }

    #[test]
    fn consecutive_slices_form_the_best_train() {
        let (p, _, mut tree) = tree();
        for height in 0..=5u64 {
            let s = slice_at(&p, height, 1, 1, height == 5);
            tree.add_slice(s.clone()).unwrap();
            materialize(&mut tree, &s);
        }
        let best = tree.get_best_slice(&p.address(), 1);
        assert_eq!(best.len(), 6);
        assert!(best.last().unwrap().end);
    }

    #[test]
    fn gap_stops_the_best_train() {
        let (p, _, mut tree) = tree();
        for height in [0u64, 1, 2, 4, 5] {
            let s = slice_at(&p, height, 1, 1, height == 5);
            tree.add_slice(s.clone()).unwrap();
            materialize(&mut tree, &s);
        }
        assert_eq!(tree.get_best_slice(&p.address(), 1).len(), 3);
    }

    #[test]
    fn bigger_slice_supersedes_at_same_height() {
        let (p, _, mut tree) = tree();
        let small = slice_at(&p, 0, 1, 1, false);
        let big = slice_at(&p, 0, 1, 3, false);
        tree.add_slice(small.clone()).unwrap();
        materialize(&mut tree, &small);
        assert_eq!(tree.add_slice(big.clone()).unwrap(), AddSliceOutcome::Superseded);
        // the replacement starts unmaterialized again
        assert!(tree.get_best_slice(&p.address(), 1).is_empty());
        materialize(&mut tree, &big);
        let best = tree.get_best_slice(&p.address(), 1);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].transactions_count, 3);
        // the smaller train cannot displace the bigger one
        assert_eq!(tree.add_slice(small).unwrap(), AddSliceOutcome::Ignored);
    }

    #[test]
    fn fork_choice_prefers_longer_then_closer() {
        let (p, g, mut tree) = tree();
        let other = KeyPair::from_seed("tree-rival");
        let a1 = child(&p, &g, 1);
        let b1 = child(&other, &g, 1);
        tree.add_block(a1.clone()).unwrap();
        tree.add_block(b1.clone()).unwrap();

        // equal length: the proposer closer to the parent hash wins
        let winner = tree.compare_blocks(&a1.hash, &b1.hash).unwrap();
        let p_addr = p.address();
        let other_addr = other.address();
        let expected = distance::compare_addresses(&g.hash, &p_addr, &other_addr);
        let expected_hash = if *expected == p_addr { a1.hash } else { b1.hash };
        assert_eq!(winner, expected_hash);

        // longer chain wins outright
        let a2 = child(&p, &a1, 2);
        tree.add_block(a2.clone()).unwrap();
        assert_eq!(tree.compare_blocks(&a2.hash, &b1.hash).unwrap(), a2.hash);
    }

    #[test]
    fn compare_is_a_total_order_on_equal_chains() {
        let (p, g, mut tree) = tree();
        let other = KeyPair::from_seed("tree-rival");
        let a1 = child(&p, &g, 1);
        let b1 = child(&other, &g, 1);
        tree.add_block(a1.clone()).unwrap();
        tree.add_block(b1.clone()).unwrap();
        let w1 = tree.compare_blocks(&a1.hash, &b1.hash).unwrap();
        let w2 = tree.compare_blocks(&b1.hash, &a1.hash).unwrap();
        assert_eq!(w1, w2);
    }

    #[test]
    fn minted_path_and_compaction() {
        let (p, g, mut tree) = tree();
        let rival = KeyPair::from_seed("tree-rival");
        let a1 = child(&p, &g, 1);
        let b1 = child(&rival, &g, 1);
        let a2 = child(&p, &a1, 2);
        tree.add_block(a1.clone()).unwrap();
        tree.add_block(b1.clone()).unwrap();
        tree.add_block(a2.clone()).unwrap();
        tree.set_minted(g.hash).unwrap();
        tree.set_minted(a1.hash).unwrap();
        tree.set_minted(a2.hash).unwrap();
        assert_eq!(tree.tip_hash(), a2.hash);
        assert!(tree.is_canonical(&a1.hash));
        assert!(!tree.is_canonical(&b1.hash));
        assert_eq!(tree.canonical_hash_at(1), Some(a1.hash));

        tree.compact_up_to(1);
        assert!(tree.get(&a1.hash).is_some());
        assert!(tree.get(&b1.hash).is_none());
    }

    #[test]
    fn common_ancestor_of_forks() {
        let (p, g, mut tree) = tree();
        let rival = KeyPair::from_seed("tree-rival");
        let a1 = child(&p, &g, 1);
        let b1 = child(&rival, &g, 1);
        let b2 = child(&rival, &b1, 2);
        tree.add_block(a1.clone()).unwrap();
        tree.add_block(b1.clone()).unwrap();
        tree.add_block(b2.clone()).unwrap();
        assert_eq!(tree.common_ancestor(&a1.hash, &b2.hash).unwrap(), g.hash);
        assert_eq!(
            tree.path_between(&g.hash, &b2.hash).unwrap(),
            vec![b1.hash, b2.hash]
        );
    }
}
