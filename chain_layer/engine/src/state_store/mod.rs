//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Copy-on-write environment overlays.
//!
//! Reads walk: local writes → the in-memory commit chain → the consolidated
//! snapshot in the KV store → unset. Commits are content-addressed over
//! `(base, sorted diff, tag)`, so identical diffs on the same base collapse
//! to one commit and consolidation is idempotent.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::RwLock,
};

use bywise_chain::storage::{EnvRepository, StorageError};
use bywise_common_types::{commit_hasher, Hash};
use log::*;
use thiserror::Error;

const LOG_TARGET: &str = "bywise::engine::state_store";

/// `None` is the tombstone: the key was deleted at this layer and lower
/// layers must not be consulted.
pub type EnvDiff = BTreeMap<String, Option<String>>;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// A commit references a base that is neither held in memory nor the
    /// consolidated tip. Fatal: the chain must resync.
    #[error("corrupt commit chain: missing commit {0}")]
    CorruptCommitChain(Hash),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
struct Commit {
    base: Hash,
    diff: EnvDiff,
    #[allow(dead_code)]
    tag: String,
}

/// A stacked overlay for one execution context. Writes stay local until
/// `EnvironmentStore::commit` captures them.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    base: Hash,
    writes: EnvDiff,
}

impl EnvironmentContext {
    /// A context reading through the commit `base`; `Hash::zero()` reads the
    /// consolidated snapshot directly.
    pub fn at(base: Hash) -> Self {
        Self {
            base,
            writes: EnvDiff::new(),
        }
    }

    pub fn base(&self) -> Hash {
        self.base
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Snapshot of the local writes, for checkpoint/rollback around a single
    /// transaction.
    pub fn checkpoint(&self) -> EnvDiff {
        self.writes.clone()
    }

    pub fn restore(&mut self, checkpoint: EnvDiff) {
        self.writes = checkpoint;
    }
}

pub struct EnvironmentStore {
    chain: String,
    commits: RwLock<HashMap<Hash, Commit>>,
    consolidated_tip: RwLock<Hash>,
    repo: EnvRepository,
}

impl EnvironmentStore {
    pub fn new(chain: impl Into<String>, repo: EnvRepository) -> Result<Self, EnvironmentError> {
        let chain = chain.into();
        let tip = repo.consolidated_tip(&chain)?.unwrap_or(Hash::zero());
        Ok(Self {
            chain,
            commits: RwLock::new(HashMap::new()),
            consolidated_tip: RwLock::new(tip),
            repo,
        })
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn consolidated_tip(&self) -> Hash {
        *self.consolidated_tip.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Reads a key through the overlay chain. `Ok(None)` means unset (or
    /// deleted), which callers treat as empty.
    pub fn get(&self, ctx: &EnvironmentContext, key: &str) -> Result<Option<String>, EnvironmentError> {
        if let Some(value) = ctx.writes.get(key) {
            return Ok(value.clone());
        }
        let commits = self.commits.read().unwrap_or_else(|e| e.into_inner());
        let consolidated = self.consolidated_tip();
        let mut cursor = ctx.base;
        loop {
            if cursor.is_zero() || cursor == consolidated {
                drop(commits);
                return Ok(self.repo.get(&self.chain, key)?);
            }
            match commits.get(&cursor) {
                Some(commit) => {
                    if let Some(value) = commit.diff.get(key) {
                        return Ok(value.clone());
                    }
                    cursor = commit.base;
                },
                None => return Err(EnvironmentError::CorruptCommitChain(cursor)),
            }
        }
    }

    pub fn set(&self, ctx: &mut EnvironmentContext, key: impl Into<String>, value: impl Into<String>) {
        ctx.writes.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&self, ctx: &mut EnvironmentContext, key: impl Into<String>) {
        ctx.writes.insert(key.into(), None);
    }

    /// Captures the context's writes as a new commit labelled `tag` and
    /// rebases the context on it. A context without writes keeps its base.
    pub fn commit(&self, ctx: &mut EnvironmentContext, tag: &str) -> Hash {
        if ctx.writes.is_empty() {
            return ctx.base;
        }
        let diff = std::mem::take(&mut ctx.writes);
        let hash = commit_hash(&ctx.base, &diff, tag);
        let mut commits = self.commits.write().unwrap_or_else(|e| e.into_inner());
        commits.entry(hash).or_insert(Commit {
            base: ctx.base,
            diff,
            tag: tag.to_string(),
        });
        ctx.base = hash;
        hash
    }

    /// Whether `commit` is known (in memory or already consolidated).
    pub fn knows(&self, commit: &Hash) -> bool {
        commit.is_zero()
            || *commit == self.consolidated_tip()
            || self
                .commits
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains_key(commit)
    }

    /// Flattens the commit chain reachable from `tip` into the persisted
    /// snapshot and drops the applied overlays. Idempotent: consolidating the
    /// current tip again is a no-op.
    pub fn consolidate(&self, tip: Hash) -> Result<(), EnvironmentError> {
        if tip.is_zero() || tip == self.consolidated_tip() {
            return Ok(());
        }
        let chain_to_apply = {
            let commits = self.commits.read().unwrap_or_else(|e| e.into_inner());
            let consolidated = self.consolidated_tip();
            let mut chain_to_apply = Vec::new();
            let mut cursor = tip;
            while !cursor.is_zero() && cursor != consolidated {
                let commit = commits
                    .get(&cursor)
                    .ok_or(EnvironmentError::CorruptCommitChain(cursor))?;
                chain_to_apply.push(cursor);
                cursor = commit.base;
            }
            chain_to_apply
        };

        // oldest first, newest wins on key collisions
        let mut merged = EnvDiff::new();
        {
            let commits = self.commits.read().unwrap_or_else(|e| e.into_inner());
            for hash in chain_to_apply.iter().rev() {
                if let Some(commit) = commits.get(hash) {
                    for (key, value) in &commit.diff {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        self.repo.apply(&self.chain, &merged, &tip)?;
        *self.consolidated_tip.write().unwrap_or_else(|e| e.into_inner()) = tip;
        let mut commits = self.commits.write().unwrap_or_else(|e| e.into_inner());
        for hash in &chain_to_apply {
            commits.remove(hash);
        }
        info!(
            target: LOG_TARGET,
            "[{}] consolidated {} overlays into {}", self.chain, chain_to_apply.len(), tip
        );
        Ok(())
    }

    /// Drops overlays not reachable from any of the live tips (losing
    /// branches after a reorg, abandoned simulations).
    pub fn drop_unreachable(&self, live_tips: &[Hash]) -> usize {
        let mut commits = self.commits.write().unwrap_or_else(|e| e.into_inner());
        let mut reachable = HashSet::new();
        for tip in live_tips {
            let mut cursor = *tip;
            while !cursor.is_zero() && reachable.insert(cursor) {
                match commits.get(&cursor) {
                    Some(commit) => cursor = commit.base,
                    None => break,
                }
            }
        }
        let before = commits.len();
        commits.retain(|hash, _| reachable.contains(hash));
        let dropped = before - commits.len();
        if dropped > 0 {
            debug!(target: LOG_TARGET, "[{}] dropped {} unreachable overlays", self.chain, dropped);
        }
        dropped
    }

    pub fn overlay_count(&self) -> usize {
        self.commits.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// All live entries whose key starts with `prefix`, merged through the
    /// overlay chain (newest layer wins, tombstones hide lower layers).
    pub fn scan(
        &self,
        ctx: &EnvironmentContext,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, EnvironmentError> {
        // bottom-up: consolidated snapshot, then commits oldest→newest, then
        // the context's local writes
        let mut merged: BTreeMap<String, Option<String>> = self
            .repo
            .scan(&self.chain, prefix)?
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();

        let commits = self.commits.read().unwrap_or_else(|e| e.into_inner());
        let consolidated = self.consolidated_tip();
        let mut layers = Vec::new();
        let mut cursor = ctx.base;
        while !cursor.is_zero() && cursor != consolidated {
            match commits.get(&cursor) {
                Some(commit) => {
                    layers.push(cursor);
                    cursor = commit.base;
                },
                None => return Err(EnvironmentError::CorruptCommitChain(cursor)),
            }
        }
        for hash in layers.iter().rev() {
            if let Some(commit) = commits.get(hash) {
                for (key, value) in commit.diff.range(prefix.to_string()..) {
                    if !key.starts_with(prefix) {
                        break;
                    }
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        for (key, value) in ctx.writes.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            merged.insert(key.clone(), value.clone());
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }
}

fn commit_hash(base: &Hash, diff: &EnvDiff, tag: &str) -> Hash {
    let mut hasher = commit_hasher().chain(base).chain(tag);
    for (key, value) in diff {
        hasher.update(key);
        hasher.update(value);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bywise_chain::storage::MemoryKvStore;

    use super::*;

    fn env() -> EnvironmentStore {
        let repo = EnvRepository::new(Arc::new(MemoryKvStore::new()));
        EnvironmentStore::new("main", repo).unwrap()
    }

    #[test]
    fn reads_fall_through_overlays() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        store.set(&mut ctx, "k", "1");
        assert_eq!(store.get(&ctx, "k").unwrap().unwrap(), "1");
        let base = store.commit(&mut ctx, "first");

        let mut child = EnvironmentContext::at(base);
        assert_eq!(store.get(&child, "k").unwrap().unwrap(), "1");
        store.set(&mut child, "k", "2");
        assert_eq!(store.get(&child, "k").unwrap().unwrap(), "2");
        store.commit(&mut child, "second");
        assert_eq!(store.get(&child, "k").unwrap().unwrap(), "2");

        // sibling of `child` still sees the first value
        let sibling = EnvironmentContext::at(base);
        assert_eq!(store.get(&sibling, "k").unwrap().unwrap(), "1");
    }

    #[test]
    fn tombstone_shadows_lower_layers() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        store.set(&mut ctx, "k", "1");
        let base = store.commit(&mut ctx, "set");
        let mut child = EnvironmentContext::at(base);
        store.delete(&mut child, "k");
        assert_eq!(store.get(&child, "k").unwrap(), None);
        let deleted = store.commit(&mut child, "del");
        let reader = EnvironmentContext::at(deleted);
        assert_eq!(store.get(&reader, "k").unwrap(), None);
    }

    #[test]
    fn identical_diffs_yield_identical_commits() {
        let store = env();
        let mut a = EnvironmentContext::at(Hash::zero());
        store.set(&mut a, "x", "7");
        let ha = store.commit(&mut a, "tag");

        let mut b = EnvironmentContext::at(Hash::zero());
        store.set(&mut b, "x", "7");
        let hb = store.commit(&mut b, "tag");
        assert_eq!(ha, hb);
        assert_eq!(store.overlay_count(), 1);

        let mut c = EnvironmentContext::at(Hash::zero());
        store.set(&mut c, "x", "7");
        let hc = store.commit(&mut c, "other-tag");
        assert_ne!(ha, hc);
    }

    #[test]
    fn consolidate_is_idempotent_and_flattens() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        store.set(&mut ctx, "a", "1");
        store.commit(&mut ctx, "one");
        store.set(&mut ctx, "a", "2");
        store.set(&mut ctx, "b", "3");
        let tip = store.commit(&mut ctx, "two");

        store.consolidate(tip).unwrap();
        assert_eq!(store.consolidated_tip(), tip);
        assert_eq!(store.overlay_count(), 0);
        store.consolidate(tip).unwrap();

        // reads keep working through the consolidated snapshot
        let reader = EnvironmentContext::at(tip);
        assert_eq!(store.get(&reader, "a").unwrap().unwrap(), "2");
        assert_eq!(store.get(&reader, "b").unwrap().unwrap(), "3");

        // and new overlays stack on top
        let mut next = EnvironmentContext::at(tip);
        store.set(&mut next, "a", "9");
        let h = store.commit(&mut next, "three");
        assert_eq!(store.get(&EnvironmentContext::at(h), "a").unwrap().unwrap(), "9");
    }

    #[test]
    fn missing_base_is_fatal() {
        let store = env();
        let ctx = EnvironmentContext::at(Hash::from_bytes([9u8; 32]));
        assert!(matches!(
            store.get(&ctx, "k"),
            Err(EnvironmentError::CorruptCommitChain(_))
        ));
    }

    #[test]
    fn drop_unreachable_keeps_live_branches() {
        let store = env();
        let mut live = EnvironmentContext::at(Hash::zero());
        store.set(&mut live, "a", "1");
        let live_tip = store.commit(&mut live, "live");

        let mut dead = EnvironmentContext::at(Hash::zero());
        store.set(&mut dead, "b", "2");
        store.commit(&mut dead, "dead");

        assert_eq!(store.drop_unreachable(&[live_tip]), 1);
        assert_eq!(store.overlay_count(), 1);
        assert_eq!(
            store.get(&EnvironmentContext::at(live_tip), "a").unwrap().unwrap(),
            "1"
        );
    }

    #[test]
    fn scan_merges_layers_and_hides_tombstones() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        store.set(&mut ctx, "validator:a", "true");
        store.set(&mut ctx, "validator:b", "true");
        let base = store.commit(&mut ctx, "one");
        store.consolidate(base).unwrap();

        let mut ctx = EnvironmentContext::at(base);
        store.set(&mut ctx, "validator:c", "true");
        store.delete(&mut ctx, "validator:a");
        store.commit(&mut ctx, "two");
        store.set(&mut ctx, "validator:d", "true");

        let keys: Vec<String> = store
            .scan(&ctx, "validator:")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, ["validator:b", "validator:c", "validator:d"]);
    }

    #[test]
    fn checkpoint_restores_transaction_writes() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        store.set(&mut ctx, "kept", "1");
        let checkpoint = ctx.checkpoint();
        store.set(&mut ctx, "rolled-back", "2");
        ctx.restore(checkpoint);
        assert_eq!(store.get(&ctx, "kept").unwrap().unwrap(), "1");
        assert_eq!(store.get(&ctx, "rolled-back").unwrap(), None);
    }
}
