//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The per-chain pipeline: drives every known block through
//! `MEMPOOL → COMPLETE → EXECUTED → MINED → IMMUTABLE`.
//!
//! One worker task per chain; it is the single writer of that chain's block
//! tree and environment store. Every transition is idempotent, so a restart
//! replays from the last immutable block without special cases.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use bywise_chain::{
    block_tree::{AddBlockOutcome, AddSliceOutcome, BlockTree, BlockTreeError},
    mempool::Mempool,
    models::{Block, BlockStatus, Slice, Transaction},
    storage::{ChainStores, StorageError},
};
use bywise_common_types::{shutdown::ShutdownSignal, Hash};
use bywise_engine::{
    config,
    executor::{ExecutionContext, ExecutionError, TransactionExecutor},
    state_store::{EnvironmentContext, EnvironmentError, EnvironmentStore},
};
use bywise_p2p::GossipMessage;
use log::*;
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::sleep,
};

use crate::{
    events::ChainEvent,
    handle::{PipelineHandle, PipelineRequest, TipInfo, WalletSnapshot},
    traits::GossipOutbound,
};

const LOG_TARGET: &str = "bywise::consensus::pipeline";

/// Idle sleep between pipeline iterations.
const STEP_INTERVAL: Duration = Duration::from_millis(60);
/// A missing dependency is re-requested no more often than this.
const FETCH_RETRY: Duration = Duration::from_secs(5);
/// A block stuck on missing dependencies is dropped after this long.
const FETCH_TTL: Duration = Duration::from_secs(60);

const REQUEST_CHANNEL_SIZE: usize = 64;
const INBOUND_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Tree(#[from] BlockTreeError),
    #[error("execution: {0}")]
    Execution(String),
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

enum BlockExecution {
    Executed,
    /// A dependency disappeared between completeness and execution.
    Incomplete,
    Invalid(String),
}

pub struct PipelineWorker<TGossip> {
    chain: String,
    tree: BlockTree,
    env: Arc<EnvironmentStore>,
    executor: TransactionExecutor,
    mempool: Arc<Mempool>,
    stores: ChainStores,
    gossip: TGossip,
    tx_events: broadcast::Sender<ChainEvent>,
    /// Executed transactions (with outputs) per block, held until the block
    /// is immutable and persisted.
    executed_txs: HashMap<Hash, Vec<Transaction>>,
    /// Outstanding `find_*` requests and when they were last sent.
    pending_fetch: HashMap<Hash, Instant>,
    /// When each block entered MEMPOOL state, for the dependency TTL.
    waiting_since: HashMap<Hash, Instant>,
    immutable_height: Option<u64>,
}

impl<TGossip: GossipOutbound> PipelineWorker<TGossip> {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        tree: BlockTree,
        env: Arc<EnvironmentStore>,
        executor: TransactionExecutor,
        mempool: Arc<Mempool>,
        stores: ChainStores,
        gossip: TGossip,
        tx_events: broadcast::Sender<ChainEvent>,
        immutable_height: Option<u64>,
        shutdown: ShutdownSignal,
    ) -> (PipelineHandle, JoinHandle<Result<(), PipelineError>>) {
        let (tx_requests, rx_requests) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (tx_blocks, rx_blocks) = mpsc::channel(INBOUND_CHANNEL_SIZE);
        let (tx_slices, rx_slices) = mpsc::channel(INBOUND_CHANNEL_SIZE);
        let worker = Self {
            chain: tree.chain().to_string(),
            tree,
            env,
            executor,
            mempool,
            stores,
            gossip,
            tx_events,
            executed_txs: HashMap::new(),
            pending_fetch: HashMap::new(),
            waiting_since: HashMap::new(),
            immutable_height,
        };
        let handle = PipelineHandle::new(tx_requests, tx_blocks, tx_slices);
        let join = tokio::spawn(worker.run(rx_blocks, rx_slices, rx_requests, shutdown));
        (handle, join)
    }

    async fn run(
        mut self,
        mut rx_blocks: mpsc::Receiver<Block>,
        mut rx_slices: mpsc::Receiver<Slice>,
        mut rx_requests: mpsc::Receiver<PipelineRequest>,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), PipelineError> {
        info!(target: LOG_TARGET, "🛠️  [{}] pipeline started", self.chain);
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!(target: LOG_TARGET, "[{}] pipeline shutting down", self.chain);
                    return Ok(());
                },
                maybe = rx_blocks.recv() => match maybe {
                    Some(block) => self.on_block(block).await,
                    None => return Ok(()),
                },
                maybe = rx_slices.recv() => match maybe {
                    Some(slice) => self.on_slice(slice).await,
                    None => return Ok(()),
                },
                maybe = rx_requests.recv() => match maybe {
                    Some(request) => self.on_request(request),
                    None => return Ok(()),
                },
                _ = sleep(STEP_INTERVAL) => {},
            }
            if let Err(e) = self.step().await {
                error!(target: LOG_TARGET, "💥 [{}] pipeline fatal: {}", self.chain, e);
                return Err(e);
            }
        }
    }

    async fn on_block(&mut self, block: Block) {
        if let Err(e) = block.validate() {
            warn!(target: LOG_TARGET, "[{}] rejected block {}: {}", self.chain, block.hash, e);
            return;
        }
        let hash = block.hash;
        match self.tree.add_block(block) {
            Ok(AddBlockOutcome::Added { adopted }) => {
                self.waiting_since.insert(hash, Instant::now());
                for hash in adopted {
                    self.waiting_since.insert(hash, Instant::now());
                }
                self.pending_fetch.remove(&hash);
            },
            Ok(AddBlockOutcome::Orphaned { missing }) => {
                self.request_fetch(GossipMessage::FindBlock {
                    chain: self.chain.clone(),
                    hash: missing,
                })
                .await;
            },
            Ok(AddBlockOutcome::Duplicate) => {},
            Err(e) => {
                warn!(target: LOG_TARGET, "[{}] block {} not accepted: {}", self.chain, hash, e);
            },
        }
    }

    async fn on_slice(&mut self, slice: Slice) {
        if let Err(e) = slice.validate() {
            warn!(target: LOG_TARGET, "[{}] rejected slice {}: {}", self.chain, slice.hash, e);
            return;
        }
        let tip_height = self.tip_info().height;
        if slice.block_height > tip_height + 1 {
            // ahead of the forming block; buffered until its height opens
            self.mempool.add_slice(slice);
            return;
        }
        self.ingest_slice(slice);
    }

    fn ingest_slice(&mut self, slice: Slice) {
        let hash = slice.hash;
        match self.tree.add_slice(slice) {
            Ok(AddSliceOutcome::Added) | Ok(AddSliceOutcome::Superseded) => {
                self.pending_fetch.remove(&hash);
                let _ = self.tx_events.send(ChainEvent::SliceAccepted {
                    chain: self.chain.clone(),
                    hash,
                });
            },
            Ok(AddSliceOutcome::Duplicate) | Ok(AddSliceOutcome::Ignored) => {},
            Err(e) => {
                warn!(target: LOG_TARGET, "[{}] slice {} not accepted: {}", self.chain, hash, e);
            },
        }
    }

    fn on_request(&mut self, request: PipelineRequest) {
        match request {
            PipelineRequest::GetTip(reply) => {
                let _ = reply.send(self.tip_info());
            },
            PipelineRequest::GetParams(reply) => {
                let ctx = self.tip_ctx();
                let height = self.tip_info().height;
                let params = config::params_at(&self.env, &ctx, height).unwrap_or_default();
                let _ = reply.send(params);
            },
            PipelineRequest::GetValidators(reply) => {
                let ctx = self.tip_ctx();
                let validators = self.executor.validators(&ctx).unwrap_or_default();
                let _ = reply.send(validators);
            },
            PipelineRequest::GetBestSlice {
                proposer,
                block_height,
                reply,
            } => {
                let _ = reply.send(self.tree.get_best_slice(&proposer, block_height));
            },
            PipelineRequest::GetSliceProposers { block_height, reply } => {
                let _ = reply.send(self.tree.slice_proposers_at(block_height));
            },
            PipelineRequest::GetBlock { hash, reply } => {
                let found = match self.tree.get(&hash) {
                    Some(entry) => Some((entry.block.clone(), entry.status)),
                    None => self
                        .stores
                        .blocks
                        .get_by_hash(&self.chain, &hash)
                        .ok()
                        .flatten()
                        .map(|block| (block, BlockStatus::Immutable)),
                };
                let _ = reply.send(found);
            },
            PipelineRequest::GetSlice { hash, reply } => {
                let found = match self.tree.get_slice(&hash) {
                    Some(entry) => Some(entry.slice.clone()),
                    None => self.stores.slices.get_by_hash(&self.chain, &hash).ok().flatten(),
                };
                let _ = reply.send(found);
            },
            PipelineRequest::GetWallet { address, reply } => {
                let ctx = self.tip_ctx();
                let snapshot = match (
                    self.executor.balance_of(&ctx, &address),
                    self.executor.wallet_info(&ctx, &address),
                ) {
                    (Ok(balance), Ok(info)) => Some(WalletSnapshot {
                        balance: bywise_common_types::format_amount(&balance),
                        info,
                    }),
                    _ => None,
                };
                let _ = reply.send(snapshot);
            },
            PipelineRequest::Simulate {
                tx,
                simulate_wallet,
                reply,
            } => {
                let mut probe = self.tip_ctx();
                let height = self.tip_info().height + 1;
                let proposer = tx.from.first().cloned().unwrap_or_else(bywise_common_types::Address::zero);
                let exec = ExecutionContext::simulation(height, proposer, simulate_wallet);
                let result = self
                    .executor
                    .execute(&mut probe, &exec, &tx)
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            },
        }
    }

    /// One idempotent pass over every in-flight block.
    async fn step(&mut self) -> Result<(), PipelineError> {
        let working_height = self.tip_info().height + 1;
        for slice in self.mempool.take_slices_for(working_height) {
            self.ingest_slice(slice);
        }
        self.complete_slices().await;
        self.complete_blocks().await?;
        self.execute_ready()?;
        self.execute_pending_slices(working_height)?;
        self.apply_fork_choice()?;
        self.finalize()?;
        self.expire_waiting();
        Ok(())
    }

    fn tip_info(&self) -> TipInfo {
        let hash = self.tree.tip_hash();
        match self.tree.get(&hash) {
            Some(entry) => TipInfo {
                hash,
                height: entry.block.height,
                created: entry.block.created,
            },
            None => TipInfo {
                hash,
                height: 0,
                created: 0,
            },
        }
    }

    fn tip_ctx(&self) -> EnvironmentContext {
        let tip = self.tree.tip_hash();
        let base = self
            .tree
            .get(&tip)
            .and_then(|entry| entry.commit)
            .unwrap_or_else(|| self.env.consolidated_tip());
        EnvironmentContext::at(base)
    }

    async fn request_fetch(&mut self, message: GossipMessage) {
        let hash = message.item_hash();
        let now = Instant::now();
        if let Some(last) = self.pending_fetch.get(&hash) {
            if now.duration_since(*last) < FETCH_RETRY {
                return;
            }
        }
        self.pending_fetch.insert(hash, now);
        debug!(target: LOG_TARGET, "[{}] requesting {} {}", self.chain, message.topic(), hash);
        self.gossip.broadcast(message).await;
    }

    fn lookup_tx(&self, hash: &Hash) -> Option<Transaction> {
        self.mempool
            .get_transaction(hash)
            .or_else(|| self.stores.transactions.get_by_hash(&self.chain, hash).ok().flatten())
    }

    /// Marks slices complete once every referenced transaction is local;
    /// requests the missing ones.
    async fn complete_slices(&mut self) {
        let incomplete: Vec<Slice> = self
            .tree
            .slice_hashes()
            .into_iter()
            .filter_map(|hash| self.tree.get_slice(&hash))
            .filter(|entry| !entry.is_complete)
            .map(|entry| entry.slice.clone())
            .collect();
        for slice in incomplete {
            let mut missing = Vec::new();
            for tx_hash in &slice.transactions {
                if self.lookup_tx(tx_hash).is_none() {
                    missing.push(*tx_hash);
                }
            }
            if missing.is_empty() {
                let _ = self.tree.mark_slice_complete(&slice.hash);
            } else {
                for hash in missing {
                    self.request_fetch(GossipMessage::FindTx {
                        chain: self.chain.clone(),
                        hash,
                    })
                    .await;
                }
            }
        }
    }

    /// MEMPOOL → COMPLETE: all slices known and complete.
    async fn complete_blocks(&mut self) -> Result<(), PipelineError> {
        for hash in self.tree.hashes_with_status(BlockStatus::Mempool) {
            let Some(entry) = self.tree.get(&hash) else { continue };
            let block = entry.block.clone();
            let mut missing_slices = Vec::new();
            let mut all_complete = true;
            for slice_hash in &block.slices {
                match self.tree.get_slice(slice_hash) {
                    Some(slice_entry) => {
                        if !slice_entry.is_complete {
                            all_complete = false;
                        }
                    },
                    None => {
                        missing_slices.push(*slice_hash);
                        all_complete = false;
                    },
                }
            }
            if !missing_slices.is_empty() {
                for slice_hash in missing_slices {
                    self.request_fetch(GossipMessage::FindSlice {
                        chain: self.chain.clone(),
                        hash: slice_hash,
                    })
                    .await;
                }
                continue;
            }
            if all_complete {
                self.tree.set_status(&hash, BlockStatus::Complete)?;
                self.waiting_since.remove(&hash);
                debug!(target: LOG_TARGET, "[{}] block {} complete", self.chain, hash);
            }
        }
        Ok(())
    }

    /// COMPLETE → EXECUTED, ascending heights so parents run first.
    fn execute_ready(&mut self) -> Result<(), PipelineError> {
        for hash in self.tree.hashes_with_status(BlockStatus::Complete) {
            let Some(entry) = self.tree.get(&hash) else { continue };
            let block = entry.block.clone();
            let parent_ready = if block.is_genesis() {
                true
            } else {
                self.tree
                    .get(&block.last_hash)
                    .map(|p| p.status.at_least(BlockStatus::Executed))
                    .unwrap_or(false)
            };
            if !parent_ready {
                continue;
            }
            match self.execute_block(&block)? {
                BlockExecution::Executed => {
                    self.tree.set_status(&hash, BlockStatus::Executed)?;
                    debug!(target: LOG_TARGET, "[{}] block {} executed", self.chain, hash);
                },
                BlockExecution::Incomplete => {
                    // lost a dependency (superseded slice); go around again
                    self.tree.set_status(&hash, BlockStatus::Mempool)?;
                    self.waiting_since.insert(hash, Instant::now());
                },
                BlockExecution::Invalid(reason) => {
                    warn!(target: LOG_TARGET, "🚫 [{}] block {} invalid: {}", self.chain, hash, reason);
                    self.invalidate_block(&hash, reason)?;
                },
            }
        }
        Ok(())
    }

    fn execute_block(&mut self, block: &Block) -> Result<BlockExecution, PipelineError> {
        let parent_commit = if block.is_genesis() {
            Hash::zero()
        } else {
            match self.tree.get(&block.last_hash).and_then(|p| p.commit) {
                Some(commit) => commit,
                None => return Ok(BlockExecution::Incomplete),
            }
        };
        let mut slices = Vec::new();
        for slice_hash in &block.slices {
            match self.tree.get_slice(slice_hash) {
                Some(entry) if entry.is_complete => slices.push(entry.slice.clone()),
                _ => return Ok(BlockExecution::Incomplete),
            }
        }
        slices.sort_by_key(|s| s.height);

        let mut ctx = EnvironmentContext::at(parent_commit);
        let mut executed = Vec::new();
        let mut tx_total = 0u64;
        for slice in &slices {
            let exec = ExecutionContext::for_block(block.height, slice.from.clone());
            let slice_start = executed.len();
            for tx_hash in &slice.transactions {
                let Some(mut tx) = self.lookup_tx(tx_hash) else {
                    return Ok(BlockExecution::Incomplete);
                };
                tx.output = None;
                match self.executor.execute(&mut ctx, &exec, &tx) {
                    Ok(output) => {
                        tx.output = Some(output);
                        executed.push(tx);
                    },
                    Err(ExecutionError::Environment(e)) => return Err(e.into()),
                    Err(e) => return Ok(BlockExecution::Invalid(format!("tx {tx_hash}: {e}"))),
                }
            }
            tx_total += slice.transactions.len() as u64;
            let commit = self.env.commit(&mut ctx, &slice.hash.to_hex());
            for tx in &mut executed[slice_start..] {
                if let Some(output) = &mut tx.output {
                    output.ctx = Some(commit);
                }
            }
            let _ = self.tree.mark_slice_executed(&slice.hash, commit);
        }
        if tx_total != block.transactions_count {
            return Ok(BlockExecution::Invalid(format!(
                "transactionsCount {} does not match slices ({tx_total})",
                block.transactions_count
            )));
        }
        let block_commit = self.env.commit(&mut ctx, &block.hash.to_hex());
        self.tree.set_commit(&block.hash, block_commit)?;
        self.executed_txs.insert(block.hash, executed);
        Ok(BlockExecution::Executed)
    }

    fn invalidate_block(&mut self, hash: &Hash, reason: String) -> Result<(), PipelineError> {
        self.tree.set_status(hash, BlockStatus::Invalid)?;
        // its transactions go back to the pool when still valid elsewhere
        if let Some(entry) = self.tree.get(hash) {
            let block = entry.block.clone();
            let now = now_secs();
            let mut txs = Vec::new();
            for slice_hash in &block.slices {
                if let Some(slice_entry) = self.tree.get_slice(slice_hash) {
                    for tx_hash in &slice_entry.slice.transactions {
                        if let Some(tx) = self.lookup_tx(tx_hash) {
                            txs.push(tx);
                        }
                    }
                }
            }
            self.mempool.readmit(txs, now);
        }
        let removed = self.tree.remove_branch(hash);
        for block in &removed {
            self.executed_txs.remove(&block.hash);
        }
        let _ = self.tx_events.send(ChainEvent::BlockInvalid {
            chain: self.chain.clone(),
            hash: *hash,
            reason,
        });
        Ok(())
    }

    /// Speculatively executes complete slice trains for the forming block so
    /// `get_best_slice` sees fully materialized prefixes.
    fn execute_pending_slices(&mut self, block_height: u64) -> Result<(), PipelineError> {
        let tip_commit = self.tip_ctx().base();
        for proposer in self.tree.slice_proposers_at(block_height) {
            let mut base = tip_commit;
            for height in 0u64.. {
                let Some(entry) = self.tree.slice_at(&proposer, block_height, height) else {
                    break;
                };
                if !entry.is_complete {
                    break;
                }
                if entry.is_executed {
                    if let Some(commit) = entry.commit {
                        base = commit;
                    }
                    if entry.slice.end {
                        break;
                    }
                    continue;
                }
                let slice = entry.slice.clone();
                let mut ctx = EnvironmentContext::at(base);
                let exec = ExecutionContext::for_block(block_height, slice.from.clone());
                let mut ok = true;
                for tx_hash in &slice.transactions {
                    let Some(mut tx) = self.lookup_tx(tx_hash) else {
                        ok = false;
                        break;
                    };
                    tx.output = None;
                    if let Err(e) = self.executor.execute(&mut ctx, &exec, &tx) {
                        if let ExecutionError::Environment(env_err) = e {
                            return Err(env_err.into());
                        }
                        ok = false;
                        break;
                    }
                }
                if !ok {
                    break;
                }
                let commit = self.env.commit(&mut ctx, &slice.hash.to_hex());
                let _ = self.tree.mark_slice_executed(&slice.hash, commit);
                base = commit;
                if slice.end {
                    break;
                }
            }
        }
        Ok(())
    }

    /// EXECUTED → MINED along the preferred fork, including reorgs.
    fn apply_fork_choice(&mut self) -> Result<(), PipelineError> {
        let tip = self.tree.tip_hash();

        // genesis becomes canonical as soon as it executes
        if let Some(entry) = self.tree.get(&tip) {
            if entry.status == BlockStatus::Executed && entry.block.is_genesis() {
                self.tree.set_minted(tip)?;
                let _ = self.tx_events.send(ChainEvent::BlockMined {
                    chain: self.chain.clone(),
                    hash: tip,
                    height: 0,
                });
            }
        }

        let tip = self.tree.tip_hash();
        let Some(tip_entry) = self.tree.get(&tip) else { return Ok(()) };
        if !tip_entry.status.at_least(BlockStatus::Mined) {
            return Ok(());
        }

        let mut best = tip;
        for candidate in self.tree.hashes_at_least(BlockStatus::Executed) {
            best = self.tree.compare_blocks(&best, &candidate)?;
        }
        if best == tip {
            return Ok(());
        }

        let ancestor = self.tree.common_ancestor(&tip, &best)?;
        if ancestor != tip {
            // a sibling branch won: roll the losing suffix back
            info!(
                target: LOG_TARGET,
                "🔀 [{}] reorg from {} to {} (ancestor {})", self.chain, tip, best, ancestor
            );
            let losing = self.tree.path_between(&ancestor, &tip)?;
            let now = now_secs();
            for hash in losing.iter().rev() {
                self.tree.set_status(hash, BlockStatus::Executed)?;
                self.mempool.unmark_included(hash);
                if let Some(txs) = self.executed_txs.get(hash) {
                    self.mempool.readmit(txs.clone(), now);
                }
            }
            self.tree.rewind_tip(ancestor)?;
            let _ = self.tx_events.send(ChainEvent::Reorg {
                chain: self.chain.clone(),
                from: tip,
                to: best,
                ancestor,
            });
        }
        for hash in self.tree.path_between(&ancestor, &best)? {
            let height = self.tree.get(&hash).map(|e| e.block.height).unwrap_or(0);
            self.tree.set_minted(hash)?;
            // a pending tx that made it into the canonical chain must not be
            // packaged again; a reorg unmarks it
            if let Some(txs) = self.executed_txs.get(&hash) {
                let included: Vec<Hash> = txs.iter().map(|tx| tx.hash).collect();
                self.mempool.mark_included(&included, hash);
            }
            let _ = self.tx_events.send(ChainEvent::BlockMined {
                chain: self.chain.clone(),
                hash,
                height,
            });
        }
        Ok(())
    }

    /// MINED → IMMUTABLE once a block sinks below the reorg window; its
    /// overlays consolidate into the persisted snapshot and everything about
    /// it is written through the repositories.
    fn finalize(&mut self) -> Result<(), PipelineError> {
        let tip = self.tip_info();
        let ctx = self.tip_ctx();
        let window = config::params_at(&self.env, &ctx, tip.height)?.immutable_window;
        loop {
            let next = self.immutable_height.map(|h| h + 1).unwrap_or(0);
            if tip.height < window || next > tip.height - window {
                return Ok(());
            }
            let Some(hash) = self.tree.canonical_hash_at(next) else {
                return Ok(());
            };
            let Some(entry) = self.tree.get(&hash) else {
                return Ok(());
            };
            if !entry.status.at_least(BlockStatus::Mined) {
                return Ok(());
            }
            let block = entry.block.clone();
            if let Some(commit) = entry.commit {
                self.env.consolidate(commit)?;
            }
            self.stores.blocks.save(&block)?;
            let mut finalized_hashes = Vec::new();
            if let Some(txs) = self.executed_txs.remove(&hash) {
                for tx in &txs {
                    self.stores.transactions.save(tx)?;
                    finalized_hashes.push(tx.hash);
                    if let Some(output) = &tx.output {
                        for event in &output.events {
                            self.stores.events.save(&self.chain, event)?;
                        }
                    }
                }
            }
            for slice_hash in &block.slices {
                if let Some(slice_entry) = self.tree.get_slice(slice_hash) {
                    self.stores.slices.save(&slice_entry.slice)?;
                }
            }
            self.mempool.evict_finalized(&finalized_hashes);
            self.mempool.evict_slices_up_to(next);
            self.mempool.evict_expired(now_secs());
            self.tree.set_status(&hash, BlockStatus::Immutable)?;
            self.stores.chain_info.set_immutable_tip(&self.chain, &hash)?;
            self.immutable_height = Some(next);
            info!(target: LOG_TARGET, "🧊 [{}] block {} at height {} immutable", self.chain, hash, next);
            let _ = self.tx_events.send(ChainEvent::BlockImmutable {
                chain: self.chain.clone(),
                hash,
                height: next,
            });
            self.tree.compact_up_to(next);
            // live roots: executed blocks plus the speculative slice trains
            // still forming on top of the tip
            let mut live: Vec<Hash> = self
                .tree
                .hashes_at_least(BlockStatus::Executed)
                .into_iter()
                .filter_map(|h| self.tree.get(&h).and_then(|e| e.commit))
                .collect();
            live.extend(
                self.tree
                    .slice_hashes()
                    .into_iter()
                    .filter_map(|h| self.tree.get_slice(&h).and_then(|e| e.commit)),
            );
            self.env.drop_unreachable(&live);
        }
    }

    /// Drops blocks that sat in MEMPOOL past the dependency TTL, and prunes
    /// stale fetch bookkeeping.
    fn expire_waiting(&mut self) {
        let now = Instant::now();
        let expired: Vec<Hash> = self
            .waiting_since
            .iter()
            .filter(|(_, since)| now.duration_since(**since) > FETCH_TTL)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in expired {
            self.waiting_since.remove(&hash);
            if let Some(entry) = self.tree.get(&hash) {
                if entry.status == BlockStatus::Mempool {
                    warn!(
                        target: LOG_TARGET,
                        "[{}] dropping block {} after dependency timeout", self.chain, hash
                    );
                    self.tree.remove_branch(&hash);
                }
            }
        }
        self.pending_fetch
            .retain(|_, since| now.duration_since(*since) <= FETCH_TTL);
        for missing in self.tree.orphaned_parents() {
            if !self.pending_fetch.contains_key(&missing) {
                self.tree.drop_orphans_waiting_on(&missing);
            }
        }
    }
}
