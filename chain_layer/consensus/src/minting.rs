//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The validator's minting loop: waits out the block interval, decides
//! whether the local wallet is the preferred proposer for the next height by
//! the address-distance rule, emits signed slices as the mempool fills, and
//! closes the block with an `end = true` slice once the train is done.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bywise_chain::{
    distance,
    mempool::Mempool,
    models::{Block, Slice},
};
use bywise_common_types::{shutdown::ShutdownSignal, Hash, KeyPair};
use bywise_p2p::GossipMessage;
use log::*;
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    handle::{PipelineHandle, TipInfo},
    traits::GossipOutbound,
};

const LOG_TARGET: &str = "bywise::consensus::minting";

#[derive(Debug, Clone)]
pub struct MintingConfig {
    /// Cadence of slice emission while a block is forming.
    pub slice_interval: Duration,
    pub max_txs_per_slice: usize,
    pub max_txs_per_block: usize,
}

impl Default for MintingConfig {
    fn default() -> Self {
        Self {
            slice_interval: Duration::from_secs(1),
            max_txs_per_slice: 200,
            max_txs_per_block: 1000,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct MintingWorker<TGossip> {
    chain: String,
    keypair: Arc<KeyPair>,
    mempool: Arc<Mempool>,
    pipeline: PipelineHandle,
    gossip: TGossip,
    config: MintingConfig,
    open_height: Option<u64>,
    next_slice_height: u64,
    train_tx_total: usize,
    packaged: HashSet<Hash>,
    emitted_end: bool,
    closed: bool,
}

impl<TGossip: GossipOutbound> MintingWorker<TGossip> {
    pub fn spawn(
        chain: String,
        keypair: Arc<KeyPair>,
        mempool: Arc<Mempool>,
        pipeline: PipelineHandle,
        gossip: TGossip,
        config: MintingConfig,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let worker = Self {
            chain,
            keypair,
            mempool,
            pipeline,
            gossip,
            config,
            open_height: None,
            next_slice_height: 0,
            train_tx_total: 0,
            packaged: HashSet::new(),
            emitted_end: false,
            closed: false,
        };
        tokio::spawn(worker.run(shutdown))
    }

    async fn run(mut self, mut shutdown: ShutdownSignal) {
        info!(target: LOG_TARGET, "⚒️  [{}] minting loop started", self.chain);
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!(target: LOG_TARGET, "[{}] minting loop shutting down", self.chain);
                    return;
                },
                _ = sleep(self.config.slice_interval) => {},
            }
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let Some(tip) = self.pipeline.tip().await else { return };
        let Some(params) = self.pipeline.params().await else { return };
        let me = self.keypair.address();

        let validators = self.pipeline.validators().await;
        if !validators.iter().any(|v| v == &me) {
            return;
        }

        let now = now_secs();
        if now < tip.created + params.block_time_secs {
            return;
        }
        let height = tip.height + 1;
        if self.open_height != Some(height) {
            self.open_height = Some(height);
            self.next_slice_height = 0;
            self.train_tx_total = 0;
            self.packaged.clear();
            self.emitted_end = false;
            self.closed = false;
            debug!(target: LOG_TARGET, "[{}] opened block at height {}", self.chain, height);
        }
        if self.closed {
            return;
        }
        if self.emitted_end {
            self.try_close(&tip, height).await;
            return;
        }

        // deterministic leader preference at this parent hash; fall back
        // after two block intervals so a silent leader cannot stall the chain
        let best = validators
            .iter()
            .fold(None, |acc: Option<&bywise_common_types::Address>, v| match acc {
                None => Some(v),
                Some(current) => Some(distance::compare_addresses(&tip.hash, current, v)),
            });
        let is_best = best.map(|b| *b == me).unwrap_or(false);
        let overdue = now >= tip.created + 2 * params.block_time_secs;
        if !is_best && !overdue {
            return;
        }

        let txs: Vec<_> = self
            .mempool
            .take_for_slice(self.config.max_txs_per_slice, now)
            .into_iter()
            .filter(|tx| !self.packaged.contains(&tx.hash))
            .collect();

        let rivals = self
            .pipeline
            .slice_proposers(height)
            .await
            .into_iter()
            .filter(|p| p != &me)
            .count();
        let alone_long_enough =
            rivals == 0 && now >= tip.created + params.block_time_secs + params.block_time_secs / 2;
        let full = self.train_tx_total + txs.len() >= self.config.max_txs_per_block;
        let end = alone_long_enough || full;

        if txs.is_empty() && !end {
            return;
        }

        let tx_hashes: Vec<Hash> = txs.iter().map(|tx| tx.hash).collect();
        let slice = Slice::new_signed(
            self.chain.clone(),
            self.next_slice_height,
            height,
            tx_hashes,
            now,
            end,
            &self.keypair,
        );
        info!(
            target: LOG_TARGET,
            "🍕 [{}] slice {} for height {} ({} txs{})",
            self.chain,
            slice.height,
            height,
            slice.transactions_count,
            if end { ", end" } else { "" }
        );
        for tx in &txs {
            self.packaged.insert(tx.hash);
        }
        self.train_tx_total += txs.len();
        self.next_slice_height += 1;
        self.emitted_end = end;
        self.pipeline.submit_slice(slice.clone()).await;
        self.gossip
            .broadcast(GossipMessage::NewSlice {
                slice: Box::new(slice),
            })
            .await;
        if end {
            self.try_close(&tip, height).await;
        }
    }

    /// Assembles the block from the tree's best train for this proposer.
    /// Retried every tick until the train is fully materialized.
    async fn try_close(&mut self, tip: &TipInfo, height: u64) {
        let me = self.keypair.address();
        let train = self.pipeline.best_slice(me, height).await;
        let Some(last) = train.last() else { return };
        if !last.end {
            return;
        }
        let slices: Vec<Hash> = train.iter().map(|s| s.hash).collect();
        let tx_count: u64 = train.iter().map(|s| s.transactions_count).sum();
        let block = Block::new_signed(
            self.chain.clone(),
            height,
            slices,
            now_secs(),
            tip.hash,
            tx_count,
            &self.keypair,
        );
        info!(
            target: LOG_TARGET,
            "📦 [{}] closed block {} at height {} ({} slices, {} txs)",
            self.chain,
            block.hash,
            height,
            train.len(),
            tx_count
        );
        self.closed = true;
        self.pipeline.submit_block(block.clone()).await;
        self.gossip
            .broadcast(GossipMessage::NewBlock {
                block: Box::new(block),
            })
            .await;
    }
}
