//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The typed request/response seam between the pipeline worker (the single
//! writer of a chain's tree and environment) and everything that wants to
//! read it: the HTTP surface, the minting loop, statistics.

use bywise_chain::models::{Block, BlockStatus, Slice, Transaction, TransactionOutput};
use bywise_common_types::{Address, Hash};
use bywise_engine::{config::ChainParams, executor::WalletInfo};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipInfo {
    pub hash: Hash,
    pub height: u64,
    pub created: u64,
}

#[derive(Debug, Clone)]
pub struct WalletSnapshot {
    pub balance: String,
    pub info: WalletInfo,
}

pub enum PipelineRequest {
    GetTip(oneshot::Sender<TipInfo>),
    GetParams(oneshot::Sender<ChainParams>),
    GetValidators(oneshot::Sender<Vec<Address>>),
    GetBestSlice {
        proposer: Address,
        block_height: u64,
        reply: oneshot::Sender<Vec<Slice>>,
    },
    GetSliceProposers {
        block_height: u64,
        reply: oneshot::Sender<Vec<Address>>,
    },
    GetBlock {
        hash: Hash,
        reply: oneshot::Sender<Option<(Block, BlockStatus)>>,
    },
    GetSlice {
        hash: Hash,
        reply: oneshot::Sender<Option<Slice>>,
    },
    GetWallet {
        address: Address,
        reply: oneshot::Sender<Option<WalletSnapshot>>,
    },
    Simulate {
        tx: Box<Transaction>,
        simulate_wallet: bool,
        reply: oneshot::Sender<Result<TransactionOutput, String>>,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineHandle {
    requests: mpsc::Sender<PipelineRequest>,
    blocks: mpsc::Sender<Block>,
    slices: mpsc::Sender<Slice>,
}

impl PipelineHandle {
    pub(crate) fn new(
        requests: mpsc::Sender<PipelineRequest>,
        blocks: mpsc::Sender<Block>,
        slices: mpsc::Sender<Slice>,
    ) -> Self {
        Self {
            requests,
            blocks,
            slices,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PipelineRequest,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(build(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn tip(&self) -> Option<TipInfo> {
        self.request(PipelineRequest::GetTip).await
    }

    pub async fn params(&self) -> Option<ChainParams> {
        self.request(PipelineRequest::GetParams).await
    }

    pub async fn validators(&self) -> Vec<Address> {
        self.request(PipelineRequest::GetValidators).await.unwrap_or_default()
    }

    /// The longest materialized slice train for a proposer at a block height.
    pub async fn best_slice(&self, proposer: Address, block_height: u64) -> Vec<Slice> {
        self.request(|reply| PipelineRequest::GetBestSlice {
            proposer,
            block_height,
            reply,
        })
        .await
        .unwrap_or_default()
    }

    pub async fn slice_proposers(&self, block_height: u64) -> Vec<Address> {
        self.request(|reply| PipelineRequest::GetSliceProposers { block_height, reply })
            .await
            .unwrap_or_default()
    }

    pub async fn block(&self, hash: Hash) -> Option<(Block, BlockStatus)> {
        self.request(|reply| PipelineRequest::GetBlock { hash, reply })
            .await
            .flatten()
    }

    pub async fn slice(&self, hash: Hash) -> Option<Slice> {
        self.request(|reply| PipelineRequest::GetSlice { hash, reply })
            .await
            .flatten()
    }

    pub async fn wallet(&self, address: Address) -> Option<WalletSnapshot> {
        self.request(|reply| PipelineRequest::GetWallet { address, reply })
            .await
            .flatten()
    }

    pub async fn simulate(&self, tx: Transaction, simulate_wallet: bool) -> Result<TransactionOutput, String> {
        self.request(|reply| PipelineRequest::Simulate {
            tx: Box::new(tx),
            simulate_wallet,
            reply,
        })
        .await
        .unwrap_or_else(|| Err("pipeline unavailable".to_string()))
    }

    pub async fn submit_block(&self, block: Block) -> bool {
        self.blocks.send(block).await.is_ok()
    }

    pub async fn submit_slice(&self, slice: Slice) -> bool {
        self.slices.send(slice).await.is_ok()
    }
}
