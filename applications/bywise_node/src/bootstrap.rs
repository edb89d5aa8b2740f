//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Wires the node together: storage, per-chain pipelines and minting loops,
//! gossip, discovery, sync and the HTTP API.

use std::{collections::HashMap, fs, sync::Arc, time::Instant};

use anyhow::Context as _;
use bywise_chain::{
    mempool::Mempool,
    models::BlockStatus,
    storage::{ChainStores, KvStore, MemoryKvStore},
    BlockTree,
};
use bywise_common_types::{shutdown::Shutdown, KeyPair};
use bywise_consensus::{MintingConfig, MintingWorker, PipelineWorker};
use bywise_engine::{pool::VmPool, EnvironmentStore, TransactionExecutor};
use bywise_p2p::{PeerLimits, PeerRegistry};
use bywise_storage_redb::RedbKvStore;
use log::*;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    config::ApplicationConfig,
    genesis::ChainFile,
    http,
    node::{AppContext, ChainHandles, SharedContext},
    services::{discovery::DiscoveryService, gossip::GossipService, sync::SyncService},
};

const LOG_TARGET: &str = "bywise::node::bootstrap";

const EVENT_CHANNEL_SIZE: usize = 1024;

pub async fn spawn_services(
    config: ApplicationConfig,
    wallet: Arc<KeyPair>,
    shutdown: Arc<Shutdown>,
) -> anyhow::Result<SharedContext> {
    let store: Arc<dyn KvStore> = if config.debug {
        info!(target: LOG_TARGET, "running with an ephemeral in-memory store");
        Arc::new(MemoryKvStore::new())
    } else {
        fs::create_dir_all(&config.data_dir).context("creating data dir")?;
        Arc::new(RedbKvStore::open(config.data_dir.join("bywise.redb"))?)
    };
    let stores = ChainStores::new(store);
    let registry = Arc::new(PeerRegistry::new(PeerLimits::default()));
    let (gossip, _gossip_join) = GossipService::spawn(registry.clone(), shutdown.to_signal());

    let mut chains = HashMap::new();
    for path in &config.chains {
        let file = ChainFile::load(path)?;
        let name = file.name.clone();
        let handles = setup_chain(file, &stores, &gossip, &wallet, &shutdown).await?;
        info!(target: LOG_TARGET, "⛓️  serving chain {}", name);
        chains.insert(name, handles);
    }

    let context: SharedContext = Arc::new(AppContext {
        config,
        wallet,
        chains,
        stores,
        registry,
        gossip,
        started_at: Instant::now(),
    });

    DiscoveryService::spawn(context.clone(), shutdown.to_signal());
    SyncService::spawn(context.clone(), shutdown.to_signal());

    let http_context = context.clone();
    let http_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = http::run_http_server(http_context, http_shutdown.to_signal()).await {
            error!(target: LOG_TARGET, "💥 HTTP server failed: {}", e);
            http_shutdown.trigger();
        }
    });

    Ok(context)
}

async fn setup_chain(
    file: ChainFile,
    stores: &ChainStores,
    gossip: &crate::services::gossip::GossipHandle,
    wallet: &Arc<KeyPair>,
    shutdown: &Arc<Shutdown>,
) -> anyhow::Result<ChainHandles> {
    let chain = file.name.clone();
    stores.chain_info.save_genesis(&file.block)?;

    let env = Arc::new(EnvironmentStore::new(chain.clone(), stores.env.clone())?);
    let executor = TransactionExecutor::new(env.clone(), VmPool::default());
    let mempool = Arc::new(Mempool::new(chain.clone()));
    let mut tree = BlockTree::new(file.block.clone())?;

    // resume from the persisted canonical chain; anything past the immutable
    // tip was in memory only and comes back from peers
    let mut immutable_height = None;
    let fresh = stores.chain_info.immutable_tip(&chain)?.is_none();
    if !fresh {
        tree.set_minted(file.block.hash)?;
        tree.set_status(&file.block.hash, BlockStatus::Immutable)?;
        let mut last = (0u64, file.block.hash);
        for block in stores.blocks.pack(&chain, 1, usize::MAX)? {
            let (hash, height) = (block.hash, block.height);
            tree.add_block(block)?;
            tree.set_minted(hash)?;
            tree.set_status(&hash, BlockStatus::Immutable)?;
            last = (height, hash);
        }
        tree.set_commit(&last.1, env.consolidated_tip())?;
        immutable_height = Some(last.0);
        info!(
            target: LOG_TARGET,
            "[{}] resumed at immutable height {}", chain, last.0
        );
    } else {
        for tx in &file.transactions {
            // admitted with their own stamp so an old chain file still loads
            mempool
                .add_transaction(tx.clone(), tx.created)
                .map_err(|e| anyhow::anyhow!("genesis tx: {e}"))?;
        }
    }

    let (tx_events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
    let (pipeline, pipeline_join) = PipelineWorker::spawn(
        tree,
        env,
        executor,
        mempool.clone(),
        stores.clone(),
        gossip.clone(),
        tx_events,
        immutable_height,
        shutdown.to_signal(),
    );
    watch_pipeline(&chain, pipeline_join, shutdown.clone());

    if fresh {
        for slice in file.slices {
            pipeline.submit_slice(slice).await;
        }
    }

    MintingWorker::spawn(
        chain,
        wallet.clone(),
        mempool.clone(),
        pipeline.clone(),
        gossip.clone(),
        MintingConfig::default(),
        shutdown.to_signal(),
    );

    Ok(ChainHandles { pipeline, mempool })
}

/// A pipeline death is fatal for the whole process: log and shut down so the
/// operator restarts and the node resyncs.
fn watch_pipeline(
    chain: &str,
    join: JoinHandle<Result<(), bywise_consensus::PipelineError>>,
    shutdown: Arc<Shutdown>,
) {
    let chain = chain.to_string();
    tokio::spawn(async move {
        match join.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                error!(target: LOG_TARGET, "💥 [{}] pipeline failed: {}", chain, e);
                shutdown.trigger();
            },
            Err(e) => {
                error!(target: LOG_TARGET, "💥 [{}] pipeline panicked: {}", chain, e);
                shutdown.trigger();
            },
        }
    });
}
