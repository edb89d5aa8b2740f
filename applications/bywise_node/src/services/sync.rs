//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Startup catch-up: pulls finalized block packs from connected peers,
//! back-fills their slices and transactions, and feeds everything to the
//! pipeline. Once caught up it keeps polling lazily as a safety net behind
//! regular gossip.

use std::time::Duration;

use bywise_common_types::shutdown::ShutdownSignal;
use bywise_p2p::NodeClient;
use log::*;
use tokio::{task::JoinHandle, time::sleep};

use crate::node::SharedContext;

const LOG_TARGET: &str = "bywise::node::sync";

/// Give discovery a head start before the first pull.
const INITIAL_DELAY: Duration = Duration::from_secs(2);
const SYNC_INTERVAL: Duration = Duration::from_secs(60);

pub struct SyncService {
    context: SharedContext,
}

impl SyncService {
    pub fn spawn(context: SharedContext, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(Self { context }.run(shutdown))
    }

    async fn run(self, mut shutdown: ShutdownSignal) {
        tokio::select! {
            _ = shutdown.wait() => return,
            _ = sleep(INITIAL_DELAY) => {},
        }
        loop {
            for chain in self.context.chain_names() {
                self.catch_up(&chain).await;
            }
            tokio::select! {
                _ = shutdown.wait() => return,
                _ = sleep(SYNC_INTERVAL) => {},
            }
        }
    }

    async fn catch_up(&self, chain: &str) {
        let Some(handles) = self.context.chain(chain) else { return };
        for peer in self.context.registry.connected() {
            if !peer.info.serves_chain(chain) {
                continue;
            }
            let Ok(client) = NodeClient::new(&peer.info.host) else { continue };
            let client = client.with_token(peer.outbound_token.clone());

            loop {
                let Some(tip) = handles.pipeline.tip().await else { return };
                let next = tip.height + 1;
                let pack = match client.block_pack(chain, next).await {
                    Ok(pack) => pack,
                    Err(e) => {
                        debug!(target: LOG_TARGET, "[{}] pack from {} failed: {}", chain, peer.info.host, e);
                        break;
                    },
                };
                if pack.is_empty() {
                    break;
                }
                info!(
                    target: LOG_TARGET,
                    "⬇️  [{}] pulling {} blocks from {} starting at {}",
                    chain,
                    pack.len(),
                    peer.info.host,
                    next
                );
                for block in pack {
                    self.backfill_block_parts(chain, &client, &block).await;
                    handles.pipeline.submit_block(block).await;
                }
                // let the pipeline chew before asking for the next window
                sleep(Duration::from_millis(250)).await;
            }
        }
    }

    async fn backfill_block_parts(
        &self,
        chain: &str,
        client: &NodeClient,
        block: &bywise_chain::models::Block,
    ) {
        let Some(handles) = self.context.chain(chain) else { return };
        for slice_hash in &block.slices {
            if handles.pipeline.slice(*slice_hash).await.is_some() {
                continue;
            }
            let slice = match client.slice_by_hash(slice_hash).await {
                Ok(Some(slice)) => slice,
                _ => continue,
            };
            for tx_hash in &slice.transactions {
                if handles.mempool.contains_transaction(tx_hash) {
                    continue;
                }
                if let Ok(Some(mut tx)) = client.transaction_by_hash(tx_hash).await {
                    tx.output = None;
                    // stale `created` stamps are fine here: the transaction
                    // is already sealed inside a finalized block
                    let _ = handles.mempool.add_transaction(tx.clone(), tx.created);
                }
            }
            handles.pipeline.submit_slice(slice).await;
        }
    }
}
