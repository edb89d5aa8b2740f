//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Outbound gossip fan-out. Workers and HTTP handlers drop messages on the
//! handle; the service pushes each item at most once per peer (10k LRU) to
//! every connected peer serving the item's chain.

use std::sync::Arc;

use async_trait::async_trait;
use bywise_common_types::shutdown::ShutdownSignal;
use bywise_consensus::GossipOutbound;
use bywise_p2p::{GossipMessage, NodeClient, PeerRegistry};
use log::*;
use mini_moka::sync::Cache;
use tokio::{sync::mpsc, task::JoinHandle};

const LOG_TARGET: &str = "bywise::node::gossip";

const OUTBOUND_QUEUE: usize = 1024;
const DEDUP_CACHE_SIZE: u64 = 10_000;

#[derive(Clone)]
pub struct GossipHandle {
    tx: mpsc::Sender<GossipMessage>,
}

#[async_trait]
impl GossipOutbound for GossipHandle {
    async fn broadcast(&self, message: GossipMessage) {
        if self.tx.send(message).await.is_err() {
            warn!(target: LOG_TARGET, "gossip service is gone; dropping message");
        }
    }
}

pub struct GossipService {
    registry: Arc<PeerRegistry>,
    sent: Cache<String, ()>,
}

impl GossipService {
    pub fn spawn(registry: Arc<PeerRegistry>, shutdown: ShutdownSignal) -> (GossipHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let service = Self {
            registry,
            sent: Cache::new(DEDUP_CACHE_SIZE),
        };
        let join = tokio::spawn(service.run(rx, shutdown));
        (GossipHandle { tx }, join)
    }

    async fn run(self, mut rx: mpsc::Receiver<GossipMessage>, mut shutdown: ShutdownSignal) {
        info!(target: LOG_TARGET, "📣 gossip service started");
        loop {
            tokio::select! {
                _ = shutdown.wait() => return,
                maybe = rx.recv() => match maybe {
                    Some(message) => self.fan_out(message),
                    None => return,
                },
            }
        }
    }

    fn fan_out(&self, message: GossipMessage) {
        let chain = message.chain().to_string();
        let dedup = message.dedup_key();
        for peer in self.registry.connected() {
            if !peer.info.serves_chain(&chain) {
                continue;
            }
            let key = format!("{}|{dedup}", peer.info.host);
            if self.sent.contains_key(&key) {
                continue;
            }
            self.sent.insert(key, ());

            let registry = self.registry.clone();
            let message = message.clone();
            tokio::spawn(async move {
                let client = match NodeClient::new(&peer.info.host) {
                    Ok(client) => client.with_token(peer.outbound_token),
                    Err(e) => {
                        warn!(target: LOG_TARGET, "bad peer host {}: {}", peer.info.host, e);
                        return;
                    },
                };
                if let Err(e) = client.send_gossip(&message).await {
                    debug!(
                        target: LOG_TARGET,
                        "peer {} failed on {}: {}", peer.info.host, message.topic(), e
                    );
                    registry.disconnect(&peer.info.host);
                }
            });
        }
    }
}
