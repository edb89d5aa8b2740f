//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Peer discovery: probes seeds and remembered addresses, handshakes up to
//! the connection cap, and asks a few random connected peers for their peer
//! lists every tick. Failed peers drop to "known" and are re-probed later.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bywise_common_types::shutdown::ShutdownSignal;
use bywise_p2p::{mint_token, NodeClient};
use log::*;
use tokio::{task::JoinHandle, time::sleep};

use crate::node::{now_secs, SharedContext};

const LOG_TARGET: &str = "bywise::node::discovery";

pub struct DiscoveryService {
    context: SharedContext,
    token_counter: AtomicU64,
}

impl DiscoveryService {
    pub fn spawn(context: SharedContext, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let service = Self {
            context,
            token_counter: AtomicU64::new(0),
        };
        tokio::spawn(service.run(shutdown))
    }

    async fn run(self, mut shutdown: ShutdownSignal) {
        info!(target: LOG_TARGET, "🔭 discovery started");
        for seed in &self.context.config.nodes {
            self.context.registry.add_known(seed.clone());
        }
        loop {
            self.tick().await;
            tokio::select! {
                _ = shutdown.wait() => return,
                _ = sleep(self.context.config.discovery_interval) => {},
            }
        }
    }

    async fn tick(&self) {
        let registry = &self.context.registry;
        registry.prune_expired(now_secs());

        // probe remembered addresses while there is capacity
        for host in registry.known_not_connected() {
            if !registry.has_capacity() {
                break;
            }
            if host == self.context.config.advertised_host() {
                continue;
            }
            self.connect(&host).await;
        }

        // ask a few random peers who they know
        for peer in registry.peers_to_ask() {
            let client = match NodeClient::new(&peer.info.host) {
                Ok(client) => client.with_token(peer.outbound_token),
                Err(_) => continue,
            };
            match client.peers().await {
                Ok(peers) => {
                    for info in peers {
                        if info.host != self.context.config.advertised_host() {
                            registry.add_known(info.host);
                        }
                    }
                },
                Err(e) => {
                    debug!(target: LOG_TARGET, "peer list from {} failed: {}", peer.info.host, e);
                    registry.disconnect(&peer.info.host);
                },
            }
        }
    }

    async fn connect(&self, host: &str) {
        let Ok(client) = NodeClient::new(host) else {
            return;
        };
        let counter = self.token_counter.fetch_add(1, Ordering::Relaxed);
        let inbound_token = mint_token(&self.context.wallet.secret_bytes(), counter);
        let me = self.context.node_info(Some(inbound_token.clone()));
        match client.handshake(&me).await {
            Ok(mut their_info) => {
                let outbound_token = their_info.token.take().unwrap_or_default();
                if !their_info.chains.iter().any(|c| self.context.serves_chain(c)) {
                    debug!(target: LOG_TARGET, "{} serves none of our chains", host);
                    return;
                }
                if let Err(e) = self
                    .context
                    .registry
                    .mark_connected(their_info, outbound_token, inbound_token)
                {
                    debug!(target: LOG_TARGET, "cannot connect {}: {}", host, e);
                }
            },
            Err(e) => {
                debug!(target: LOG_TARGET, "handshake with {} failed: {}", host, e);
            },
        }
    }
}
