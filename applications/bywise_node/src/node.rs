//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use bywise_chain::{mempool::Mempool, models::WIRE_VERSION, storage::ChainStores};
use bywise_common_types::KeyPair;
use bywise_consensus::PipelineHandle;
use bywise_p2p::{NodeInfo, PeerRegistry};

use crate::{config::ApplicationConfig, services::gossip::GossipHandle};

/// Advertisements (and the tokens they carry) are refreshed well before this.
const ADVERTISEMENT_TTL_SECS: u64 = 3600;

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct ChainHandles {
    pub pipeline: PipelineHandle,
    pub mempool: Arc<Mempool>,
}

/// Everything the HTTP surface and the background services share.
pub struct AppContext {
    pub config: ApplicationConfig,
    pub wallet: Arc<KeyPair>,
    pub chains: HashMap<String, ChainHandles>,
    pub stores: ChainStores,
    pub registry: Arc<PeerRegistry>,
    pub gossip: GossipHandle,
    pub started_at: Instant,
}

pub type SharedContext = Arc<AppContext>;

impl AppContext {
    pub fn chain(&self, name: &str) -> Option<&ChainHandles> {
        self.chains.get(name)
    }

    pub fn serves_chain(&self, name: &str) -> bool {
        self.chains.contains_key(name)
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    /// This node's advertisement, optionally carrying a token minted for the
    /// receiving peer.
    pub fn node_info(&self, token: Option<String>) -> NodeInfo {
        NodeInfo {
            address: self.wallet.address(),
            host: self.config.advertised_host(),
            version: WIRE_VERSION.to_string(),
            chains: self.chain_names(),
            token,
            expire: now_secs() + ADVERTISEMENT_TTL_SECS,
        }
    }
}
