//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The peer book: known addresses vs authenticated connections.
//!
//! Multi-writer (HTTP handlers, discovery, gossip) behind a single lock;
//! every operation is short and lock-free I/O happens outside.

use std::collections::{HashMap, HashSet};

use bywise_common_types::Hash;
use log::*;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Mutex;

use crate::{NetworkError, NodeInfo};

const LOG_TARGET: &str = "bywise::p2p::peer_registry";

#[derive(Debug, Clone, Copy)]
pub struct PeerLimits {
    pub max_connections: usize,
    pub max_peers_to_ask: usize,
    pub max_peers_per_query: usize,
}

impl Default for PeerLimits {
    fn default() -> Self {
        Self {
            max_connections: 32,
            max_peers_to_ask: 3,
            max_peers_per_query: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedPeer {
    pub info: NodeInfo,
    /// Token we present when calling this peer.
    pub outbound_token: String,
    /// Token this peer presents when calling us.
    pub inbound_token: String,
}

#[derive(Default)]
struct RegistryInner {
    known: HashSet<String>,
    connected: HashMap<String, ConnectedPeer>,
    by_inbound_token: HashMap<String, String>,
}

pub struct PeerRegistry {
    limits: PeerLimits,
    inner: Mutex<RegistryInner>,
}

impl PeerRegistry {
    pub fn new(limits: PeerLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn limits(&self) -> PeerLimits {
        self.limits
    }

    /// Remembers a host for later probing. Idempotent.
    pub fn add_known(&self, host: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.known.insert(host.into());
    }

    /// Promotes a host to connected after a successful handshake.
    pub fn mark_connected(
        &self,
        info: NodeInfo,
        outbound_token: String,
        inbound_token: String,
    ) -> Result<(), NetworkError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let host = info.host.clone();
        if !inner.connected.contains_key(&host) && inner.connected.len() >= self.limits.max_connections {
            return Err(NetworkError::ConnectionLimit);
        }
        if let Some(previous) = inner.connected.get(&host) {
            let stale = previous.inbound_token.clone();
            inner.by_inbound_token.remove(&stale);
        }
        inner.known.insert(host.clone());
        inner.by_inbound_token.insert(inbound_token.clone(), host.clone());
        inner.connected.insert(host.clone(), ConnectedPeer {
            info,
            outbound_token,
            inbound_token,
        });
        info!(target: LOG_TARGET, "🤝 connected to {}", host);
        Ok(())
    }

    /// Drops the active connection but keeps the address known for re-probe.
    pub fn disconnect(&self, host: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(peer) = inner.connected.remove(host) {
            inner.by_inbound_token.remove(&peer.inbound_token);
            warn!(target: LOG_TARGET, "🔌 disconnected from {}", host);
        }
    }

    /// Resolves an inbound `Node <token>` header to the authenticated peer.
    pub fn peer_by_token(&self, token: &str) -> Option<ConnectedPeer> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let host = inner.by_inbound_token.get(token)?;
        inner.connected.get(host).cloned()
    }

    pub fn connected(&self) -> Vec<ConnectedPeer> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.connected.values().cloned().collect()
    }

    pub fn connected_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).connected.len()
    }

    pub fn known_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).known.len()
    }

    pub fn is_connected(&self, host: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connected
            .contains_key(host)
    }

    pub fn has_capacity(&self) -> bool {
        self.connected_count() < self.limits.max_connections
    }

    /// Random connected peers to ask during a discovery tick.
    pub fn peers_to_ask(&self) -> Vec<ConnectedPeer> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut peers: Vec<ConnectedPeer> = inner.connected.values().cloned().collect();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(self.limits.max_peers_to_ask);
        peers
    }

    /// Known hosts with no active connection.
    pub fn known_not_connected(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .known
            .iter()
            .filter(|host| !inner.connected.contains_key(*host))
            .cloned()
            .collect()
    }

    /// The bounded peer list served to a discovery query.
    pub fn advertised_peers(&self) -> Vec<NodeInfo> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .connected
            .values()
            .take(self.limits.max_peers_per_query)
            .map(|peer| {
                let mut info = peer.info.clone();
                info.token = None;
                info
            })
            .collect()
    }

    /// Drops connections whose advertisement expired.
    pub fn prune_expired(&self, now: u64) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<String> = inner
            .connected
            .iter()
            .filter(|(_, peer)| peer.info.is_expired(now))
            .map(|(host, _)| host.clone())
            .collect();
        for host in &expired {
            if let Some(peer) = inner.connected.remove(host) {
                inner.by_inbound_token.remove(&peer.inbound_token);
            }
        }
        expired.len()
    }

    /// Clears both the connected and the known sets.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.known.clear();
        inner.connected.clear();
        inner.by_inbound_token.clear();
        info!(target: LOG_TARGET, "peer registry reset");
    }
}

/// Mints an unguessable bearer token for a freshly handshaken peer.
pub fn mint_token(seed: &[u8], counter: u64) -> String {
    let digest: Hash = bywise_common_types::node_token_hasher()
        .chain_raw(seed)
        .chain(&counter)
        .chain(&rand::random::<u64>())
        .finalize();
    digest.to_hex()
}
