//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

mod client;
mod messages;
mod node_info;
mod peer_registry;

pub use client::NodeClient;
pub use messages::GossipMessage;
pub use node_info::NodeInfo;
pub use peer_registry::{mint_token, ConnectedPeer, PeerLimits, PeerRegistry};
use thiserror::Error;

/// Peer I/O timeout; a peer that cannot answer within this window is dropped
/// from the active set but stays known for re-probe.
pub const PEER_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("peer returned status {0}")]
    Status(u16),
    #[error("connection limit reached")]
    ConnectionLimit,
    #[error("unknown peer token")]
    UnknownToken,
    #[error("malformed peer response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        NetworkError::Transport(e.to_string())
    }
}
