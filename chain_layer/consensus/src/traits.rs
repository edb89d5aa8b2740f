//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use async_trait::async_trait;
use bywise_p2p::GossipMessage;

/// Outbound side of the gossip overlay, implemented by the node's gossip
/// service. Workers fire and forget; delivery failures are the service's
/// problem (logged, peer dropped, retried at the next tick).
#[async_trait]
pub trait GossipOutbound: Send + Sync + 'static {
    async fn broadcast(&self, message: GossipMessage);
}

/// No-op outbound for tests and single-node runs.
#[derive(Debug, Clone, Default)]
pub struct NullGossip;

#[async_trait]
impl GossipOutbound for NullGossip {
    async fn broadcast(&self, _message: GossipMessage) {}
}
