//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use bywise_chain::models::{Block, Slice, Transaction};
use bywise_common_types::Hash;
use serde::{Deserialize, Serialize};

/// Everything that travels over the gossip overlay. `new_*` announce items,
/// `find_*` ask peers to supply a missing item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    NewTx { tx: Box<Transaction> },
    NewSlice { slice: Box<Slice> },
    NewBlock { block: Box<Block> },
    FindTx { chain: String, hash: Hash },
    FindSlice { chain: String, hash: Hash },
    FindBlock { chain: String, hash: Hash },
}

impl GossipMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::NewTx { .. } => "new_tx",
            Self::NewSlice { .. } => "new_slice",
            Self::NewBlock { .. } => "new_block",
            Self::FindTx { .. } => "find_tx",
            Self::FindSlice { .. } => "find_slice",
            Self::FindBlock { .. } => "find_block",
        }
    }

    pub fn chain(&self) -> &str {
        match self {
            Self::NewTx { tx } => &tx.chain,
            Self::NewSlice { slice } => &slice.chain,
            Self::NewBlock { block } => &block.chain,
            Self::FindTx { chain, .. } | Self::FindSlice { chain, .. } | Self::FindBlock { chain, .. } => chain,
        }
    }

    pub fn item_hash(&self) -> Hash {
        match self {
            Self::NewTx { tx } => tx.hash,
            Self::NewSlice { slice } => slice.hash,
            Self::NewBlock { block } => block.hash,
            Self::FindTx { hash, .. } | Self::FindSlice { hash, .. } | Self::FindBlock { hash, .. } => *hash,
        }
    }

    /// Key for the at-most-once-per-peer forwarding cache.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.topic(), self.item_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tag_matches_topic() {
        let msg = GossipMessage::FindBlock {
            chain: "main".to_string(),
            hash: Hash::zero(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "find_block");
        assert_eq!(msg.topic(), "find_block");
        assert_eq!(msg.chain(), "main");
        let back: GossipMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
