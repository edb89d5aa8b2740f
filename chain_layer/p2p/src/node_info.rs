//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use bywise_common_types::Address;
use serde::{Deserialize, Serialize};

/// What a node advertises about itself during handshake and discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// The node wallet address.
    pub address: Address,
    /// Reachable base URL, e.g. `http://10.0.0.5:8080`.
    pub host: String,
    pub version: String,
    /// Chains this node serves.
    pub chains: Vec<String>,
    /// Bearer token the *receiver* of this info may use when calling back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Unix seconds after which the advertisement (and token) is stale.
    pub expire: u64,
}

impl NodeInfo {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expire
    }

    pub fn serves_chain(&self, chain: &str) -> bool {
        self.chains.iter().any(|c| c == chain)
    }
}

#[cfg(test)]
mod tests {
    use bywise_common_types::KeyPair;

    use super::*;

    #[test]
    fn expiry_and_chain_checks() {
        let info = NodeInfo {
            address: KeyPair::from_seed("node-info").address(),
            host: "http://127.0.0.1:8080".to_string(),
            version: "2".to_string(),
            chains: vec!["main".to_string()],
            token: None,
            expire: 1000,
        };
        assert!(!info.is_expired(999));
        assert!(info.is_expired(1000));
        assert!(info.serves_chain("main"));
        assert!(!info.serves_chain("other"));
    }
}
