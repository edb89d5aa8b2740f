//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use bywise_common_types::Hash;

/// Lifecycle notifications published by the pipeline worker. Consumers
/// (statistics, tests, the minting loop) subscribe via a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    SliceAccepted {
        chain: String,
        hash: Hash,
    },
    BlockMined {
        chain: String,
        hash: Hash,
        height: u64,
    },
    BlockImmutable {
        chain: String,
        hash: Hash,
        height: u64,
    },
    BlockInvalid {
        chain: String,
        hash: Hash,
        reason: String,
    },
    Reorg {
        chain: String,
        from: Hash,
        to: Hash,
        ancestor: Hash,
    },
}
