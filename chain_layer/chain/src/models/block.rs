//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use bywise_common_types::{block_hasher, verify_signature, Address, CryptoError, Hash, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a block inside the per-chain pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStatus {
    /// Known, but slices/transactions may still be missing.
    Mempool,
    /// All referenced slices and transactions are locally materialized.
    Complete,
    /// State changes applied to an environment overlay.
    Executed,
    /// Canonical at its height.
    Mined,
    /// Beyond the reorg window; consolidated and compacted.
    Immutable,
    /// Failed validation or execution; dropped from the canonical path.
    Invalid,
}

impl BlockStatus {
    fn rank(self) -> Option<u8> {
        match self {
            Self::Mempool => Some(0),
            Self::Complete => Some(1),
            Self::Executed => Some(2),
            Self::Mined => Some(3),
            Self::Immutable => Some(4),
            Self::Invalid => None,
        }
    }

    /// True when this status has progressed at least as far as `other`.
    /// `Invalid` compares as never-at-least.
    pub fn at_least(self, other: Self) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub chain: String,
    pub version: String,
    pub height: u64,
    pub slices: Vec<Hash>,
    pub from: Address,
    pub created: u64,
    /// Parent block hash; `Hash::zero()` for genesis.
    pub last_hash: Hash,
    pub transactions_count: u64,
    #[serde(rename = "externalTxID", default)]
    pub external_tx_id: Vec<String>,
    pub hash: Hash,
    pub sign: String,
}

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },
    #[error("proposer signature: {0}")]
    BadSignature(#[from] CryptoError),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(String),
    #[error("genesis block must have a zero parent")]
    NonZeroGenesisParent,
}

impl Block {
    #[allow(clippy::too_many_arguments)]
    pub fn new_signed(
        chain: impl Into<String>,
        height: u64,
        slices: Vec<Hash>,
        created: u64,
        last_hash: Hash,
        transactions_count: u64,
        proposer: &KeyPair,
    ) -> Self {
        let mut block = Self {
            chain: chain.into(),
            version: super::WIRE_VERSION.to_string(),
            height,
            slices,
            from: proposer.address(),
            created,
            last_hash,
            transactions_count,
            external_tx_id: Vec::new(),
            hash: Hash::zero(),
            sign: String::new(),
        };
        block.hash = block.compute_hash();
        block.sign = proposer.sign_hash(&block.hash);
        block
    }

    pub fn compute_hash(&self) -> Hash {
        block_hasher()
            .chain(&self.chain)
            .chain(&self.version)
            .chain(&self.height)
            .chain(&self.slices)
            .chain(&self.from)
            .chain(&self.created)
            .chain(&self.last_hash)
            .chain(&self.transactions_count)
            .chain(&self.external_tx_id)
            .finalize()
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    pub fn validate(&self) -> Result<(), BlockError> {
        if self.version != super::WIRE_VERSION {
            return Err(BlockError::UnsupportedVersion(self.version.clone()));
        }
        if self.is_genesis() && !self.last_hash.is_zero() {
            return Err(BlockError::NonZeroGenesisParent);
        }
        let expected = self.compute_hash();
        if expected != self.hash {
            return Err(BlockError::HashMismatch {
                expected,
                actual: self.hash,
            });
        }
        verify_signature(&self.from, &self.hash, &self.sign)?;
        Ok(())
    }
}
