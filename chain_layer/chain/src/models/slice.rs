//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use bywise_common_types::{slice_hasher, verify_signature, Address, CryptoError, Hash, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A micro-batch of transactions emitted while a block is being assembled.
///
/// Slices from one proposer for one block height form a consecutive sequence
/// `0..=k`; the slice at `k` carries `end = true` when the block closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    pub chain: String,
    pub version: String,
    /// Sequence number within the forming block, starting at 0.
    pub height: u64,
    /// The height of the block being assembled.
    pub block_height: u64,
    pub transactions_count: u64,
    pub transactions: Vec<Hash>,
    pub from: Address,
    pub created: u64,
    pub end: bool,
    pub hash: Hash,
    pub sign: String,
}

#[derive(Debug, Error)]
pub enum SliceError {
    #[error("transactionsCount does not match transactions[]")]
    CountMismatch,
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },
    #[error("proposer signature: {0}")]
    BadSignature(#[from] CryptoError),
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(String),
}

impl Slice {
    #[allow(clippy::too_many_arguments)]
    pub fn new_signed(
        chain: impl Into<String>,
        height: u64,
        block_height: u64,
        transactions: Vec<Hash>,
        created: u64,
        end: bool,
        proposer: &KeyPair,
    ) -> Self {
        let mut slice = Self {
            chain: chain.into(),
            version: super::WIRE_VERSION.to_string(),
            height,
            block_height,
            transactions_count: transactions.len() as u64,
            transactions,
            from: proposer.address(),
            created,
            end,
            hash: Hash::zero(),
            sign: String::new(),
        };
        slice.hash = slice.compute_hash();
        slice.sign = proposer.sign_hash(&slice.hash);
        slice
    }

    pub fn compute_hash(&self) -> Hash {
        slice_hasher()
            .chain(&self.chain)
            .chain(&self.version)
            .chain(&self.height)
            .chain(&self.block_height)
            .chain(&self.transactions_count)
            .chain(&self.transactions)
            .chain(&self.from)
            .chain(&self.created)
            .chain(&self.end)
            .finalize()
    }

    pub fn validate(&self) -> Result<(), SliceError> {
        if self.version != super::WIRE_VERSION {
            return Err(SliceError::UnsupportedVersion(self.version.clone()));
        }
        if self.transactions_count != self.transactions.len() as u64 {
            return Err(SliceError::CountMismatch);
        }
        let expected = self.compute_hash();
        if expected != self.hash {
            return Err(SliceError::HashMismatch {
                expected,
                actual: self.hash,
            });
        }
        verify_signature(&self.from, &self.hash, &self.sign)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_slice_validates() {
        let proposer = KeyPair::from_seed("slice-proposer");
        let slice = Slice::new_signed(
            "main",
            0,
            1,
            vec![Hash::from_bytes([1u8; 32])],
            1_700_000_000,
            false,
            &proposer,
        );
        slice.validate().unwrap();
        assert_eq!(slice.transactions_count, 1);
    }

    #[test]
    fn tampering_breaks_validation() {
        let proposer = KeyPair::from_seed("slice-proposer");
        let mut slice = Slice::new_signed("main", 0, 1, vec![], 1_700_000_000, true, &proposer);
        slice.end = false;
        assert!(matches!(
            slice.validate(),
            Err(SliceError::HashMismatch { .. })
        ));
    }

    #[test]
    fn serde_round_trip_is_identity_on_hash() {
        let proposer = KeyPair::from_seed("slice-proposer");
        let slice = Slice::new_signed("main", 2, 5, vec![], 1_700_000_000, true, &proposer);
        let back: Slice = serde_json::from_str(&serde_json::to_string(&slice).unwrap()).unwrap();
        assert_eq!(back.hash, slice.hash);
        back.validate().unwrap();
    }
}
