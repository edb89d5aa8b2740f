//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use bigdecimal::{BigDecimal, Zero};
use bywise_common_types::{parse_amount, tx_hasher, verify_signature, Address, CryptoError, Hash, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "COMMAND")]
    Command,
    #[serde(rename = "CONTRACT")]
    Contract,
    #[serde(rename = "CONTRACT_EXE")]
    ContractExe,
    #[serde(rename = "BLOCKCHAIN_COMMAND")]
    BlockchainCommand,
}

/// One method invocation of a `CONTRACT_EXE` transaction. The target contract
/// is the `to` entry at the same index as the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub method: String,
    pub inputs: Vec<String>,
}

/// The typed payload of a transaction. Exactly one variant is valid for each
/// `TransactionType`; `validate_structure` enforces the pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransactionData {
    None,
    Command { name: String, input: Vec<String> },
    Contract { code: String },
    ContractExe { calls: Vec<ContractCall> },
    BlockchainCommand { name: String, input: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    pub key: String,
    pub value: String,
}

/// An event emitted by a contract during execution, indexed by the event
/// repository under (contract, event) and (contract, event, key, value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub contract: Address,
    pub name: String,
    pub entries: Vec<EventEntry>,
    pub tx_hash: Hash,
    pub block_height: u64,
}

/// Execution result attached to a transaction after it ran (or failed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutput {
    pub cost: u64,
    pub fee_used: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ContractEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Commit hash of the environment overlay that captured this execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub chain: String,
    pub version: String,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub amount: Vec<String>,
    pub fee: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    pub data: TransactionData,
    pub created: u64,
    pub hash: Hash,
    pub sign: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TransactionOutput>,
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("from/to/amount/sign arity mismatch")]
    ArityMismatch,
    #[error("transaction has no sender")]
    Empty,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid fee: {0}")]
    InvalidFee(String),
    #[error("data does not match transaction type")]
    DataTypeMismatch,
    #[error("contract call arity does not match to[]")]
    CallArityMismatch,
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },
    #[error("signature {index}: {source}")]
    BadSignature { index: usize, source: CryptoError },
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(String),
}

impl Transaction {
    /// Digest over the canonical encoding of every field except `hash`,
    /// `sign` and `output`.
    pub fn compute_hash(&self) -> Hash {
        tx_hasher()
            .chain(&self.chain)
            .chain(&self.version)
            .chain(&self.from)
            .chain(&self.to)
            .chain(&self.amount)
            .chain(&self.fee)
            .chain(&self.tx_type)
            .chain(&self.foreign_keys)
            .chain(&self.data)
            .chain(&self.created)
            .finalize()
    }

    /// The byte size of the canonical encoding, used by the fee formula.
    pub fn canonical_size(&self) -> usize {
        let mut size = 0usize;
        size += serde_json::to_vec(&self.chain).map(|v| v.len()).unwrap_or(0);
        size += serde_json::to_vec(&self.from).map(|v| v.len()).unwrap_or(0);
        size += serde_json::to_vec(&self.to).map(|v| v.len()).unwrap_or(0);
        size += serde_json::to_vec(&self.amount).map(|v| v.len()).unwrap_or(0);
        size += serde_json::to_vec(&self.foreign_keys).map(|v| v.len()).unwrap_or(0);
        size += serde_json::to_vec(&self.data).map(|v| v.len()).unwrap_or(0);
        size
    }

    pub fn sum_amounts(&self) -> Result<BigDecimal, TransactionError> {
        let mut total = BigDecimal::zero();
        for a in &self.amount {
            total += parse_amount(a).map_err(|_| TransactionError::InvalidAmount(a.clone()))?;
        }
        Ok(total)
    }

    pub fn fee_amount(&self) -> Result<BigDecimal, TransactionError> {
        parse_amount(&self.fee).map_err(|_| TransactionError::InvalidFee(self.fee.clone()))
    }

    /// Structural checks: arity, amounts, data/type pairing. Does not touch
    /// signatures or the hash.
    pub fn validate_structure(&self) -> Result<(), TransactionError> {
        if self.version != super::WIRE_VERSION {
            return Err(TransactionError::UnsupportedVersion(self.version.clone()));
        }
        if self.from.is_empty() {
            return Err(TransactionError::Empty);
        }
        if self.from.len() != self.sign.len()
            || self.to.len() != self.amount.len()
            || self.from.len() != self.to.len()
        {
            return Err(TransactionError::ArityMismatch);
        }
        self.sum_amounts()?;
        self.fee_amount()?;
        match (&self.tx_type, &self.data) {
            (TransactionType::None, TransactionData::None) => {},
            (TransactionType::Command, TransactionData::Command { .. }) => {},
            (TransactionType::Contract, TransactionData::Contract { .. }) => {},
            (TransactionType::ContractExe, TransactionData::ContractExe { calls }) => {
                if calls.len() != self.to.len() {
                    return Err(TransactionError::CallArityMismatch);
                }
            },
            (TransactionType::BlockchainCommand, TransactionData::BlockchainCommand { .. }) => {},
            _ => return Err(TransactionError::DataTypeMismatch),
        }
        Ok(())
    }

    /// Full ingress validation: structure, hash integrity and one signature
    /// per sender over the hash.
    pub fn validate(&self) -> Result<(), TransactionError> {
        self.validate_structure()?;
        let expected = self.compute_hash();
        if expected != self.hash {
            return Err(TransactionError::HashMismatch {
                expected,
                actual: self.hash,
            });
        }
        for (index, (from, sign)) in self.from.iter().zip(&self.sign).enumerate() {
            verify_signature(from, &self.hash, sign)
                .map_err(|source| TransactionError::BadSignature { index, source })?;
        }
        Ok(())
    }

    pub fn is_expired(&self, now: u64, ttl_secs: u64) -> bool {
        now >= self.created.saturating_add(ttl_secs)
    }

    pub fn builder(chain: impl Into<String>) -> TransactionBuilder {
        TransactionBuilder::new(chain)
    }
}

/// Builds and signs transactions locally (validators, genesis, tests).
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    chain: String,
    to: Vec<Address>,
    amount: Vec<String>,
    fee: String,
    tx_type: TransactionType,
    foreign_keys: Vec<String>,
    data: TransactionData,
    created: u64,
}

impl TransactionBuilder {
    pub fn new(chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            to: Vec::new(),
            amount: Vec::new(),
            fee: "0".to_string(),
            tx_type: TransactionType::None,
            foreign_keys: Vec::new(),
            data: TransactionData::None,
            created: 0,
        }
    }

    pub fn transfer(mut self, to: Address, amount: impl Into<String>) -> Self {
        self.to.push(to);
        self.amount.push(amount.into());
        self
    }

    pub fn with_fee(mut self, fee: impl Into<String>) -> Self {
        self.fee = fee.into();
        self
    }

    pub fn with_foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_keys.push(key.into());
        self
    }

    pub fn with_created(mut self, created: u64) -> Self {
        self.created = created;
        self
    }

    pub fn command(mut self, name: impl Into<String>, input: Vec<String>) -> Self {
        self.tx_type = TransactionType::Command;
        self.data = TransactionData::Command {
            name: name.into(),
            input,
        };
        self
    }

    pub fn blockchain_command(mut self, name: impl Into<String>, input: Vec<String>) -> Self {
        self.tx_type = TransactionType::BlockchainCommand;
        self.data = TransactionData::BlockchainCommand {
            name: name.into(),
            input,
        };
        self
    }

    pub fn deploy_contract(mut self, address: Address, code: impl Into<String>) -> Self {
        self.tx_type = TransactionType::Contract;
        self.to.push(address);
        self.amount.push("0".to_string());
        self.data = TransactionData::Contract { code: code.into() };
        self
    }

    pub fn call_contract(
        mut self,
        contract: Address,
        method: impl Into<String>,
        inputs: Vec<String>,
        amount: impl Into<String>,
    ) -> Self {
        self.tx_type = TransactionType::ContractExe;
        self.to.push(contract);
        self.amount.push(amount.into());
        if !matches!(self.data, TransactionData::ContractExe { .. }) {
            self.data = TransactionData::ContractExe { calls: Vec::new() };
        }
        if let TransactionData::ContractExe { calls } = &mut self.data {
            calls.push(ContractCall {
                method: method.into(),
                inputs,
            });
        }
        self
    }

    /// Signs with each keypair in order; the senders become `from[]`. For
    /// command/deploy shapes with an empty `to`, the sender is mirrored into
    /// `to` so the arity invariant holds.
    pub fn build_signed(self, signers: &[&KeyPair]) -> Transaction {
        let from: Vec<Address> = signers.iter().map(|k| k.address()).collect();
        let mut to = self.to;
        let mut amount = self.amount;
        while to.len() < from.len() {
            to.push(from[to.len()].clone());
            amount.push("0".to_string());
        }
        let mut tx = Transaction {
            chain: self.chain,
            version: super::WIRE_VERSION.to_string(),
            from,
            to,
            amount,
            fee: self.fee,
            tx_type: self.tx_type,
            foreign_keys: self.foreign_keys,
            data: self.data,
            created: self.created,
            hash: Hash::zero(),
            sign: Vec::new(),
            output: None,
        };
        tx.hash = tx.compute_hash();
        tx.sign = signers.iter().map(|k| k.sign_hash(&tx.hash)).collect();
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_transfer() -> (KeyPair, Transaction) {
        let sender = KeyPair::from_seed("tx-model-sender");
        let dest = KeyPair::from_seed("tx-model-dest").address();
        let tx = Transaction::builder("main")
            .transfer(dest, "70")
            .with_fee("0.5")
            .with_created(1_700_000_000)
            .build_signed(&[&sender]);
        (sender, tx)
    }

    #[test]
    fn builder_produces_valid_transaction() {
        let (_, tx) = signed_transfer();
        tx.validate().unwrap();
        assert_eq!(tx.tx_type, TransactionType::None);
        assert_eq!(tx.sum_amounts().unwrap(), parse_amount("70").unwrap());
    }

    #[test]
    fn hash_is_deterministic_and_binds_fields() {
        let (_, tx) = signed_transfer();
        assert_eq!(tx.compute_hash(), tx.compute_hash());
        let mut tampered = tx.clone();
        tampered.amount[0] = "71".to_string();
        assert!(matches!(
            tampered.validate(),
            Err(TransactionError::HashMismatch { .. })
        ));
    }

    #[test]
    fn output_does_not_affect_hash() {
        let (_, mut tx) = signed_transfer();
        let before = tx.compute_hash();
        tx.output = Some(TransactionOutput {
            cost: 9,
            fee_used: "0.5".to_string(),
            ..Default::default()
        });
        assert_eq!(tx.compute_hash(), before);
    }

    #[test]
    fn serde_round_trip_preserves_hash() {
        let (_, tx) = signed_transfer();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hash, tx.hash);
        back.validate().unwrap();
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let (_, tx) = signed_transfer();
        let value = serde_json::to_value(&tx).unwrap();
        assert!(value.get("foreignKeys").is_some());
        assert_eq!(value.get("type").unwrap(), "NONE");
    }

    #[test]
    fn rejects_arity_mismatch() {
        let (sender, mut tx) = signed_transfer();
        tx.to.push(sender.address());
        assert!(matches!(
            tx.validate_structure(),
            Err(TransactionError::ArityMismatch)
        ));
    }

    #[test]
    fn rejects_foreign_signature() {
        let (_, mut tx) = signed_transfer();
        let other = KeyPair::from_seed("someone-else");
        tx.sign[0] = other.sign_hash(&tx.hash);
        assert!(matches!(
            tx.validate(),
            Err(TransactionError::BadSignature { index: 0, .. })
        ));
    }

    #[test]
    fn contract_exe_arity_must_match() {
        let sender = KeyPair::from_seed("tx-exe");
        let contract = Address::for_contract(&Hash::from_bytes([1u8; 32]));
        let mut tx = Transaction::builder("main")
            .call_contract(contract, "get", vec![], "0")
            .build_signed(&[&sender]);
        match &mut tx.data {
            TransactionData::ContractExe { calls } => calls.push(ContractCall {
                method: "extra".to_string(),
                inputs: vec![],
            }),
            _ => unreachable!(),
        }
        assert!(matches!(
            tx.validate_structure(),
            Err(TransactionError::CallArityMismatch)
        ));
    }
}
