//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Chain files: a fully signed genesis block (one end-slice of
//! `BLOCKCHAIN_COMMAND` transactions) plus the chain name. A chain file is
//! verifiable end-to-end by anyone who loads it.

use std::{
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context};
use bywise_chain::models::{Block, Slice, Transaction};
use bywise_common_types::{Hash, KeyPair};
use log::*;
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "bywise::node::genesis";

/// Initial balance granted to the founding wallet.
const FOUNDER_SUPPLY: &str = "1000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainFile {
    pub name: String,
    pub block: Block,
    pub slices: Vec<Slice>,
    pub transactions: Vec<Transaction>,
}

impl ChainFile {
    /// Builds a new chain: the founder wallet becomes the first admin and
    /// validator and receives the initial supply.
    pub fn create(name: &str, block_time_secs: u64, founder: &KeyPair) -> anyhow::Result<Self> {
        if name.is_empty() || name.contains('-') || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(anyhow!("chain names are non-empty and alphanumeric"));
        }
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let founder_addr = founder.address().to_string();
        let commands = [
            ("addAdmin", vec![founder_addr.clone()]),
            ("addValidator", vec![founder_addr.clone()]),
            ("setBalance", vec![founder_addr, FOUNDER_SUPPLY.to_string()]),
            ("setConfig", vec!["blockTime".to_string(), block_time_secs.to_string()]),
        ];
        let transactions: Vec<Transaction> = commands
            .into_iter()
            .map(|(command, input)| {
                Transaction::builder(name)
                    .blockchain_command(command, input)
                    .with_created(created)
                    .build_signed(&[founder])
            })
            .collect();
        let hashes = transactions.iter().map(|tx| tx.hash).collect();
        let slice = Slice::new_signed(name, 0, 0, hashes, created, true, founder);
        let block = Block::new_signed(
            name,
            0,
            vec![slice.hash],
            created,
            Hash::zero(),
            transactions.len() as u64,
            founder,
        );
        Ok(Self {
            name: name.to_string(),
            block,
            slices: vec![slice],
            transactions,
        })
    }

    pub fn write(&self, dir: &Path) -> anyhow::Result<std::path::PathBuf> {
        let path = dir.join(format!("{}.chain.json", self.name));
        fs::write(&path, serde_json::to_string_pretty(self)?).context("writing chain file")?;
        info!(target: LOG_TARGET, "⛓️  chain file written to {}", path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading chain file {}", path.display()))?;
        let file: Self = serde_json::from_str(&raw).context("parsing chain file")?;
        file.validate()?;
        Ok(file)
    }

    /// Signature/hash checks over the whole genesis bundle.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.block
            .validate()
            .map_err(|e| anyhow!("genesis block: {e}"))?;
        if self.block.chain != self.name || !self.block.is_genesis() {
            return Err(anyhow!("genesis block does not match chain {}", self.name));
        }
        for slice in &self.slices {
            slice.validate().map_err(|e| anyhow!("genesis slice: {e}"))?;
            if !self.block.slices.contains(&slice.hash) {
                return Err(anyhow!("slice {} not referenced by the genesis block", slice.hash));
            }
        }
        for tx in &self.transactions {
            tx.validate().map_err(|e| anyhow!("genesis tx {}: {e}", tx.hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_chain_files_validate_and_round_trip() {
        let founder = KeyPair::from_seed("genesis-founder");
        let file = ChainFile::create("testnet", 3, &founder).unwrap();
        file.validate().unwrap();
        assert_eq!(file.block.transactions_count, 4);
        assert!(file.slices[0].end);

        let dir = tempfile::tempdir().unwrap();
        let path = file.write(dir.path()).unwrap();
        let loaded = ChainFile::load(&path).unwrap();
        assert_eq!(loaded.block.hash, file.block.hash);
    }

    #[test]
    fn chain_names_are_restricted() {
        let founder = KeyPair::from_seed("genesis-founder");
        assert!(ChainFile::create("bad-name", 3, &founder).is_err());
        assert!(ChainFile::create("", 3, &founder).is_err());
    }

    #[test]
    fn tampered_files_fail_validation() {
        let founder = KeyPair::from_seed("genesis-founder");
        let mut file = ChainFile::create("testnet", 3, &founder).unwrap();
        file.transactions[0].amount = vec!["1".to_string()];
        assert!(file.validate().is_err());
    }
}
