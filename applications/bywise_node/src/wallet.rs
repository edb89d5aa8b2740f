//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::{fs, path::Path};

use anyhow::{anyhow, Context};
use bywise_common_types::KeyPair;
use log::*;
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "bywise::node::wallet";

#[derive(Serialize, Deserialize)]
struct WalletFile {
    secret: String,
}

/// Loads the node wallet: a `SEED` derives it deterministically, otherwise
/// the wallet file in the data dir is used (and created on first run).
pub fn load_or_create(data_dir: &Path, seed: Option<&str>) -> anyhow::Result<KeyPair> {
    if let Some(seed) = seed {
        let pair = KeyPair::from_seed(seed);
        info!(target: LOG_TARGET, "wallet derived from seed: {}", pair.address());
        return Ok(pair);
    }
    let path = data_dir.join("wallet.json");
    if path.exists() {
        let raw = fs::read_to_string(&path).context("reading wallet file")?;
        let file: WalletFile = serde_json::from_str(&raw).context("parsing wallet file")?;
        let bytes = hex::decode(&file.secret).map_err(|_| anyhow!("wallet secret is not hex"))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("wallet secret must be 32 bytes"))?;
        let pair = KeyPair::from_secret_bytes(secret);
        info!(target: LOG_TARGET, "wallet loaded: {}", pair.address());
        return Ok(pair);
    }
    let pair = KeyPair::generate();
    fs::create_dir_all(data_dir).context("creating data dir")?;
    let file = WalletFile {
        secret: hex::encode(pair.secret_bytes()),
    };
    fs::write(&path, serde_json::to_string_pretty(&file)?).context("writing wallet file")?;
    info!(target: LOG_TARGET, "🔑 new wallet created: {}", pair.address());
    Ok(pair)
}
