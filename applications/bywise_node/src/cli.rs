//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Bywise validator/full node", long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    /// Create a new chain file named <NAME>.chain.json and exit
    #[clap(long = "new-chain")]
    pub new_chain: Option<String>,
    /// Chain file to serve; repeat for multiple chains
    #[clap(long = "chain")]
    pub chains: Vec<PathBuf>,
    /// Start the node
    #[clap(long)]
    pub start: bool,
    /// Start with an ephemeral in-memory store and verbose logging
    #[clap(long = "start-debug")]
    pub start_debug: bool,
    #[clap(long, env = "PORT")]
    pub port: Option<u16>,
    #[clap(long, env = "HOST")]
    pub host: Option<String>,
    /// Comma-separated seed node URLs
    #[clap(long, env = "NODES")]
    pub nodes: Option<String>,
    /// Generate a fresh wallet, print it and exit
    #[clap(long = "new-wallet")]
    pub new_wallet: bool,
    /// Wipe the data directory before starting
    #[clap(long)]
    pub reset: bool,
    #[clap(long, env = "ENABLE_HTTPS")]
    pub https: bool,
    #[clap(long, env = "KEY_PATH")]
    pub key: Option<PathBuf>,
    #[clap(long, env = "CERT_PATH")]
    pub cert: Option<PathBuf>,
    /// Wallet seed phrase; omitted means load (or create) the wallet file
    #[clap(long, env = "SEED", hide_env_values = true)]
    pub seed: Option<String>,
    /// Admin token guarding /auth/statistics
    #[clap(long = "token", env = "TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,
    /// Optional config file (TOML)
    #[clap(long, default_value = "bywise.toml")]
    pub config: PathBuf,
}
