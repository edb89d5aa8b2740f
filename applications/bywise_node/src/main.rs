//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

mod bootstrap;
mod cli;
mod config;
mod genesis;
mod http;
mod logger;
mod node;
mod services;
mod wallet;

use std::{fs, path::Path, process, sync::Arc, time::Duration};

use anyhow::bail;
use bywise_common_types::shutdown::Shutdown;
use clap::Parser;
use log::*;

use crate::{cli::Cli, config::ApplicationConfig, genesis::ChainFile};

const LOG_TARGET: &str = "bywise::node::app";

/// Block interval written into freshly created chain files.
const NEW_CHAIN_BLOCK_TIME_SECS: u64 = 30;

fn main() {
    if let Err(err) = main_inner() {
        eprintln!("{err:?}");
        error!(target: LOG_TARGET, "exiting: {err}");
        process::exit(1);
    }
}

fn main_inner() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ApplicationConfig::load(&cli)?;
    logger::init_logger(config.debug).ok();

    if cli.new_wallet {
        let pair = bywise_common_types::KeyPair::generate();
        println!("address: {}", pair.address());
        println!("secret:  {}", hex::encode(pair.secret_bytes()));
        return Ok(());
    }

    if cli.reset {
        if config.data_dir.exists() {
            fs::remove_dir_all(&config.data_dir)?;
        }
        println!("data directory cleared");
        if !cli.start && !cli.start_debug && cli.new_chain.is_none() {
            return Ok(());
        }
    }

    let wallet = Arc::new(wallet::load_or_create(&config.data_dir, config.seed.as_deref())?);

    if let Some(name) = &cli.new_chain {
        let file = ChainFile::create(name, NEW_CHAIN_BLOCK_TIME_SECS, &wallet)?;
        let path = file.write(Path::new("."))?;
        println!("chain file created: {}", path.display());
        return Ok(());
    }

    if !cli.start && !cli.start_debug {
        bail!("nothing to do: pass --start (or --start-debug)");
    }
    if config.chains.is_empty() {
        bail!("no chain files configured: pass --chain <path>");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run_node(config, wallet))
}

async fn run_node(
    config: ApplicationConfig,
    wallet: Arc<bywise_common_types::KeyPair>,
) -> anyhow::Result<()> {
    let shutdown = Arc::new(Shutdown::new());
    let context = bootstrap::spawn_services(config, wallet, shutdown.clone()).await?;

    println!("🚀 Bywise node started");
    println!("address: {}", context.wallet.address());
    println!("api:     {}/api/v2", context.config.advertised_host());

    let mut signal = shutdown.to_signal();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(target: LOG_TARGET, "interrupt received, shutting down");
            shutdown.trigger();
        },
        // a fatal error in any worker triggers shutdown internally
        _ = signal.wait() => {},
    }
    // workers observe the signal and return within the grace period
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(())
}
