//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! End-to-end pipeline runs against the in-memory store: genesis execution,
//! block progression, fee-free transfers, finality after the reorg window
//! and the minting loop driving everything by itself.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bywise_chain::{
    mempool::Mempool,
    models::{Block, Slice, Transaction},
    storage::{ChainStores, MemoryKvStore},
    BlockTree,
};
use bywise_common_types::{shutdown::Shutdown, Hash, KeyPair};
use bywise_consensus::{
    ChainEvent, MintingConfig, MintingWorker, NullGossip, PipelineHandle, PipelineWorker,
};
use bywise_engine::{pool::VmPool, EnvironmentStore, TransactionExecutor};
use tokio::{sync::broadcast, time::sleep};

const CHAIN: &str = "main";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct Net {
    handle: PipelineHandle,
    mempool: Arc<Mempool>,
    validator: KeyPair,
    user: KeyPair,
    events: broadcast::Receiver<ChainEvent>,
    genesis: Block,
    _shutdown: Shutdown,
}

fn genesis_txs(validator: &KeyPair, user: &KeyPair, created: u64) -> Vec<Transaction> {
    let commands = [
        ("addAdmin", vec![validator.address().to_string()]),
        ("addValidator", vec![validator.address().to_string()]),
        (
            "setBalance",
            vec![validator.address().to_string(), "100000".to_string()],
        ),
        ("setBalance", vec![user.address().to_string(), "1000".to_string()]),
        ("setConfig", vec!["blockTime".to_string(), "0".to_string()]),
    ];
    commands
        .into_iter()
        .map(|(name, input)| {
            Transaction::builder(CHAIN)
                .blockchain_command(name, input)
                .with_created(created)
                .build_signed(&[validator])
        })
        .collect()
}

/// Genesis block: one end-slice carrying the bootstrap commands.
fn genesis(validator: &KeyPair, txs: &[Transaction], created: u64) -> (Slice, Block) {
    let hashes = txs.iter().map(|tx| tx.hash).collect();
    let slice = Slice::new_signed(CHAIN, 0, 0, hashes, created, true, validator);
    let block = Block::new_signed(
        CHAIN,
        0,
        vec![slice.hash],
        created,
        Hash::zero(),
        txs.len() as u64,
        validator,
    );
    (slice, block)
}

async fn start_network() -> Net {
    let validator = KeyPair::from_seed("pipeline-validator");
    let user = KeyPair::from_seed("pipeline-user");
    let store: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new());
    let stores = ChainStores::new(store);
    let env = Arc::new(EnvironmentStore::new(CHAIN, stores.env.clone()).unwrap());
    let executor = TransactionExecutor::new(env.clone(), VmPool::default());
    let mempool = Arc::new(Mempool::new(CHAIN));
    let shutdown = Shutdown::new();
    let (tx_events, events) = broadcast::channel(256);

    let created = now_secs();
    let txs = genesis_txs(&validator, &user, created);
    let (slice, block) = genesis(&validator, &txs, created);
    for tx in &txs {
        mempool.add_transaction(tx.clone(), created).unwrap();
    }

    let tree = BlockTree::new(block.clone()).unwrap();
    let (handle, _join) = PipelineWorker::spawn(
        tree,
        env,
        executor,
        mempool.clone(),
        stores,
        NullGossip,
        tx_events,
        None,
        shutdown.to_signal(),
    );
    handle.submit_slice(slice).await;

    Net {
        handle,
        mempool,
        validator,
        user,
        events,
        genesis: block,
        _shutdown: shutdown,
    }
}

async fn wait_for_height(handle: &PipelineHandle, height: u64) {
    for _ in 0..200 {
        if let Some(tip) = handle.tip().await {
            if tip.height >= height {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("tip never reached height {height}");
}

/// Manually mints one block on top of the current tip.
async fn mint_block(net: &Net, txs: &[Transaction]) -> Block {
    let tip = net.handle.tip().await.unwrap();
    let height = tip.height + 1;
    let created = now_secs();
    for tx in txs {
        let _ = net.mempool.add_transaction(tx.clone(), created);
    }
    let hashes = txs.iter().map(|tx| tx.hash).collect();
    let slice = Slice::new_signed(CHAIN, 0, height, hashes, created, true, &net.validator);
    let block = Block::new_signed(
        CHAIN,
        height,
        vec![slice.hash],
        created,
        tip.hash,
        txs.len() as u64,
        &net.validator,
    );
    net.handle.submit_slice(slice).await;
    net.handle.submit_block(block.clone()).await;
    wait_for_height(&net.handle, height).await;
    block
}

#[tokio::test(flavor = "multi_thread")]
async fn genesis_executes_and_becomes_canonical() {
    let net = start_network().await;
    wait_for_height(&net.handle, 0).await;

    let tip = net.handle.tip().await.unwrap();
    assert_eq!(tip.hash, net.genesis.hash);

    let validators = net.handle.validators().await;
    assert_eq!(validators, [net.validator.address()]);

    let wallet = net.handle.wallet(net.user.address()).await.unwrap();
    assert_eq!(wallet.balance, "1000");

    let params = net.handle.params().await.unwrap();
    assert_eq!(params.block_time_secs, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn transfers_execute_in_minted_blocks() {
    let net = start_network().await;
    wait_for_height(&net.handle, 0).await;

    let recipient = KeyPair::from_seed("flow-recipient").address();
    let tx = Transaction::builder(CHAIN)
        .transfer(recipient.clone(), "70")
        .with_created(now_secs())
        .build_signed(&[&net.user]);
    mint_block(&net, std::slice::from_ref(&tx)).await;

    let sender = net.handle.wallet(net.user.address()).await.unwrap();
    assert_eq!(sender.balance, "930");
    assert_eq!(sender.info.nonce, 1);
    let wallet = net.handle.wallet(recipient).await.unwrap();
    assert_eq!(wallet.balance, "70");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_transactions_do_not_invalidate_the_block() {
    let net = start_network().await;
    wait_for_height(&net.handle, 0).await;

    let recipient = KeyPair::from_seed("flow-recipient").address();
    let doomed = Transaction::builder(CHAIN)
        .transfer(recipient.clone(), "999999")
        .with_created(now_secs())
        .build_signed(&[&net.user]);
    let block = mint_block(&net, std::slice::from_ref(&doomed)).await;

    // the block minted fine and balances are untouched
    let (_, status) = net.handle.block(block.hash).await.unwrap();
    assert!(matches!(
        status,
        bywise_chain::models::BlockStatus::Mined | bywise_chain::models::BlockStatus::Immutable
    ));
    let sender = net.handle.wallet(net.user.address()).await.unwrap();
    assert_eq!(sender.balance, "1000");
}

#[tokio::test(flavor = "multi_thread")]
async fn blocks_finalize_past_the_reorg_window() {
    let mut net = start_network().await;
    wait_for_height(&net.handle, 0).await;

    // default window is 12: height must reach 12 for genesis to freeze
    for _ in 0..13 {
        mint_block(&net, &[]).await;
    }

    let mut saw_immutable_genesis = false;
    while let Ok(event) = net.events.try_recv() {
        if let ChainEvent::BlockImmutable { height, hash, .. } = event {
            if height == 0 {
                assert_eq!(hash, net.genesis.hash);
                saw_immutable_genesis = true;
            }
        }
    }
    assert!(saw_immutable_genesis);
}

#[tokio::test(flavor = "multi_thread")]
async fn orphan_blocks_wait_for_their_parent() {
    let net = start_network().await;
    wait_for_height(&net.handle, 0).await;
    let tip = net.handle.tip().await.unwrap();
    let created = now_secs();

    let slice1 = Slice::new_signed(CHAIN, 0, 1, vec![], created, true, &net.validator);
    let block1 = Block::new_signed(CHAIN, 1, vec![slice1.hash], created, tip.hash, 0, &net.validator);
    let slice2 = Slice::new_signed(CHAIN, 0, 2, vec![], created + 1, true, &net.validator);
    let block2 = Block::new_signed(CHAIN, 2, vec![slice2.hash], created + 1, block1.hash, 0, &net.validator);

    // child first: parks as orphan until the parent shows up
    net.handle.submit_slice(slice1).await;
    net.handle.submit_slice(slice2).await;
    net.handle.submit_block(block2.clone()).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(net.handle.tip().await.unwrap().height, 0);

    net.handle.submit_block(block1).await;
    wait_for_height(&net.handle, 2).await;
    assert_eq!(net.handle.tip().await.unwrap().hash, block2.hash);
}

#[tokio::test(flavor = "multi_thread")]
async fn simulation_runs_against_the_tip() {
    let net = start_network().await;
    wait_for_height(&net.handle, 0).await;

    let pauper = KeyPair::from_seed("sim-pauper");
    let tx = Transaction::builder(CHAIN)
        .transfer(net.user.address(), "12345")
        .with_created(now_secs())
        .build_signed(&[&pauper]);

    let output = net.handle.simulate(tx.clone(), false).await.unwrap();
    assert_eq!(output.error.as_deref(), Some("insufficient funds"));

    let output = net.handle.simulate(tx, true).await.unwrap();
    assert_eq!(output.error, None);
    // a simulation never moves real balances
    let wallet = net.handle.wallet(net.user.address()).await.unwrap();
    assert_eq!(wallet.balance, "1000");
}

#[tokio::test(flavor = "multi_thread")]
async fn minting_worker_produces_blocks_on_its_own() {
    let net = start_network().await;
    wait_for_height(&net.handle, 0).await;

    let shutdown = Shutdown::new();
    let _join = MintingWorker::spawn(
        CHAIN.to_string(),
        Arc::new(KeyPair::from_seed("pipeline-validator")),
        net.mempool.clone(),
        net.handle.clone(),
        NullGossip,
        MintingConfig {
            slice_interval: Duration::from_millis(100),
            ..MintingConfig::default()
        },
        shutdown.to_signal(),
    );

    // blockTime is 0 on this chain, so the loop should close blocks freely
    let recipient = KeyPair::from_seed("mint-recipient").address();
    let tx = Transaction::builder(CHAIN)
        .transfer(recipient.clone(), "5")
        .with_created(now_secs())
        .build_signed(&[&net.user]);
    net.mempool.add_transaction(tx, now_secs()).unwrap();

    wait_for_height(&net.handle, 2).await;
    shutdown.trigger();

    let wallet = net.handle.wallet(recipient).await.unwrap();
    assert_eq!(wallet.balance, "5");
}
