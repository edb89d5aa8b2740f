//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::{str::FromStr, sync::Arc};

use bigdecimal::BigDecimal;
use bywise_chain::{
    models::{Transaction, TransactionData},
    storage::{EnvRepository, MemoryKvStore},
};
use bywise_common_types::{Address, Hash, KeyPair};
use bywise_engine::{
    pool::VmPool,
    state_store::EnvironmentContext,
    vm::DEFAULT_GAS_LIMIT,
    EnvironmentStore,
    ExecutionContext,
    TransactionExecutor,
};

const CHAIN: &str = "main";

struct Harness {
    executor: TransactionExecutor,
    admin: KeyPair,
    user: KeyPair,
    ctx: EnvironmentContext,
}

fn genesis_command(admin: &KeyPair, name: &str, input: Vec<String>) -> Transaction {
    Transaction::builder(CHAIN)
        .blockchain_command(name, input)
        .with_created(1_700_000_000)
        .build_signed(&[admin])
}

/// Fresh chain with one admin/validator and a funded user wallet, state as a
/// genesis block would leave it.
fn harness() -> Harness {
    let env = Arc::new(
        EnvironmentStore::new(CHAIN, EnvRepository::new(Arc::new(MemoryKvStore::new()))).unwrap(),
    );
    let executor = TransactionExecutor::new(env, VmPool::default());
    let admin = KeyPair::from_seed("exec-admin");
    let user = KeyPair::from_seed("exec-user");
    let mut ctx = EnvironmentContext::at(Hash::zero());

    let genesis = ExecutionContext::for_block(0, admin.address());
    for tx in [
        genesis_command(&admin, "addAdmin", vec![admin.address().to_string()]),
        genesis_command(&admin, "addValidator", vec![admin.address().to_string()]),
        genesis_command(&admin, "setBalance", vec![admin.address().to_string(), "100000".to_string()]),
        genesis_command(&admin, "setBalance", vec![user.address().to_string(), "1000".to_string()]),
    ] {
        let output = executor.execute(&mut ctx, &genesis, &tx).unwrap();
        assert_eq!(output.error, None);
    }

    Harness {
        executor,
        admin,
        user,
        ctx,
    }
}

fn exec_at(height: u64, proposer: &KeyPair) -> ExecutionContext {
    ExecutionContext::for_block(height, proposer.address())
}

#[test]
fn command_balance_arithmetic() {
    let mut h = harness();
    let wallet = KeyPair::from_seed("scenario-wallet").address();
    let exec = exec_at(1, &h.admin);

    let set = Transaction::builder(CHAIN)
        .command("setBalance", vec![wallet.to_string(), "100".to_string()])
        .with_created(1_700_000_100)
        .build_signed(&[&h.admin]);
    assert_eq!(h.executor.execute(&mut h.ctx, &exec, &set).unwrap().error, None);

    let sub = Transaction::builder(CHAIN)
        .command("subBalance", vec![wallet.to_string(), "25".to_string()])
        .with_created(1_700_000_101)
        .build_signed(&[&h.admin]);
    assert_eq!(h.executor.execute(&mut h.ctx, &exec, &sub).unwrap().error, None);

    assert_eq!(
        h.executor.balance_of(&h.ctx, &wallet).unwrap(),
        BigDecimal::from(75)
    );
}

#[test]
fn transfer_and_insufficient_funds() {
    let mut h = harness();
    let recipient = KeyPair::from_seed("fresh-wallet").address();
    let exec = exec_at(1, &h.admin);

    let transfer = Transaction::builder(CHAIN)
        .transfer(recipient.clone(), "70")
        .with_created(1_700_000_200)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &transfer).unwrap();
    assert_eq!(output.error, None);
    assert_eq!(output.fee_used, "0");
    assert_eq!(
        h.executor.balance_of(&h.ctx, &h.user.address()).unwrap(),
        BigDecimal::from(930)
    );
    assert_eq!(
        h.executor.balance_of(&h.ctx, &recipient).unwrap(),
        BigDecimal::from(70)
    );

    // conservation: a failing over-transfer leaves every balance untouched
    let too_much = Transaction::builder(CHAIN)
        .transfer(recipient.clone(), "5000")
        .with_created(1_700_000_201)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &too_much).unwrap();
    assert_eq!(output.error.as_deref(), Some("insufficient funds"));
    assert_eq!(
        h.executor.balance_of(&h.ctx, &h.user.address()).unwrap(),
        BigDecimal::from(930)
    );
    assert_eq!(
        h.executor.balance_of(&h.ctx, &recipient).unwrap(),
        BigDecimal::from(70)
    );
}

#[test]
fn command_requires_admin() {
    let mut h = harness();
    let exec = exec_at(1, &h.admin);
    let tx = Transaction::builder(CHAIN)
        .command("setBalance", vec![h.user.address().to_string(), "9".to_string()])
        .with_created(1_700_000_300)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &tx).unwrap();
    assert_eq!(output.error.as_deref(), Some("admin required"));
}

#[test]
fn blockchain_command_is_ignored_outside_genesis() {
    let mut h = harness();
    let exec = exec_at(5, &h.admin);
    let rogue = KeyPair::from_seed("rogue").address();
    let tx = genesis_command(&h.admin, "setBalance", vec![rogue.to_string(), "777".to_string()]);
    let output = h.executor.execute(&mut h.ctx, &exec, &tx).unwrap();
    assert_eq!(output.error, None);
    assert_eq!(h.executor.balance_of(&h.ctx, &rogue).unwrap(), BigDecimal::from(0));
}

const VAULT: &str = r#"
payable function deposit() {
  let who = blockchain.getTxSender();
  let amount = blockchain.getTxAmount();
  blockchain.valueSet("dep:" + who, amount);
  blockchain.emitEvent("deposit", "who", who, "amount", amount);
  blockchain.log("deposit from " + who);
  return amount;
}
view function depositOf(who) {
  return blockchain.valueGet("dep:" + who);
}
function poke() {
  return "poked";
}
view function sneaky() {
  blockchain.valueSet("x", "1");
  return null;
}
function withdraw(to, amount) {
  blockchain.balanceTransfer(to, amount);
  return true;
}
function counterDemo() {
  let id = blockchain.listNew();
  blockchain.listPush(id, "a");
  blockchain.listPush(id, "b");
  return blockchain.listSize(id);
}
"#;

fn deploy(h: &mut Harness, code: &str, seed: u8) -> Address {
    let contract = Address::for_contract(&Hash::from_bytes([seed; 32]));
    let tx = Transaction::builder(CHAIN)
        .deploy_contract(contract.clone(), code)
        .with_created(1_700_001_000)
        .build_signed(&[&h.user]);
    let exec = exec_at(1, &h.admin);
    let output = h.executor.execute(&mut h.ctx, &exec, &tx).unwrap();
    assert_eq!(output.error, None);
    contract
}

#[test]
fn deploy_and_call_payable_method() {
    let mut h = harness();
    let contract = deploy(&mut h, VAULT, 0x11);
    let exec = exec_at(1, &h.admin);

    let call = Transaction::builder(CHAIN)
        .call_contract(contract.clone(), "deposit", vec![], "10")
        .with_created(1_700_001_100)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &call).unwrap();
    assert_eq!(output.error, None);
    assert_eq!(output.events.len(), 1);
    assert_eq!(output.events[0].name, "deposit");
    assert_eq!(output.logs.len(), 1);
    assert!(output.cost > 0);
    assert_eq!(
        h.executor.balance_of(&h.ctx, &contract).unwrap(),
        BigDecimal::from(10)
    );

    // the recorded payload carries the return value
    let payload: serde_json::Value = serde_json::from_str(&output.payload[0]).unwrap();
    assert_eq!(payload["return"], "10");

    // view read through a follow-up call
    let view = Transaction::builder(CHAIN)
        .call_contract(contract, "depositOf", vec![h.user.address().to_string()], "0")
        .with_created(1_700_001_101)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &view).unwrap();
    assert_eq!(output.error, None);
    let payload: serde_json::Value = serde_json::from_str(&output.payload[0]).unwrap();
    assert_eq!(payload["return"], "10");
}

#[test]
fn non_payable_method_rejects_amounts() {
    let mut h = harness();
    let contract = deploy(&mut h, VAULT, 0x12);
    let exec = exec_at(1, &h.admin);
    let before = h.executor.balance_of(&h.ctx, &h.user.address()).unwrap();

    let call = Transaction::builder(CHAIN)
        .call_contract(contract, "poke", vec![], "5")
        .with_created(1_700_001_200)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &call).unwrap();
    assert_eq!(output.error.as_deref(), Some("method poke is not payable"));
    // the amount moved during dispatch was rolled back
    assert_eq!(h.executor.balance_of(&h.ctx, &h.user.address()).unwrap(), before);
}

#[test]
fn view_methods_cannot_write() {
    let mut h = harness();
    let contract = deploy(&mut h, VAULT, 0x13);
    let exec = exec_at(1, &h.admin);
    let call = Transaction::builder(CHAIN)
        .call_contract(contract, "sneaky", vec![], "0")
        .with_created(1_700_001_300)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &call).unwrap();
    assert!(output.error.as_deref().unwrap().contains("state write"));
}

#[test]
fn contract_balance_transfers() {
    let mut h = harness();
    let contract = deploy(&mut h, VAULT, 0x14);
    let exec = exec_at(1, &h.admin);
    let fund = Transaction::builder(CHAIN)
        .call_contract(contract.clone(), "deposit", vec![], "50")
        .with_created(1_700_001_400)
        .build_signed(&[&h.user]);
    assert_eq!(h.executor.execute(&mut h.ctx, &exec, &fund).unwrap().error, None);

    let payee = KeyPair::from_seed("payee").address();
    let withdraw = Transaction::builder(CHAIN)
        .call_contract(
            contract.clone(),
            "withdraw",
            vec![payee.to_string(), "20".to_string()],
            "0",
        )
        .with_created(1_700_001_401)
        .build_signed(&[&h.user]);
    assert_eq!(h.executor.execute(&mut h.ctx, &exec, &withdraw).unwrap().error, None);
    assert_eq!(h.executor.balance_of(&h.ctx, &payee).unwrap(), BigDecimal::from(20));
    assert_eq!(
        h.executor.balance_of(&h.ctx, &contract).unwrap(),
        BigDecimal::from(30)
    );
}

#[test]
fn list_storage_counts() {
    let mut h = harness();
    let contract = deploy(&mut h, VAULT, 0x15);
    let exec = exec_at(1, &h.admin);
    let call = Transaction::builder(CHAIN)
        .call_contract(contract, "counterDemo", vec![], "0")
        .with_created(1_700_001_500)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &call).unwrap();
    assert_eq!(output.error, None);
    let payload: serde_json::Value = serde_json::from_str(&output.payload[0]).unwrap();
    assert_eq!(payload["return"], 2);
}

const HARDWORK: &str = r#"
function hardwork(n) {
  blockchain.valueSet("started", "yes");
  let sum = 0;
  for (let i = 0; i < n; i = i + 1) {
    sum = sum + i * n;
  }
  return sum;
}
"#;

#[test]
fn hardwork_returns_reference_values() {
    let mut h = harness();
    let contract = deploy(&mut h, HARDWORK, 0x21);
    let exec = exec_at(1, &h.admin);

    let call = |n: u32, created: u64, h: &mut Harness| {
        let tx = Transaction::builder(CHAIN)
            .call_contract(contract.clone(), "hardwork", vec![n.to_string()], "0")
            .with_created(created)
            .build_signed(&[&h.user]);
        h.executor.execute(&mut h.ctx, &exec, &tx).unwrap()
    };

    let output = call(100, 1_700_002_000, &mut h);
    assert_eq!(output.error, None);
    let payload: serde_json::Value = serde_json::from_str(&output.payload[0]).unwrap();
    assert_eq!(payload["return"], 495_000);

    let output_big = call(1000, 1_700_002_001, &mut h);
    let payload: serde_json::Value = serde_json::from_str(&output_big.payload[0]).unwrap();
    assert_eq!(payload["return"], 499_500_000);
    assert!(output_big.cost > output.cost);
}

#[test]
fn gas_exhaustion_reverts_but_keeps_the_fee() {
    let mut h = harness();
    let contract = deploy(&mut h, HARDWORK, 0x22);

    // charge 0.1 per gas unit so the failed execution consumes a real fee
    let exec0 = exec_at(0, &h.admin);
    let set_fee = genesis_command(
        &h.admin,
        "setConfig",
        vec!["feeCoefCost".to_string(), "0.1".to_string()],
    );
    assert_eq!(h.executor.execute(&mut h.ctx, &exec0, &set_fee).unwrap().error, None);

    let exec = exec_at(1, &h.admin);
    let before = h.executor.balance_of(&h.ctx, &h.user.address()).unwrap();
    let tx = Transaction::builder(CHAIN)
        .call_contract(contract, "hardwork", vec!["100000".to_string()], "0")
        .with_fee("200")
        .with_created(1_700_002_100)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &tx).unwrap();

    assert_eq!(output.error.as_deref(), Some("interrupted"));
    assert!(output.cost > DEFAULT_GAS_LIMIT);
    // the contract write before the loop was rolled back
    let started = h
        .executor
        .env()
        .get(&h.ctx, &format!("storage:{}:value:started", tx.to[0]))
        .unwrap();
    assert_eq!(started, None);
    // fee consumed up to the failing step: 0.1 * cost
    let expected_fee =
        BigDecimal::from(output.cost) * BigDecimal::from_str("0.1").unwrap();
    let after = h.executor.balance_of(&h.ctx, &h.user.address()).unwrap();
    assert_eq!((before - after).normalized(), expected_fee.normalized());
}

#[test]
fn execution_is_deterministic_across_contexts() {
    let mut a = harness();
    let mut b = harness();
    let contract_a = deploy(&mut a, VAULT, 0x31);
    let contract_b = deploy(&mut b, VAULT, 0x31);
    assert_eq!(contract_a, contract_b);

    let exec = exec_at(1, &a.admin);
    let tx = Transaction::builder(CHAIN)
        .call_contract(contract_a, "deposit", vec![], "10")
        .with_created(1_700_003_000)
        .build_signed(&[&a.user]);

    let out_a = a.executor.execute(&mut a.ctx, &exec, &tx).unwrap();
    let out_b = b.executor.execute(&mut b.ctx, &exec, &tx).unwrap();
    assert_eq!(out_a, out_b);

    let commit_a = a.executor.env().commit(&mut a.ctx, "tag");
    let commit_b = b.executor.env().commit(&mut b.ctx, "tag");
    assert_eq!(commit_a, commit_b);
}

#[test]
fn replay_verification_detects_tampering() {
    let mut h = harness();
    let contract = deploy(&mut h, VAULT, 0x41);
    let exec = exec_at(1, &h.admin);
    let mut tx = Transaction::builder(CHAIN)
        .call_contract(contract, "deposit", vec![], "10")
        .with_created(1_700_004_000)
        .build_signed(&[&h.user]);

    let base = h.ctx.clone();
    let output = h.executor.execute(&mut h.ctx, &exec, &tx).unwrap();
    tx.output = Some(output);
    assert!(h.executor.verify_replay(&base, &exec, &tx).unwrap());

    // a forged return value no longer replays against the recorded calls
    let output = tx.output.as_mut().unwrap();
    let mut entry: serde_json::Value = serde_json::from_str(&output.payload[0]).unwrap();
    entry["return"] = serde_json::Value::String("11".to_string());
    output.payload[0] = entry.to_string();
    assert!(!h.executor.verify_replay(&base, &exec, &tx).unwrap());
}

#[test]
fn simulation_skips_wallet_checks() {
    let mut h = harness();
    let pauper = KeyPair::from_seed("pauper");
    let recipient = KeyPair::from_seed("sim-recipient").address();
    let tx = Transaction::builder(CHAIN)
        .transfer(recipient, "1000000")
        .with_created(1_700_005_000)
        .build_signed(&[&pauper]);

    let strict = ExecutionContext::simulation(1, h.admin.address(), false);
    let mut probe = h.ctx.clone();
    let output = h.executor.execute(&mut probe, &strict, &tx).unwrap();
    assert_eq!(output.error.as_deref(), Some("insufficient funds"));

    let relaxed = ExecutionContext::simulation(1, h.admin.address(), true);
    let mut probe = h.ctx.clone();
    let output = h.executor.execute(&mut probe, &relaxed, &tx).unwrap();
    assert_eq!(output.error, None);
    // simulation writes never touched the real context
    assert_eq!(
        h.executor.balance_of(&h.ctx, &h.user.address()).unwrap(),
        BigDecimal::from(1000)
    );
}

#[test]
fn external_contract_calls_and_reentry_cap() {
    let mut h = harness();
    let ponger = deploy(
        &mut h,
        "function ping() { return \"pong\"; }",
        0x51,
    );
    let relay = deploy(
        &mut h,
        "function relay(target) { return blockchain.externalContract(target, \"ping\"); }\n\
         function recurse(self, n) {\n\
           if (n <= 0) { return 0; }\n\
           return blockchain.externalContract(self, \"recurse\", self, n - 1);\n\
         }",
        0x52,
    );
    let exec = exec_at(1, &h.admin);

    let call = Transaction::builder(CHAIN)
        .call_contract(relay.clone(), "relay", vec![ponger.to_string()], "0")
        .with_created(1_700_006_000)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &call).unwrap();
    assert_eq!(output.error, None);
    let payload: serde_json::Value = serde_json::from_str(&output.payload[0]).unwrap();
    assert_eq!(payload["return"], "pong");

    let shallow = Transaction::builder(CHAIN)
        .call_contract(
            relay.clone(),
            "recurse",
            vec![relay.to_string(), "3".to_string()],
            "0",
        )
        .with_created(1_700_006_001)
        .build_signed(&[&h.user]);
    assert_eq!(h.executor.execute(&mut h.ctx, &exec, &shallow).unwrap().error, None);

    let deep = Transaction::builder(CHAIN)
        .call_contract(
            relay.clone(),
            "recurse",
            vec![relay.to_string(), "6".to_string()],
            "0",
        )
        .with_created(1_700_006_002)
        .build_signed(&[&h.user]);
    let output = h.executor.execute(&mut h.ctx, &exec, &deep).unwrap();
    assert!(output.error.as_deref().unwrap().contains("depth"));
}

#[test]
fn nonces_advance_per_sender() {
    let mut h = harness();
    let exec = exec_at(1, &h.admin);
    let before = h.executor.wallet_info(&h.ctx, &h.user.address()).unwrap().nonce;
    let tx = Transaction::builder(CHAIN)
        .transfer(h.admin.address(), "1")
        .with_created(1_700_007_000)
        .build_signed(&[&h.user]);
    h.executor.execute(&mut h.ctx, &exec, &tx).unwrap();
    let after = h.executor.wallet_info(&h.ctx, &h.user.address()).unwrap().nonce;
    assert_eq!(after, before + 1);
}

#[test]
fn bad_signature_invalidates_the_block() {
    let mut h = harness();
    let exec = exec_at(1, &h.admin);
    let mut tx = Transaction::builder(CHAIN)
        .transfer(h.admin.address(), "1")
        .with_created(1_700_008_000)
        .build_signed(&[&h.user]);
    tx.sign[0] = KeyPair::from_seed("imposter").sign_hash(&tx.hash);
    assert!(h.executor.execute(&mut h.ctx, &exec, &tx).is_err());
}

#[test]
fn data_type_pairing_is_enforced() {
    let mut h = harness();
    let exec = exec_at(1, &h.admin);
    let mut tx = Transaction::builder(CHAIN)
        .transfer(h.admin.address(), "1")
        .with_created(1_700_009_000)
        .build_signed(&[&h.user]);
    tx.data = TransactionData::Command {
        name: "setBalance".to_string(),
        input: vec![],
    };
    assert!(h.executor.execute(&mut h.ctx, &exec, &tx).is_err());
}
