//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Applies transactions to an environment context.
//!
//! Validation errors (bad structure, signatures, hash) bubble up as
//! `ExecutionError` and invalidate the containing block. Runtime failures
//! (insufficient funds, gas exhaustion, contract exceptions, policy
//! rejections) are captured in the transaction output: the writes revert,
//! the fee consumed up to the failing step stays deducted, and the block
//! remains valid.

mod builtins;
mod host_impl;

use std::{str::FromStr, sync::Arc};

use bigdecimal::{BigDecimal, Zero};
use bywise_chain::models::{
    ContractCall,
    ContractEvent,
    Transaction,
    TransactionData,
    TransactionError,
    TransactionOutput,
    TransactionType,
};
use bywise_common_types::{format_amount, Address};
use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::host_impl::BlockchainBridge;
use crate::{
    abi::ContractRecord,
    config,
    fees::FeeCalculator,
    pool::{VmInstance, VmPool},
    state_store::{EnvironmentContext, EnvironmentError, EnvironmentStore},
    vm::{
        run_function,
        GasMeter,
        HostCallRecord,
        RecordingBridge,
        ReplayBridge,
        Value,
        DEFAULT_GAS_LIMIT,
    },
};

const LOG_TARGET: &str = "bywise::engine::executor";

/// Absolute per-transaction execution cutoff.
const TX_EXECUTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

pub fn balance_key(addr: &Address) -> String {
    format!("wallet:{addr}:balance")
}

pub fn wallet_info_key(addr: &Address) -> String {
    format!("wallet:{addr}:info")
}

pub fn admin_key(addr: &Address) -> String {
    format!("admin:{addr}")
}

pub fn validator_key(addr: &Address) -> String {
    format!("validator:{addr}")
}

pub fn contract_key(addr: &Address) -> String {
    format!("contract:{addr}")
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Validation(#[from] TransactionError),
    #[error("transaction belongs to chain {0}")]
    WrongChain(String),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

/// Per-execution parameters, fixed for all transactions of one slice.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub block_height: u64,
    /// The slice proposer; part of the randomness seed.
    pub proposer: Address,
    pub simulate: bool,
    /// Fee-estimation mode: also skips the sender balance checks.
    pub simulate_wallet: bool,
}

impl ExecutionContext {
    pub fn for_block(block_height: u64, proposer: Address) -> Self {
        Self {
            block_height,
            proposer,
            simulate: false,
            simulate_wallet: false,
        }
    }

    pub fn simulation(block_height: u64, proposer: Address, simulate_wallet: bool) -> Self {
        Self {
            block_height,
            proposer,
            simulate: true,
            simulate_wallet,
        }
    }
}

/// Wallet metadata blob under `wallet:<addr>:info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub nonce: u64,
}

/// The per-call entry stored in `output.payload[i]` for `CONTRACT_EXE`
/// transactions: the returned value plus the replayable host call log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallPayload {
    #[serde(rename = "return")]
    pub return_value: serde_json::Value,
    pub calls: Vec<HostCallRecord>,
}

enum StepFailure {
    Runtime { error: String, cost: u64 },
}

pub struct TransactionExecutor {
    env: Arc<EnvironmentStore>,
    pool: VmPool,
    gas_limit: u64,
}

impl TransactionExecutor {
    pub fn new(env: Arc<EnvironmentStore>, pool: VmPool) -> Self {
        Self {
            env,
            pool,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn env(&self) -> &Arc<EnvironmentStore> {
        &self.env
    }

    /// Executes one transaction against `ctx`. `Err` means the transaction
    /// must never have entered a block (the block is invalid); `Ok` with
    /// `output.error` set is a recorded failure.
    pub fn execute(
        &self,
        ctx: &mut EnvironmentContext,
        exec: &ExecutionContext,
        tx: &Transaction,
    ) -> Result<TransactionOutput, ExecutionError> {
        if tx.chain != self.env.chain() {
            return Err(ExecutionError::WrongChain(tx.chain.clone()));
        }
        if exec.simulate {
            tx.validate_structure()?;
        } else {
            tx.validate()?;
        }

        let params = config::params_at(&self.env, ctx, exec.block_height)?;
        let calc = FeeCalculator::new(params);
        let total = tx.sum_amounts()?;
        let declared_fee = tx.fee_amount()?;
        let sender = tx.from[0].clone();
        let nonce = self.wallet_info(ctx, &sender)?.nonce;

        if !exec.simulate_wallet {
            let balance = self.balance_of(ctx, &sender)?;
            if balance < &total + &declared_fee {
                let checkpoint = ctx.checkpoint();
                return Ok(self.failed_output(ctx, exec, tx, &calc, &total, checkpoint, StepFailure::Runtime {
                    error: "insufficient funds".to_string(),
                    cost: 0,
                })?);
            }
        }

        let checkpoint = ctx.checkpoint();
        let mut logs = Vec::new();
        let mut events = Vec::new();
        let mut payload = Vec::new();
        let mut meter = GasMeter::new(self.gas_limit)
            .with_deadline(std::time::Instant::now() + TX_EXECUTION_TIMEOUT);

        let step = self.dispatch(ctx, exec, tx, &total, nonce, &mut meter, &mut logs, &mut events, &mut payload);
        let cost = meter.gas_used();

        if let Err(failure) = step {
            return Ok(self.failed_output(ctx, exec, tx, &calc, &total, checkpoint, failure)?);
        }

        let fee_used = calc.fee_used(exec.block_height, &total, tx.canonical_size(), cost);
        if !exec.simulate_wallet {
            if declared_fee < fee_used {
                return Ok(self.failed_output(ctx, exec, tx, &calc, &total, checkpoint, StepFailure::Runtime {
                    error: "insufficient fee".to_string(),
                    cost,
                })?);
            }
            let balance = self.balance_of(ctx, &sender)?;
            if balance < fee_used {
                return Ok(self.failed_output(ctx, exec, tx, &calc, &total, checkpoint, StepFailure::Runtime {
                    error: "insufficient funds".to_string(),
                    cost,
                })?);
            }
            self.set_balance(ctx, &sender, &(balance - &fee_used));
        }
        self.bump_nonce(ctx, &sender, nonce)?;

        Ok(TransactionOutput {
            cost,
            fee_used: format_amount(&fee_used),
            logs,
            events,
            payload,
            error: None,
            ctx: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        ctx: &mut EnvironmentContext,
        exec: &ExecutionContext,
        tx: &Transaction,
        total: &BigDecimal,
        nonce: u64,
        meter: &mut GasMeter,
        logs: &mut Vec<String>,
        events: &mut Vec<ContractEvent>,
        payload: &mut Vec<String>,
    ) -> Result<(), StepFailure> {
        match (&tx.tx_type, &tx.data) {
            (TransactionType::None, TransactionData::None) => {
                self.move_amounts(ctx, exec, tx, total)
            },
            (TransactionType::Command, TransactionData::Command { name, input }) => {
                let sender = &tx.from[0];
                if !self.flag_set(ctx, &admin_key(sender)) {
                    return Err(StepFailure::Runtime {
                        error: "admin required".to_string(),
                        cost: 0,
                    });
                }
                builtins::run_command(&self.env, ctx, name, input, exec.block_height)
                    .map_err(|error| StepFailure::Runtime { error, cost: 0 })
            },
            (TransactionType::BlockchainCommand, TransactionData::BlockchainCommand { name, input }) => {
                if exec.block_height != 0 {
                    debug!(
                        target: LOG_TARGET,
                        "ignoring BLOCKCHAIN_COMMAND {} outside genesis", name
                    );
                    return Ok(());
                }
                builtins::run_command(&self.env, ctx, name, input, 0)
                    .map_err(|error| StepFailure::Runtime { error, cost: 0 })
            },
            (TransactionType::Contract, TransactionData::Contract { code }) => {
                let contract_addr = &tx.to[0];
                if !contract_addr.is_contract() {
                    return Err(StepFailure::Runtime {
                        error: format!("{contract_addr} is not a contract address"),
                        cost: 0,
                    });
                }
                if self.env_get(ctx, &contract_key(contract_addr))?.is_some() {
                    return Err(StepFailure::Runtime {
                        error: format!("contract {contract_addr} already exists"),
                        cost: 0,
                    });
                }
                let record = ContractRecord::compile(code, exec.block_height).map_err(|e| {
                    StepFailure::Runtime {
                        error: e.to_string(),
                        cost: 0,
                    }
                })?;
                self.move_amounts(ctx, exec, tx, total)?;
                let raw = serde_json::to_string(&record).map_err(|e| StepFailure::Runtime {
                    error: e.to_string(),
                    cost: 0,
                })?;
                self.env.set(ctx, contract_key(contract_addr), raw);
                info!(target: LOG_TARGET, "📜 deployed contract {}", contract_addr);
                Ok(())
            },
            (TransactionType::ContractExe, TransactionData::ContractExe { calls }) => {
                self.move_amounts(ctx, exec, tx, total)?;
                let mut instance = self.pool.acquire();
                let result =
                    self.run_calls(ctx, exec, tx, calls, nonce, &mut instance, meter, logs, events, payload);
                self.pool.release(instance);
                result
            },
            // validate_structure rejects every other pairing before this point
            _ => Err(StepFailure::Runtime {
                error: "data does not match transaction type".to_string(),
                cost: 0,
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_calls(
        &self,
        ctx: &mut EnvironmentContext,
        exec: &ExecutionContext,
        tx: &Transaction,
        calls: &[ContractCall],
        nonce: u64,
        instance: &mut VmInstance,
        meter: &mut GasMeter,
        logs: &mut Vec<String>,
        events: &mut Vec<ContractEvent>,
        payload: &mut Vec<String>,
    ) -> Result<(), StepFailure> {
        for (i, call) in calls.iter().enumerate() {
            let contract_addr = &tx.to[i];
            let amount = &tx.amount[i];
            let has_amount = BigDecimal::from_str(amount)
                .map(|a| !a.is_zero())
                .unwrap_or(false);

            let record = self.load_contract(ctx, contract_addr).map_err(|error| {
                StepFailure::Runtime {
                    error,
                    cost: meter.gas_used(),
                }
            })?;
            let method = match record.abi.method(&call.method) {
                Some(m) => m.clone(),
                None => {
                    return Err(StepFailure::Runtime {
                        error: format!("{contract_addr} has no method {}", call.method),
                        cost: meter.gas_used(),
                    })
                },
            };
            if has_amount && !method.payable {
                return Err(StepFailure::Runtime {
                    error: format!("method {} is not payable", method.name),
                    cost: meter.gas_used(),
                });
            }

            let program = instance.load(&record.code).map_err(|e| StepFailure::Runtime {
                error: e.to_string(),
                cost: meter.gas_used(),
            })?;
            let args: Vec<Value> = call.inputs.iter().map(|s| Value::parse_input(s)).collect();

            let mut bridge = BlockchainBridge::new(
                &self.env,
                ctx,
                tx,
                exec,
                instance,
                contract_addr.clone(),
                amount.clone(),
                method.view,
                nonce,
                logs,
                events,
            );
            let mut recorder = RecordingBridge::new(&mut bridge);
            let result = run_function(&program, &method.name, args, &mut recorder, meter);
            let log = recorder.into_log();
            match result {
                Ok(value) => {
                    let entry = CallPayload {
                        return_value: value.to_json(),
                        calls: log,
                    };
                    payload.push(serde_json::to_string(&entry).map_err(|e| StepFailure::Runtime {
                        error: e.to_string(),
                        cost: meter.gas_used(),
                    })?);
                },
                Err(e) => {
                    return Err(StepFailure::Runtime {
                        error: e.to_string(),
                        cost: meter.gas_used(),
                    })
                },
            }
        }
        Ok(())
    }

    /// Re-runs a `CONTRACT_EXE` transaction against its recorded call logs.
    /// Returns false when the recorded outputs cannot be reproduced, which
    /// marks the transaction INVALID during cross-node verification.
    pub fn verify_replay(
        &self,
        ctx: &EnvironmentContext,
        exec: &ExecutionContext,
        tx: &Transaction,
    ) -> Result<bool, ExecutionError> {
        let TransactionData::ContractExe { calls } = &tx.data else {
            return Ok(true);
        };
        let Some(output) = &tx.output else {
            return Ok(true);
        };
        if output.error.is_some() {
            return Ok(true);
        }
        if output.payload.len() != calls.len() {
            return Ok(false);
        }
        let mut instance = self.pool.acquire();
        let mut meter = GasMeter::new(self.gas_limit);
        let mut ok = true;
        for (i, call) in calls.iter().enumerate() {
            let Ok(entry) = serde_json::from_str::<CallPayload>(&output.payload[i]) else {
                ok = false;
                break;
            };
            let probe = ctx.clone();
            let Some(record) = self
                .env_get(&probe, &contract_key(&tx.to[i]))
                .ok()
                .flatten()
                .and_then(|raw| serde_json::from_str::<ContractRecord>(&raw).ok())
            else {
                ok = false;
                break;
            };
            let Ok(program) = instance.load(&record.code) else {
                ok = false;
                break;
            };
            let args: Vec<Value> = call.inputs.iter().map(|s| Value::parse_input(s)).collect();
            let mut replay = ReplayBridge::new(entry.calls);
            match run_function(&program, &call.method, args, &mut replay, &mut meter) {
                Ok(value) if value.to_json() == entry.return_value && replay.is_exhausted() => {},
                _ => {
                    ok = false;
                    break;
                },
            }
        }
        self.pool.release(instance);
        if !ok {
            warn!(target: LOG_TARGET, "🚫 replay divergence for tx {}", tx.hash);
        }
        Ok(ok)
    }

    fn move_amounts(
        &self,
        ctx: &mut EnvironmentContext,
        exec: &ExecutionContext,
        tx: &Transaction,
        total: &BigDecimal,
    ) -> Result<(), StepFailure> {
        let sender = &tx.from[0];
        if !exec.simulate_wallet {
            let balance = self.balance_of(ctx, sender).map_err(to_runtime)?;
            if &balance < total {
                return Err(StepFailure::Runtime {
                    error: "insufficient funds".to_string(),
                    cost: 0,
                });
            }
            self.set_balance(ctx, sender, &(balance - total));
        }
        for (to, amount) in tx.to.iter().zip(&tx.amount) {
            let amount = BigDecimal::from_str(amount).unwrap_or_default();
            if amount.is_zero() {
                continue;
            }
            let balance = self.balance_of(ctx, to).map_err(to_runtime)?;
            self.set_balance(ctx, to, &(balance + amount));
        }
        Ok(())
    }

    fn failed_output(
        &self,
        ctx: &mut EnvironmentContext,
        exec: &ExecutionContext,
        tx: &Transaction,
        calc: &FeeCalculator,
        total: &BigDecimal,
        checkpoint: crate::state_store::EnvDiff,
        failure: StepFailure,
    ) -> Result<TransactionOutput, ExecutionError> {
        let StepFailure::Runtime { error, cost } = failure;
        ctx.restore(checkpoint);
        let sender = &tx.from[0];
        let mut consumed = calc.fee_used(exec.block_height, total, tx.canonical_size(), cost);
        if !exec.simulate_wallet {
            let declared = tx.fee_amount().unwrap_or_default();
            if declared < consumed {
                consumed = declared;
            }
            let balance = self.balance_of(ctx, sender)?;
            if balance < consumed {
                consumed = balance.clone();
            }
            self.set_balance(ctx, sender, &(balance - &consumed));
        }
        let nonce = self.wallet_info(ctx, sender)?.nonce;
        self.bump_nonce(ctx, sender, nonce)?;
        info!(target: LOG_TARGET, "❌ tx {} failed: {}", tx.hash, error);
        Ok(TransactionOutput {
            cost,
            fee_used: format_amount(&consumed),
            logs: Vec::new(),
            events: Vec::new(),
            payload: Vec::new(),
            error: Some(error),
            ctx: None,
        })
    }

    fn env_get(&self, ctx: &EnvironmentContext, key: &str) -> Result<Option<String>, StepFailure> {
        self.env.get(ctx, key).map_err(to_runtime_env)
    }

    fn load_contract(&self, ctx: &EnvironmentContext, addr: &Address) -> Result<ContractRecord, String> {
        let raw = self
            .env
            .get(ctx, &contract_key(addr))
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("unknown contract {addr}"))?;
        serde_json::from_str(&raw).map_err(|e| format!("corrupt contract record: {e}"))
    }

    fn flag_set(&self, ctx: &EnvironmentContext, key: &str) -> bool {
        matches!(self.env.get(ctx, key), Ok(Some(_)))
    }

    pub fn is_admin(&self, ctx: &EnvironmentContext, addr: &Address) -> bool {
        self.flag_set(ctx, &admin_key(addr))
    }

    pub fn is_validator(&self, ctx: &EnvironmentContext, addr: &Address) -> bool {
        self.flag_set(ctx, &validator_key(addr))
    }

    /// Every address holding the validator flag, through the overlay chain.
    pub fn validators(&self, ctx: &EnvironmentContext) -> Result<Vec<Address>, ExecutionError> {
        let entries = self.env.scan(ctx, "validator:")?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix("validator:").and_then(|s| Address::parse(s).ok()))
            .collect())
    }

    pub fn balance_of(
        &self,
        ctx: &EnvironmentContext,
        addr: &Address,
    ) -> Result<BigDecimal, ExecutionError> {
        Ok(self
            .env
            .get(ctx, &balance_key(addr))?
            .and_then(|v| BigDecimal::from_str(&v).ok())
            .unwrap_or_default())
    }

    fn set_balance(&self, ctx: &mut EnvironmentContext, addr: &Address, value: &BigDecimal) {
        self.env.set(ctx, balance_key(addr), format_amount(value));
    }

    pub fn wallet_info(
        &self,
        ctx: &EnvironmentContext,
        addr: &Address,
    ) -> Result<WalletInfo, ExecutionError> {
        Ok(self
            .env
            .get(ctx, &wallet_info_key(addr))?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default())
    }

    fn bump_nonce(
        &self,
        ctx: &mut EnvironmentContext,
        addr: &Address,
        nonce: u64,
    ) -> Result<(), ExecutionError> {
        let info = WalletInfo { nonce: nonce + 1 };
        // plain struct, encoding cannot fail
        let raw = serde_json::to_string(&info).expect("wallet info encoding");
        self.env.set(ctx, wallet_info_key(addr), raw);
        Ok(())
    }
}

fn to_runtime(e: ExecutionError) -> StepFailure {
    StepFailure::Runtime {
        error: e.to_string(),
        cost: 0,
    }
}

fn to_runtime_env(e: EnvironmentError) -> StepFailure {
    StepFailure::Runtime {
        error: e.to_string(),
        cost: 0,
    }
}
