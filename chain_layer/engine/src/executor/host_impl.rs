//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The live host bridge: implements the `blockchain` capability set over an
//! environment context. All determinism requirements funnel through here —
//! the clock is `tx.created`, randomness is seeded from
//! `(proposer : nonce : tx hash)`, and storage ids derive from the tx hash.

use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use bywise_chain::models::{ContractEvent, EventEntry, Transaction};
use bywise_common_types::{format_amount, storage_id_hasher, Address, Hash};
use rand::{RngCore, SeedableRng};

use crate::{
    abi::ContractRecord,
    executor::{balance_key, contract_key, ExecutionContext},
    pool::VmInstance,
    state_store::{EnvironmentContext, EnvironmentStore},
    vm::{run_function, GasMeter, HostBridge, Value, VmError, REENTRY_LIMIT},
};

pub struct BlockchainBridge<'a> {
    env: &'a EnvironmentStore,
    ctx: &'a mut EnvironmentContext,
    tx: &'a Transaction,
    exec: &'a ExecutionContext,
    instance: &'a mut VmInstance,
    contract: Address,
    call_amount: String,
    view_mode: bool,
    depth: usize,
    logs: &'a mut Vec<String>,
    events: &'a mut Vec<ContractEvent>,
    rng: rand::rngs::StdRng,
    id_counter: u64,
}

impl<'a> BlockchainBridge<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: &'a EnvironmentStore,
        ctx: &'a mut EnvironmentContext,
        tx: &'a Transaction,
        exec: &'a ExecutionContext,
        instance: &'a mut VmInstance,
        contract: Address,
        call_amount: String,
        view_mode: bool,
        nonce: u64,
        logs: &'a mut Vec<String>,
        events: &'a mut Vec<ContractEvent>,
    ) -> Self {
        let seed = storage_id_hasher()
            .chain(&exec.proposer)
            .chain(&nonce)
            .chain(&tx.hash)
            .finalize();
        Self {
            env,
            ctx,
            tx,
            exec,
            instance,
            contract,
            call_amount,
            view_mode,
            depth: 0,
            logs,
            events,
            rng: rand::rngs::StdRng::from_seed(*seed.as_bytes()),
            id_counter: 0,
        }
    }

    fn guard_write(&self, method: &str) -> Result<(), VmError> {
        if self.view_mode {
            return Err(VmError::ViewWrite(method.to_string()));
        }
        Ok(())
    }

    fn storage_key(&self, space: &str, key: &str) -> String {
        format!("storage:{}:{}:{}", self.contract, space, key)
    }

    fn get_env(&self, key: &str) -> Result<Option<String>, VmError> {
        self.env.get(self.ctx, key).map_err(|e| VmError::Host(e.to_string()))
    }

    fn arg<'v>(args: &'v [Value], index: usize, method: &str) -> Result<&'v Value, VmError> {
        args.get(index)
            .ok_or_else(|| VmError::Host(format!("{method}: missing argument {index}")))
    }

    fn address_arg(args: &[Value], index: usize, method: &str) -> Result<Address, VmError> {
        let raw = Self::arg(args, index, method)?.as_str()?;
        Address::parse(raw).map_err(|e| VmError::Host(format!("{method}: {e}")))
    }

    fn amount_arg(args: &[Value], index: usize, method: &str) -> Result<BigDecimal, VmError> {
        let value = Self::arg(args, index, method)?;
        let amount = match value {
            Value::Int(n) => BigDecimal::from(*n),
            Value::Str(s) => BigDecimal::from_str(s)
                .map_err(|_| VmError::Host(format!("{method}: invalid amount {s}")))?,
            other => {
                return Err(VmError::Type(format!(
                    "{method}: expected amount, got {}",
                    other.type_name()
                )))
            },
        };
        if amount < BigDecimal::zero() {
            return Err(VmError::Host(format!("{method}: negative amount")));
        }
        Ok(amount)
    }

    fn balance_of(&self, addr: &Address) -> Result<BigDecimal, VmError> {
        Ok(self
            .get_env(&balance_key(addr))?
            .and_then(|v| BigDecimal::from_str(&v).ok())
            .unwrap_or_default())
    }

    fn new_storage_id(&mut self) -> String {
        self.id_counter += 1;
        let digest = storage_id_hasher()
            .chain(&self.tx.hash)
            .chain(&self.contract)
            .chain(&self.id_counter)
            .finalize();
        digest.to_hex()[..16].to_string()
    }

    fn load_contract(&self, addr: &Address) -> Result<ContractRecord, VmError> {
        let raw = self
            .get_env(&contract_key(addr))?
            .ok_or_else(|| VmError::Host(format!("unknown contract {addr}")))?;
        serde_json::from_str(&raw).map_err(|e| VmError::Host(format!("corrupt contract record: {e}")))
    }

    fn list_len(&self, list: &str) -> Result<i64, VmError> {
        Ok(self
            .get_env(&self.storage_key(list, "len"))?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    fn call_external(
        &mut self,
        args: &[Value],
        meter: &mut GasMeter,
    ) -> Result<Value, VmError> {
        if self.depth + 1 > REENTRY_LIMIT {
            return Err(VmError::ReentryLimit);
        }
        let target = Self::address_arg(args, 0, "externalContract")?;
        let method_name = Self::arg(args, 1, "externalContract")?.as_str()?.to_string();
        let call_args: Vec<Value> = args[2..].to_vec();

        let record = self.load_contract(&target)?;
        let method = record
            .abi
            .method(&method_name)
            .ok_or_else(|| VmError::Host(format!("{target} has no method {method_name}")))?
            .clone();
        let program = self.instance.load(&record.code)?;

        let saved_contract = std::mem::replace(&mut self.contract, target);
        let saved_view = self.view_mode;
        let saved_amount = std::mem::replace(&mut self.call_amount, "0".to_string());
        self.view_mode = saved_view || method.view;
        self.depth += 1;
        let result = run_function(&program, &method.name, call_args, self, meter);
        self.depth -= 1;
        self.contract = saved_contract;
        self.view_mode = saved_view;
        self.call_amount = saved_amount;
        result
    }
}

impl HostBridge for BlockchainBridge<'_> {
    fn call(&mut self, method: &str, args: &[Value], meter: &mut GasMeter) -> Result<Value, VmError> {
        match method {
            "getTxSender" => Ok(Value::Str(self.tx.from[0].to_string())),
            "getTxAmount" => Ok(Value::Str(self.call_amount.clone())),
            "getChain" => Ok(Value::Str(self.tx.chain.clone())),
            "getTxCreated" => Ok(Value::Int(self.tx.created as i64)),
            "getTx" => {
                let json = serde_json::to_string(self.tx).map_err(|e| VmError::Host(e.to_string()))?;
                Ok(Value::Str(json))
            },
            "getBlockHeight" => Ok(Value::Int(self.exec.block_height as i64)),
            "getThisAddress" => Ok(Value::Str(self.contract.to_string())),
            "log" => {
                let line: Vec<String> = args.iter().map(|v| v.render()).collect();
                self.logs.push(line.join(" "));
                Ok(Value::Null)
            },
            "emitEvent" => {
                self.guard_write(method)?;
                let name = Self::arg(args, 0, method)?.as_str()?.to_string();
                let mut entries = Vec::new();
                let mut i = 1;
                while i < args.len() {
                    let key = Self::arg(args, i, method)?.render();
                    let value = Self::arg(args, i + 1, method)?.render();
                    entries.push(EventEntry { key, value });
                    i += 2;
                }
                self.events.push(ContractEvent {
                    contract: self.contract.clone(),
                    name,
                    entries,
                    tx_hash: self.tx.hash,
                    block_height: self.exec.block_height,
                });
                Ok(Value::Null)
            },
            "externalContract" => self.call_external(args, meter),
            "balanceOf" => {
                let addr = Self::address_arg(args, 0, method)?;
                Ok(Value::Str(format_amount(&self.balance_of(&addr)?)))
            },
            "balanceTransfer" => {
                self.guard_write(method)?;
                let to = Self::address_arg(args, 0, method)?;
                let amount = Self::amount_arg(args, 1, method)?;
                let from_balance = self.balance_of(&self.contract)?;
                if from_balance < amount {
                    return Err(VmError::Host("insufficient funds".to_string()));
                }
                let to_balance = self.balance_of(&to)?;
                let contract = self.contract.clone();
                self.env.set(
                    self.ctx,
                    balance_key(&contract),
                    format_amount(&(from_balance - &amount)),
                );
                self.env
                    .set(self.ctx, balance_key(&to), format_amount(&(to_balance + amount)));
                Ok(Value::Null)
            },
            "valueSet" => {
                self.guard_write(method)?;
                let key = Self::arg(args, 0, method)?.render();
                let value = Self::arg(args, 1, method)?.render();
                let storage = self.storage_key("value", &key);
                self.env.set(self.ctx, storage, value);
                Ok(Value::Null)
            },
            "valueGet" => {
                let key = Self::arg(args, 0, method)?.render();
                match self.get_env(&self.storage_key("value", &key))? {
                    Some(value) => Ok(Value::Str(value)),
                    None => Ok(Value::Null),
                }
            },
            "mapNew" => {
                self.guard_write(method)?;
                Ok(Value::Str(self.new_storage_id()))
            },
            "mapSet" => {
                self.guard_write(method)?;
                let map = Self::arg(args, 0, method)?.as_str()?.to_string();
                let key = Self::arg(args, 1, method)?.render();
                let value = Self::arg(args, 2, method)?.render();
                let storage = self.storage_key(&map, &key);
                self.env.set(self.ctx, storage, value);
                Ok(Value::Null)
            },
            "mapGet" => {
                let map = Self::arg(args, 0, method)?.as_str()?.to_string();
                let key = Self::arg(args, 1, method)?.render();
                match self.get_env(&self.storage_key(&map, &key))? {
                    Some(value) => Ok(Value::Str(value)),
                    None => Ok(Value::Null),
                }
            },
            "mapHas" => {
                let map = Self::arg(args, 0, method)?.as_str()?.to_string();
                let key = Self::arg(args, 1, method)?.render();
                Ok(Value::Bool(self.get_env(&self.storage_key(&map, &key))?.is_some()))
            },
            "mapDel" => {
                self.guard_write(method)?;
                let map = Self::arg(args, 0, method)?.as_str()?.to_string();
                let key = Self::arg(args, 1, method)?.render();
                let storage = self.storage_key(&map, &key);
                self.env.delete(self.ctx, storage);
                Ok(Value::Null)
            },
            "listNew" => {
                self.guard_write(method)?;
                Ok(Value::Str(self.new_storage_id()))
            },
            "listSize" => {
                let list = Self::arg(args, 0, method)?.as_str()?.to_string();
                Ok(Value::Int(self.list_len(&list)?))
            },
            "listGet" => {
                let list = Self::arg(args, 0, method)?.as_str()?.to_string();
                let index = Self::arg(args, 1, method)?.as_int()?;
                let len = self.list_len(&list)?;
                if index < 0 || index >= len {
                    return Err(VmError::IndexOutOfBounds {
                        index,
                        len: len as usize,
                    });
                }
                match self.get_env(&self.storage_key(&list, &index.to_string()))? {
                    Some(value) => Ok(Value::Str(value)),
                    None => Ok(Value::Null),
                }
            },
            "listSet" => {
                self.guard_write(method)?;
                let list = Self::arg(args, 0, method)?.as_str()?.to_string();
                let index = Self::arg(args, 1, method)?.as_int()?;
                let value = Self::arg(args, 2, method)?.render();
                let len = self.list_len(&list)?;
                if index < 0 || index >= len {
                    return Err(VmError::IndexOutOfBounds {
                        index,
                        len: len as usize,
                    });
                }
                let storage = self.storage_key(&list, &index.to_string());
                self.env.set(self.ctx, storage, value);
                Ok(Value::Null)
            },
            "listPush" => {
                self.guard_write(method)?;
                let list = Self::arg(args, 0, method)?.as_str()?.to_string();
                let value = Self::arg(args, 1, method)?.render();
                let len = self.list_len(&list)?;
                let entry = self.storage_key(&list, &len.to_string());
                self.env.set(self.ctx, entry, value);
                let len_key = self.storage_key(&list, "len");
                self.env.set(self.ctx, len_key, (len + 1).to_string());
                Ok(Value::Null)
            },
            "listPop" => {
                self.guard_write(method)?;
                let list = Self::arg(args, 0, method)?.as_str()?.to_string();
                let len = self.list_len(&list)?;
                if len == 0 {
                    return Ok(Value::Null);
                }
                let entry_key = self.storage_key(&list, &(len - 1).to_string());
                let value = self.get_env(&entry_key)?;
                self.env.delete(self.ctx, entry_key);
                let len_key = self.storage_key(&list, "len");
                self.env.set(self.ctx, len_key, (len - 1).to_string());
                Ok(value.map(Value::Str).unwrap_or(Value::Null))
            },
            "getRandom" => {
                let value = self.rng.next_u32();
                Ok(Value::Int(value as i64))
            },
            other => Err(VmError::UnknownHostMethod(other.to_string())),
        }
    }
}

/// Derives the deterministic randomness seed components for tests.
pub fn random_seed(proposer: &Address, nonce: u64, tx_hash: &Hash) -> Hash {
    storage_id_hasher()
        .chain(proposer)
        .chain(&nonce)
        .chain(tx_hash)
        .finalize()
}
