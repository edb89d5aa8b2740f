//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Named builtins reachable through `COMMAND` transactions (admin-gated) and
//! `BLOCKCHAIN_COMMAND` transactions in genesis.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use bywise_common_types::{format_amount, parse_amount, Address};

use crate::{
    config,
    executor::{admin_key, balance_key, validator_key},
    state_store::{EnvironmentContext, EnvironmentStore},
};

/// Runs one builtin. Errors are runtime failures: the transaction is marked
/// FAILED and its writes revert, the block stays valid.
pub fn run_command(
    env: &EnvironmentStore,
    ctx: &mut EnvironmentContext,
    name: &str,
    input: &[String],
    block_height: u64,
) -> Result<(), String> {
    match name {
        "setBalance" => {
            let (addr, amount) = addr_amount(input, name)?;
            env.set(ctx, balance_key(&addr), format_amount(&amount));
            Ok(())
        },
        "addBalance" => {
            let (addr, amount) = addr_amount(input, name)?;
            let current = read_balance(env, ctx, &addr)?;
            env.set(ctx, balance_key(&addr), format_amount(&(current + amount)));
            Ok(())
        },
        "subBalance" => {
            let (addr, amount) = addr_amount(input, name)?;
            let current = read_balance(env, ctx, &addr)?;
            if current < amount {
                return Err("insufficient funds".to_string());
            }
            env.set(ctx, balance_key(&addr), format_amount(&(current - amount)));
            Ok(())
        },
        "setConfig" => {
            let [config_name, value] = two_args(input, name)?;
            config::append(env, ctx, config_name, value.clone(), block_height)
                .map_err(|e| e.to_string())
        },
        "addAdmin" => {
            let addr = one_address(input, name)?;
            env.set(ctx, admin_key(&addr), "true");
            Ok(())
        },
        "removeAdmin" => {
            let addr = one_address(input, name)?;
            env.delete(ctx, admin_key(&addr));
            Ok(())
        },
        "addValidator" => {
            let addr = one_address(input, name)?;
            env.set(ctx, validator_key(&addr), "true");
            Ok(())
        },
        "removeValidator" => {
            let addr = one_address(input, name)?;
            env.delete(ctx, validator_key(&addr));
            Ok(())
        },
        other => Err(format!("unknown command {other}")),
    }
}

fn two_args<'a>(input: &'a [String], name: &str) -> Result<[&'a String; 2], String> {
    match input {
        [a, b] => Ok([a, b]),
        _ => Err(format!("{name} expects 2 arguments, got {}", input.len())),
    }
}

fn one_address(input: &[String], name: &str) -> Result<Address, String> {
    match input {
        [addr] => Address::parse(addr).map_err(|e| format!("{name}: {e}")),
        _ => Err(format!("{name} expects 1 argument, got {}", input.len())),
    }
}

fn addr_amount(input: &[String], name: &str) -> Result<(Address, BigDecimal), String> {
    let [addr, amount] = two_args(input, name)?;
    let addr = Address::parse(addr).map_err(|e| format!("{name}: {e}"))?;
    let amount = parse_amount(amount).map_err(|e| format!("{name}: {e}"))?;
    Ok((addr, amount))
}

fn read_balance(
    env: &EnvironmentStore,
    ctx: &EnvironmentContext,
    addr: &Address,
) -> Result<BigDecimal, String> {
    Ok(env
        .get(ctx, &balance_key(addr))
        .map_err(|e| e.to_string())?
        .and_then(|v| BigDecimal::from_str(&v).ok())
        .unwrap_or_default())
}
