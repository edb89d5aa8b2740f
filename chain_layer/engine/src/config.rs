//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! Chain parameter resolution.
//!
//! `config:<name>` holds the full change history of a parameter as a JSON
//! array of `{h, v}` entries, appended by `setConfig`. A change committed at
//! block `h` activates at heights `>= h + CONFIG_ACTIVATION_DELAY`; genesis
//! entries (`h = 0`) are active immediately.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::state_store::{EnvironmentContext, EnvironmentError, EnvironmentStore};

/// Parameter changes take effect 100 blocks after the block that committed
/// them.
pub const CONFIG_ACTIVATION_DELAY: u64 = 100;

pub const CONFIG_BLOCK_TIME: &str = "blockTime";
pub const CONFIG_FEE_BASIC: &str = "feeBasic";
pub const CONFIG_FEE_COEF_AMOUNT: &str = "feeCoefAmount";
pub const CONFIG_FEE_COEF_SIZE: &str = "feeCoefSize";
pub const CONFIG_FEE_COEF_COST: &str = "feeCoefCost";
pub const CONFIG_IMMUTABLE_WINDOW: &str = "immutableWindow";

pub const DEFAULT_BLOCK_TIME_SECS: u64 = 30;
pub const DEFAULT_IMMUTABLE_WINDOW: u64 = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEntry {
    h: u64,
    v: String,
}

/// The resolved parameter set at a given height.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainParams {
    pub block_time_secs: u64,
    pub fee_basic: BigDecimal,
    pub fee_coef_amount: BigDecimal,
    pub fee_coef_size: BigDecimal,
    pub fee_coef_cost: BigDecimal,
    pub immutable_window: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_time_secs: DEFAULT_BLOCK_TIME_SECS,
            fee_basic: BigDecimal::default(),
            fee_coef_amount: BigDecimal::default(),
            fee_coef_size: BigDecimal::default(),
            fee_coef_cost: BigDecimal::default(),
            immutable_window: DEFAULT_IMMUTABLE_WINDOW,
        }
    }
}

fn config_key(name: &str) -> String {
    format!("config:{name}")
}

/// The active value of `name` at `height`, or `None` when the parameter was
/// never set (callers fall back to their default).
pub fn resolve(
    env: &EnvironmentStore,
    ctx: &EnvironmentContext,
    name: &str,
    height: u64,
) -> Result<Option<String>, EnvironmentError> {
    let Some(raw) = env.get(ctx, &config_key(name))? else {
        return Ok(None);
    };
    let entries: Vec<ConfigEntry> = serde_json::from_str(&raw).unwrap_or_default();
    Ok(entries
        .iter()
        .rev()
        .find(|e| height >= activation_height(e.h))
        .map(|e| e.v.clone()))
}

/// Appends a history entry for `name`, committed at `committed_height`.
pub fn append(
    env: &EnvironmentStore,
    ctx: &mut EnvironmentContext,
    name: &str,
    value: impl Into<String>,
    committed_height: u64,
) -> Result<(), EnvironmentError> {
    let key = config_key(name);
    let mut entries: Vec<ConfigEntry> = match env.get(ctx, &key)? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        None => Vec::new(),
    };
    entries.push(ConfigEntry {
        h: committed_height,
        v: value.into(),
    });
    // The writer is in-memory; serialization of these entries cannot fail.
    let raw = serde_json::to_string(&entries).expect("config history encoding");
    env.set(ctx, key, raw);
    Ok(())
}

fn activation_height(committed: u64) -> u64 {
    if committed == 0 {
        0
    } else {
        committed + CONFIG_ACTIVATION_DELAY
    }
}

/// Resolves the full parameter set at `height`, with defaults for anything
/// unset or unparsable.
pub fn params_at(
    env: &EnvironmentStore,
    ctx: &EnvironmentContext,
    height: u64,
) -> Result<ChainParams, EnvironmentError> {
    let mut params = ChainParams::default();
    if let Some(v) = resolve(env, ctx, CONFIG_BLOCK_TIME, height)? {
        if let Ok(secs) = v.parse() {
            params.block_time_secs = secs;
        }
    }
    if let Some(v) = resolve(env, ctx, CONFIG_FEE_BASIC, height)? {
        if let Ok(d) = BigDecimal::from_str(&v) {
            params.fee_basic = d;
        }
    }
    if let Some(v) = resolve(env, ctx, CONFIG_FEE_COEF_AMOUNT, height)? {
        if let Ok(d) = BigDecimal::from_str(&v) {
            params.fee_coef_amount = d;
        }
    }
    if let Some(v) = resolve(env, ctx, CONFIG_FEE_COEF_SIZE, height)? {
        if let Ok(d) = BigDecimal::from_str(&v) {
            params.fee_coef_size = d;
        }
    }
    if let Some(v) = resolve(env, ctx, CONFIG_FEE_COEF_COST, height)? {
        if let Ok(d) = BigDecimal::from_str(&v) {
            params.fee_coef_cost = d;
        }
    }
    if let Some(v) = resolve(env, ctx, CONFIG_IMMUTABLE_WINDOW, height)? {
        if let Ok(w) = v.parse() {
            params.immutable_window = w;
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bywise_chain::storage::{EnvRepository, MemoryKvStore};
    use bywise_common_types::Hash;

    use super::*;

    fn env() -> EnvironmentStore {
        EnvironmentStore::new("main", EnvRepository::new(Arc::new(MemoryKvStore::new()))).unwrap()
    }

    #[test]
    fn genesis_entries_are_active_immediately() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        append(&store, &mut ctx, CONFIG_BLOCK_TIME, "3", 0).unwrap();
        assert_eq!(resolve(&store, &ctx, CONFIG_BLOCK_TIME, 0).unwrap().unwrap(), "3");
        assert_eq!(params_at(&store, &ctx, 1).unwrap().block_time_secs, 3);
    }

    #[test]
    fn later_changes_wait_a_hundred_blocks() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        append(&store, &mut ctx, CONFIG_FEE_BASIC, "0.1", 50).unwrap();

        // ten blocks on: still the previous value (unset → None)
        assert_eq!(resolve(&store, &ctx, CONFIG_FEE_BASIC, 60).unwrap(), None);
        assert_eq!(resolve(&store, &ctx, CONFIG_FEE_BASIC, 149).unwrap(), None);
        // a hundred blocks after the commit: active
        assert_eq!(
            resolve(&store, &ctx, CONFIG_FEE_BASIC, 150).unwrap().unwrap(),
            "0.1"
        );
    }

    #[test]
    fn history_keeps_the_previous_value_resolvable() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        append(&store, &mut ctx, CONFIG_FEE_BASIC, "0.1", 0).unwrap();
        append(&store, &mut ctx, CONFIG_FEE_BASIC, "0.2", 200).unwrap();

        assert_eq!(resolve(&store, &ctx, CONFIG_FEE_BASIC, 250).unwrap().unwrap(), "0.1");
        assert_eq!(resolve(&store, &ctx, CONFIG_FEE_BASIC, 300).unwrap().unwrap(), "0.2");
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let store = env();
        let mut ctx = EnvironmentContext::at(Hash::zero());
        append(&store, &mut ctx, CONFIG_BLOCK_TIME, "not-a-number", 0).unwrap();
        assert_eq!(
            params_at(&store, &ctx, 1).unwrap().block_time_secs,
            DEFAULT_BLOCK_TIME_SECS
        );
    }
}
