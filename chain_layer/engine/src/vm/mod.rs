//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The contract virtual machine: a deterministic, single-threaded tree
//! interpreter for Bywise Contract Script (BCS), a small JS-like language.
//!
//! Gas model: every AST node evaluated is one cycle; an interrupt fires every
//! 1024 cycles and charges one gas unit, checking the budget. Every host
//! bridge call charges a flat 7 gas. Exhaustion raises `Interrupted` and the
//! transaction reverts, keeping the fee consumed so far.

mod ast;
mod host;
mod interpreter;
mod parser;
mod token;
mod value;

pub use ast::{Function, Program};
pub use host::{HostBridge, HostCallRecord, NullBridge, RecordingBridge, ReplayBridge};
pub use interpreter::run_function;
pub use parser::parse;
pub use value::Value;

use thiserror::Error;

/// One gas unit per this many cycles, charged by the interrupt handler.
pub const INTERRUPT_INTERVAL: u64 = 1024;
/// Flat charge per host bridge call.
pub const HOST_CALL_GAS: u64 = 7;
/// Default per-transaction gas budget.
pub const DEFAULT_GAS_LIMIT: u64 = 1000;
/// Total value allocation allowed per contract frame.
pub const MEMORY_LIMIT_BYTES: usize = 640 * 1024;
/// Local function call depth inside one contract.
pub const STACK_LIMIT: usize = 64;
/// Cross-contract re-entry depth.
pub const REENTRY_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown identifier {0}")]
    UnknownIdentifier(String),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("function {name} expects {expected} arguments, got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("interrupted")]
    Interrupted,
    #[error("memory limit exceeded")]
    MemoryLimit,
    #[error("call stack limit exceeded")]
    StackOverflow,
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("unknown host method {0}")]
    UnknownHostMethod(String),
    #[error("host error: {0}")]
    Host(String),
    #[error("host call replay diverged at {method}")]
    ReplayMismatch { method: String },
    #[error("cross-contract call depth exceeded")]
    ReentryLimit,
    #[error("view method attempted a state write: {0}")]
    ViewWrite(String),
    #[error("method {0} is not payable")]
    NotPayable(String),
}

/// Cycle and gas accounting for one transaction. Shared across cross-contract
/// re-entries so the budget is global to the transaction.
#[derive(Debug)]
pub struct GasMeter {
    cycles: u64,
    interrupt_gas: u64,
    host_gas: u64,
    limit: u64,
    /// Absolute wall-clock cutoff, checked only at interrupt boundaries. The
    /// gas budget runs out orders of magnitude earlier on any healthy host,
    /// so the cutoff never fires on the consensus path.
    deadline: Option<std::time::Instant>,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            cycles: 0,
            interrupt_gas: 0,
            host_gas: 0,
            limit,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: std::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn gas_used(&self) -> u64 {
        self.interrupt_gas + self.host_gas
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One cycle; fires the interrupt handler on the 1024-cycle boundary.
    pub fn tick(&mut self) -> Result<(), VmError> {
        self.cycles += 1;
        if self.cycles % INTERRUPT_INTERVAL == 0 {
            self.interrupt_gas += 1;
            if self.gas_used() > self.limit {
                return Err(VmError::Interrupted);
            }
            if let Some(deadline) = self.deadline {
                if std::time::Instant::now() >= deadline {
                    return Err(VmError::Interrupted);
                }
            }
        }
        Ok(())
    }

    pub fn charge_host_call(&mut self) -> Result<(), VmError> {
        self.host_gas += HOST_CALL_GAS;
        if self.gas_used() > self.limit {
            return Err(VmError::Interrupted);
        }
        Ok(())
    }
}
