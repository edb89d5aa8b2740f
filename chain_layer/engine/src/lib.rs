//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

pub mod abi;
pub mod config;
pub mod executor;
pub mod fees;
pub mod pool;
pub mod state_store;
pub mod vm;

pub use executor::{ExecutionContext, ExecutionError, TransactionExecutor};
pub use state_store::{EnvironmentContext, EnvironmentError, EnvironmentStore};
