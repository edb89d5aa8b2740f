//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

mod block;
mod slice;
mod transaction;

pub use block::{Block, BlockError, BlockStatus};
pub use slice::{Slice, SliceError};
pub use transaction::{
    ContractCall,
    ContractEvent,
    EventEntry,
    Transaction,
    TransactionBuilder,
    TransactionData,
    TransactionError,
    TransactionOutput,
    TransactionType,
};

/// Wire format version stamped on every transaction, slice and block.
pub const WIRE_VERSION: &str = "2";
