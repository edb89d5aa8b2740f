//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

pub mod block_tree;
pub mod distance;
pub mod mempool;
pub mod models;
pub mod storage;

pub use block_tree::{AddBlockOutcome, AddSliceOutcome, BlockEntry, BlockTree, BlockTreeError, SliceEntry};
pub use mempool::{Mempool, MempoolError};
