//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

pub mod events;
pub mod handle;
pub mod minting;
pub mod pipeline;
pub mod traits;

pub use events::ChainEvent;
pub use handle::{PipelineHandle, TipInfo, WalletSnapshot};
pub use minting::{MintingConfig, MintingWorker};
pub use pipeline::{PipelineError, PipelineWorker};
pub use traits::{GossipOutbound, NullGossip};
