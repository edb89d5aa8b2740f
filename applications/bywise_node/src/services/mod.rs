//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

pub mod discovery;
pub mod gossip;
pub mod sync;
