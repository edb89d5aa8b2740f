//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

mod handlers;
mod server;

pub use server::run_http_server;
