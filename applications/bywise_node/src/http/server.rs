//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::net::SocketAddr;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use bywise_common_types::shutdown::ShutdownSignal;
use log::*;
use tower_http::cors::CorsLayer;

use super::handlers;
use crate::node::SharedContext;

const LOG_TARGET: &str = "bywise::node::http";

fn router(context: SharedContext) -> Router {
    Router::new()
        .route("/api/v2/nodes/handshake", post(handlers::handshake))
        .route("/api/v2/nodes/try-token", get(handlers::try_token))
        .route("/api/v2/nodes", get(handlers::list_nodes))
        .route("/api/v2/transactions", post(handlers::submit_transaction))
        .route("/api/v2/transactions/hash/:hash", get(handlers::transaction_by_hash))
        .route("/api/v2/transactions/last/:chain", get(handlers::last_transactions))
        .route("/api/v2/slices", post(handlers::submit_slice))
        .route("/api/v2/slices/hash/:hash", get(handlers::slice_by_hash))
        .route("/api/v2/slices/last/:chain", get(handlers::last_slices))
        .route("/api/v2/blocks", post(handlers::submit_block))
        .route("/api/v2/blocks/hash/:hash", get(handlers::block_by_hash))
        .route("/api/v2/blocks/last/:chain", get(handlers::last_blocks))
        .route("/api/v2/blocks/pack/:chain/:height", get(handlers::block_pack))
        .route("/api/v2/wallets/:address/:chain", get(handlers::wallet))
        .route("/api/v2/contracts/simulate", post(handlers::simulate))
        .route("/api/v2/gossip/find", post(handlers::gossip_find))
        .route("/api/v2/auth/statistics", get(handlers::statistics))
        .layer(Extension(context))
        .layer(CorsLayer::permissive())
}

pub async fn run_http_server(context: SharedContext, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", context.config.host, context.config.port).parse()?;
    let https = context.config.https.clone();
    let app = router(context);

    if https.enabled {
        let (cert, key) = (
            https.cert_path.expect("validated in config"),
            https.key_path.expect("validated in config"),
        );
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
        info!(target: LOG_TARGET, "🌐 HTTPS API listening on {}", addr);
        let handle = axum_server::Handle::new();
        let watcher = handle.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            watcher.graceful_shutdown(Some(std::time::Duration::from_millis(300)));
        });
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!(target: LOG_TARGET, "🌐 HTTP API listening on {}", addr);
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
            })
            .await?;
    }
    info!(target: LOG_TARGET, "HTTP API stopped");
    Ok(())
}
