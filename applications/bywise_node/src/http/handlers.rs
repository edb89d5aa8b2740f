//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! The `/api/v2` surface: handshake and discovery, gossip ingestion,
//! content queries, wallets, simulation and admin statistics.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bywise_chain::models::{Block, Slice, Transaction, TransactionOutput};
use bywise_common_types::{Address, Hash};
use bywise_consensus::GossipOutbound;
use bywise_p2p::{mint_token, ConnectedPeer, GossipMessage, NodeInfo};
use log::*;
use serde::{Deserialize, Serialize};

use crate::node::{now_secs, SharedContext};

const LOG_TARGET: &str = "bywise::node::http";

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid token")
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not found")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

fn parse_hash(raw: &str) -> Result<Hash, ApiError> {
    raw.parse().map_err(|_| ApiError::bad_request("invalid hash"))
}

/// Resolves `Authorization: Node <token>` to the authenticated peer.
fn authenticated_peer(context: &SharedContext, headers: &HeaderMap) -> Result<ConnectedPeer, ApiError> {
    let value = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::unauthorized)?;
    let token = value.strip_prefix("Node ").ok_or_else(ApiError::unauthorized)?;
    context
        .registry
        .peer_by_token(token.trim())
        .ok_or_else(ApiError::unauthorized)
}

// --- nodes ---

pub async fn handshake(
    Extension(context): Extension<SharedContext>,
    Json(mut info): Json<NodeInfo>,
) -> Result<Json<NodeInfo>, ApiError> {
    if !info.host.starts_with("http://") && !info.host.starts_with("https://") {
        return Err(ApiError::bad_request("unreachable peer host"));
    }
    if !info.chains.iter().any(|c| context.serves_chain(c)) {
        return Err(ApiError::forbidden("no common chains"));
    }
    let outbound_token = info.token.take().unwrap_or_default();
    let inbound_token = mint_token(&context.wallet.secret_bytes(), rand::random::<u64>());
    context
        .registry
        .mark_connected(info, outbound_token, inbound_token.clone())
        .map_err(|e| ApiError::forbidden(e.to_string()))?;
    Ok(Json(context.node_info(Some(inbound_token))))
}

pub async fn try_token(
    Extension(context): Extension<SharedContext>,
    headers: HeaderMap,
) -> Result<Json<NodeInfo>, ApiError> {
    let peer = authenticated_peer(&context, &headers)?;
    Ok(Json(peer.info))
}

pub async fn list_nodes(
    Extension(context): Extension<SharedContext>,
    headers: HeaderMap,
) -> Result<Json<Vec<NodeInfo>>, ApiError> {
    authenticated_peer(&context, &headers)?;
    Ok(Json(context.registry.advertised_peers()))
}

// --- transactions ---

pub async fn submit_transaction(
    Extension(context): Extension<SharedContext>,
    Json(tx): Json<Transaction>,
) -> Result<Json<Transaction>, ApiError> {
    let Some(handles) = context.chain(&tx.chain) else {
        return Err(ApiError::forbidden(format!("chain {} not served", tx.chain)));
    };
    tx.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;
    let mut clean = tx.clone();
    clean.output = None;
    match handles.mempool.add_transaction(clean, now_secs()) {
        Ok(()) => {
            context
                .gossip
                .broadcast(GossipMessage::NewTx { tx: Box::new(tx.clone()) })
                .await;
            Ok(Json(tx))
        },
        Err(bywise_chain::MempoolError::DuplicateTransaction(_)) => Ok(Json(tx)),
        Err(e) => Err(ApiError::bad_request(e.to_string())),
    }
}

pub async fn transaction_by_hash(
    Extension(context): Extension<SharedContext>,
    Path(hash): Path<String>,
) -> Result<Json<Transaction>, ApiError> {
    let hash = parse_hash(&hash)?;
    for (chain, handles) in &context.chains {
        if let Some(tx) = handles.mempool.get_transaction(&hash) {
            return Ok(Json(tx));
        }
        if let Ok(Some(tx)) = context.stores.transactions.get_by_hash(chain, &hash) {
            return Ok(Json(tx));
        }
    }
    Err(ApiError::not_found())
}

#[derive(Debug, Deserialize)]
pub struct LastQuery {
    #[serde(default = "default_last_count")]
    pub count: usize,
}

fn default_last_count() -> usize {
    10
}

pub async fn last_transactions(
    Extension(context): Extension<SharedContext>,
    Path(chain): Path<String>,
    Query(query): Query<LastQuery>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    if !context.serves_chain(&chain) {
        return Err(ApiError::forbidden(format!("chain {chain} not served")));
    }
    let count = query.count.min(100);
    context
        .stores
        .transactions
        .last(&chain, count)
        .map(Json)
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

// --- slices ---

pub async fn submit_slice(
    Extension(context): Extension<SharedContext>,
    Json(slice): Json<Slice>,
) -> Result<StatusCode, ApiError> {
    let Some(handles) = context.chain(&slice.chain) else {
        return Err(ApiError::forbidden(format!("chain {} not served", slice.chain)));
    };
    slice.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;
    context
        .gossip
        .broadcast(GossipMessage::NewSlice {
            slice: Box::new(slice.clone()),
        })
        .await;
    handles.pipeline.submit_slice(slice).await;
    Ok(StatusCode::OK)
}

pub async fn slice_by_hash(
    Extension(context): Extension<SharedContext>,
    Path(hash): Path<String>,
) -> Result<Json<Slice>, ApiError> {
    let hash = parse_hash(&hash)?;
    for handles in context.chains.values() {
        if let Some(slice) = handles.pipeline.slice(hash).await {
            return Ok(Json(slice));
        }
    }
    Err(ApiError::not_found())
}

pub async fn last_slices(
    Extension(context): Extension<SharedContext>,
    Path(chain): Path<String>,
    Query(query): Query<LastQuery>,
) -> Result<Json<Vec<Slice>>, ApiError> {
    if !context.serves_chain(&chain) {
        return Err(ApiError::forbidden(format!("chain {chain} not served")));
    }
    context
        .stores
        .slices
        .last(&chain, query.count.min(100))
        .map(Json)
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

// --- blocks ---

pub async fn submit_block(
    Extension(context): Extension<SharedContext>,
    Json(block): Json<Block>,
) -> Result<StatusCode, ApiError> {
    let Some(handles) = context.chain(&block.chain) else {
        return Err(ApiError::forbidden(format!("chain {} not served", block.chain)));
    };
    block.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;
    context
        .gossip
        .broadcast(GossipMessage::NewBlock {
            block: Box::new(block.clone()),
        })
        .await;
    handles.pipeline.submit_block(block).await;
    Ok(StatusCode::OK)
}

pub async fn block_by_hash(
    Extension(context): Extension<SharedContext>,
    Path(hash): Path<String>,
) -> Result<Json<Block>, ApiError> {
    let hash = parse_hash(&hash)?;
    for handles in context.chains.values() {
        if let Some((block, _)) = handles.pipeline.block(hash).await {
            return Ok(Json(block));
        }
    }
    Err(ApiError::not_found())
}

pub async fn last_blocks(
    Extension(context): Extension<SharedContext>,
    Path(chain): Path<String>,
) -> Result<Json<Vec<Block>>, ApiError> {
    let Some(handles) = context.chain(&chain) else {
        return Err(ApiError::forbidden(format!("chain {chain} not served")));
    };
    let Some(tip) = handles.pipeline.tip().await else {
        return Ok(Json(Vec::new()));
    };
    match handles.pipeline.block(tip.hash).await {
        Some((block, _)) => Ok(Json(vec![block])),
        None => Ok(Json(Vec::new())),
    }
}

pub async fn block_pack(
    Extension(context): Extension<SharedContext>,
    Path((chain, height)): Path<(String, u64)>,
) -> Result<Json<Vec<Block>>, ApiError> {
    if !context.serves_chain(&chain) {
        return Err(ApiError::forbidden(format!("chain {chain} not served")));
    }
    context
        .stores
        .blocks
        .pack(&chain, height, 50)
        .map(Json)
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

// --- wallets & contracts ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub address: Address,
    pub chain: String,
    pub balance: String,
    pub nonce: u64,
}

pub async fn wallet(
    Extension(context): Extension<SharedContext>,
    Path((address, chain)): Path<(String, String)>,
) -> Result<Json<WalletResponse>, ApiError> {
    let address: Address = address.parse().map_err(|_| ApiError::bad_request("invalid address"))?;
    let Some(handles) = context.chain(&chain) else {
        return Err(ApiError::forbidden(format!("chain {chain} not served")));
    };
    let snapshot = handles
        .pipeline
        .wallet(address.clone())
        .await
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(WalletResponse {
        address,
        chain,
        balance: snapshot.balance,
        nonce: snapshot.info.nonce,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub tx: Transaction,
    #[serde(default)]
    pub simulate_wallet: bool,
}

pub async fn simulate(
    Extension(context): Extension<SharedContext>,
    Json(request): Json<SimulateRequest>,
) -> Result<Json<TransactionOutput>, ApiError> {
    let Some(handles) = context.chain(&request.tx.chain) else {
        return Err(ApiError::forbidden(format!("chain {} not served", request.tx.chain)));
    };
    handles
        .pipeline
        .simulate(request.tx, request.simulate_wallet)
        .await
        .map(Json)
        .map_err(ApiError::bad_request)
}

// --- gossip find ---

pub async fn gossip_find(
    Extension(context): Extension<SharedContext>,
    headers: HeaderMap,
    Json(message): Json<GossipMessage>,
) -> Result<StatusCode, ApiError> {
    authenticated_peer(&context, &headers)?;
    let chain = message.chain().to_string();
    let Some(handles) = context.chain(&chain) else {
        return Err(ApiError::forbidden(format!("chain {chain} not served")));
    };
    let answer = match &message {
        GossipMessage::FindTx { hash, .. } => handles
            .mempool
            .get_transaction(hash)
            .or_else(|| context.stores.transactions.get_by_hash(&chain, hash).ok().flatten())
            .map(|tx| GossipMessage::NewTx { tx: Box::new(tx) }),
        GossipMessage::FindSlice { hash, .. } => handles
            .pipeline
            .slice(*hash)
            .await
            .map(|slice| GossipMessage::NewSlice {
                slice: Box::new(slice),
            }),
        GossipMessage::FindBlock { hash, .. } => {
            handles.pipeline.block(*hash).await.map(|(block, _)| GossipMessage::NewBlock {
                block: Box::new(block),
            })
        },
        _ => return Err(ApiError::bad_request("expected a find_* message")),
    };
    match answer {
        Some(item) => {
            debug!(target: LOG_TARGET, "answering {} with the item", message.topic());
            context.gossip.broadcast(item).await;
        },
        // not known here: forward the question (the per-peer cache stops loops)
        None => context.gossip.broadcast(message).await,
    }
    Ok(StatusCode::OK)
}

// --- statistics ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatistics {
    pub chain: String,
    pub tip_hash: Hash,
    pub tip_height: u64,
    pub mempool_size: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    pub address: Address,
    pub uptime_secs: u64,
    pub peers_connected: usize,
    pub peers_known: usize,
    pub chains: Vec<ChainStatistics>,
}

pub async fn statistics(
    Extension(context): Extension<SharedContext>,
    headers: HeaderMap,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let expected = context
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| ApiError::forbidden("statistics disabled"))?;
    let provided = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(ApiError::unauthorized)?;
    if provided.trim() != expected {
        return Err(ApiError::unauthorized());
    }

    let mut chains = Vec::new();
    for (name, handles) in &context.chains {
        if let Some(tip) = handles.pipeline.tip().await {
            chains.push(ChainStatistics {
                chain: name.clone(),
                tip_hash: tip.hash,
                tip_height: tip.height,
                mempool_size: handles.mempool.transaction_count(),
            });
        }
    }
    chains.sort_by(|a, b| a.chain.cmp(&b.chain));
    Ok(Json(StatisticsResponse {
        address: context.wallet.address(),
        uptime_secs: context.started_at.elapsed().as_secs(),
        peers_connected: context.registry.connected_count(),
        peers_known: context.registry.known_count(),
        chains,
    }))
}
