//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

//! HTTP client for talking to another node's `/api/v2` surface.

use std::time::Duration;

use bywise_chain::models::{Block, Slice, Transaction};
use bywise_common_types::Hash;
use log::*;
use serde::de::DeserializeOwned;

use crate::{GossipMessage, NetworkError, NodeInfo, PEER_TIMEOUT_SECS};

const LOG_TARGET: &str = "bywise::p2p::client";

#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl NodeClient {
    pub fn new(base: impl Into<String>) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PEER_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2{}", self.base, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Node {token}")),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, NetworkError> {
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| NetworkError::Malformed(e.to_string()))
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, NetworkError> {
        let response = self.authorize(self.http.get(self.url(path))).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        Ok(Some(Self::decode(response).await?))
    }

    /// Exchanges node info; the returned info carries the token to use on
    /// subsequent authenticated calls.
    pub async fn handshake(&self, me: &NodeInfo) -> Result<NodeInfo, NetworkError> {
        let response = self
            .http
            .post(self.url("/nodes/handshake"))
            .json(me)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Echoes the peer's view of us when our token is still valid.
    pub async fn try_token(&self) -> Result<NodeInfo, NetworkError> {
        let response = self.authorize(self.http.get(self.url("/nodes/try-token"))).send().await?;
        Self::decode(response).await
    }

    pub async fn peers(&self) -> Result<Vec<NodeInfo>, NetworkError> {
        let response = self.authorize(self.http.get(self.url("/nodes"))).send().await?;
        Self::decode(response).await
    }

    /// Pushes one gossip item to the peer's matching ingestion endpoint.
    pub async fn send_gossip(&self, message: &GossipMessage) -> Result<(), NetworkError> {
        let response = match message {
            GossipMessage::NewTx { tx } => {
                self.authorize(self.http.post(self.url("/transactions")).json(tx.as_ref()))
                    .send()
                    .await?
            },
            GossipMessage::NewSlice { slice } => {
                self.authorize(self.http.post(self.url("/slices")).json(slice.as_ref()))
                    .send()
                    .await?
            },
            GossipMessage::NewBlock { block } => {
                self.authorize(self.http.post(self.url("/blocks")).json(block.as_ref()))
                    .send()
                    .await?
            },
            find => {
                self.authorize(self.http.post(self.url("/gossip/find")).json(find))
                    .send()
                    .await?
            },
        };
        let status = response.status();
        if !status.is_success() {
            debug!(
                target: LOG_TARGET,
                "peer {} rejected {}: {}", self.base, message.topic(), status
            );
            return Err(NetworkError::Status(status.as_u16()));
        }
        Ok(())
    }

    pub async fn transaction_by_hash(&self, hash: &Hash) -> Result<Option<Transaction>, NetworkError> {
        self.get_optional(&format!("/transactions/hash/{hash}")).await
    }

    pub async fn slice_by_hash(&self, hash: &Hash) -> Result<Option<Slice>, NetworkError> {
        self.get_optional(&format!("/slices/hash/{hash}")).await
    }

    pub async fn block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, NetworkError> {
        self.get_optional(&format!("/blocks/hash/{hash}")).await
    }

    pub async fn last_blocks(&self, chain: &str) -> Result<Vec<Block>, NetworkError> {
        let response = self
            .authorize(self.http.get(self.url(&format!("/blocks/last/{chain}"))))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// An ascending window of blocks starting at `height`.
    pub async fn block_pack(&self, chain: &str, height: u64) -> Result<Vec<Block>, NetworkError> {
        let response = self
            .authorize(self.http.get(self.url(&format!("/blocks/pack/{chain}/{height}"))))
            .send()
            .await?;
        Self::decode(response).await
    }
}
