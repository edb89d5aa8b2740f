//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::{path::PathBuf, time::Duration};

use config::Config;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpsConfig {
    pub enabled: bool,
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_path: None,
            cert_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplicationConfig {
    /// Bind address for the HTTP API.
    pub host: String,
    pub port: u16,
    /// Base URL advertised to peers; defaults to `http://<host>:<port>`.
    pub public_host: Option<String>,
    pub data_dir: PathBuf,
    /// Chain files to serve.
    pub chains: Vec<PathBuf>,
    /// Seed node URLs probed at startup.
    pub nodes: Vec<String>,
    pub https: HttpsConfig,
    #[serde(with = "humantime_serde")]
    pub discovery_interval: Duration,
    /// Ephemeral in-memory store, verbose logging.
    pub debug: bool,
    #[serde(skip_serializing)]
    pub seed: Option<String>,
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_host: None,
            data_dir: PathBuf::from("data"),
            chains: Vec::new(),
            nodes: Vec::new(),
            https: HttpsConfig::default(),
            discovery_interval: Duration::from_secs(30),
            debug: false,
            seed: None,
            admin_token: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file: {0}")]
    File(#[from] config::ConfigError),
    #[error("--https requires both --key and --cert")]
    IncompleteHttps,
}

impl ApplicationConfig {
    /// File (when present) first, then CLI/env overrides on top.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = Config::builder()
            .add_source(config::File::from(cli.config.clone()).required(false))
            .build()?;
        let mut cfg: ApplicationConfig = file.try_deserialize().unwrap_or_default();

        if let Some(host) = &cli.host {
            cfg.host = host.clone();
        }
        if let Some(port) = cli.port {
            cfg.port = port;
        }
        if !cli.chains.is_empty() {
            cfg.chains = cli.chains.clone();
        }
        if let Some(nodes) = &cli.nodes {
            cfg.nodes = nodes
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if cli.https {
            cfg.https.enabled = true;
        }
        if let Some(key) = &cli.key {
            cfg.https.key_path = Some(key.clone());
        }
        if let Some(cert) = &cli.cert {
            cfg.https.cert_path = Some(cert.clone());
        }
        if cli.start_debug {
            cfg.debug = true;
        }
        if cli.seed.is_some() {
            cfg.seed = cli.seed.clone();
        }
        if cli.admin_token.is_some() {
            cfg.admin_token = cli.admin_token.clone();
        }

        if cfg.https.enabled && (cfg.https.key_path.is_none() || cfg.https.cert_path.is_none()) {
            return Err(ConfigError::IncompleteHttps);
        }
        Ok(cfg)
    }

    /// The base URL peers should use to reach this node.
    pub fn advertised_host(&self) -> String {
        if let Some(public) = &self.public_host {
            return public.trim_end_matches('/').to_string();
        }
        let scheme = if self.https.enabled { "https" } else { "http" };
        let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
        format!("{scheme}://{host}:{}", self.port)
    }
}
