//! Layered configuration.
//!
//! Mirrors `engine/src/settings.rs`'s struct-per-concern shape, modernized onto the
//! `config` crate's builder API and merged with `EXPLORER_`-prefixed environment
//! variables and a handful of `clap` flags for the knobs most often overridden at the
//! shell.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::constants;
use crate::errors::{ExplorerError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    pub rpc_endpoint: String,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

fn default_connection_timeout_ms() -> u64 {
    constants::DEFAULT_CONNECTION_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,
}

fn default_pool_size() -> usize {
    constants::DEFAULT_POOL_SIZE
}

fn default_max_concurrent_connections() -> usize {
    constants::MAX_CONCURRENT_CONNECTIONS
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuerySettings {
    #[serde(default = "default_max_blocks_to_scan")]
    pub max_blocks_to_scan: u64,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
}

fn default_max_blocks_to_scan() -> u64 {
    constants::DEFAULT_MAX_BLOCKS_TO_SCAN
}

fn default_batch_size() -> usize {
    constants::DEFAULT_BATCH_SIZE
}

fn default_search_timeout_ms() -> u64 {
    constants::DEFAULT_SEARCH_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainSettings,
    #[serde(default = "PoolSettings::default_values")]
    pub pool: PoolSettings,
    pub http: HttpSettings,
    #[serde(default = "QuerySettings::default_values")]
    pub query: QuerySettings,
    pub database: DatabaseSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl PoolSettings {
    fn default_values() -> Self {
        Self {
            size: default_pool_size(),
            max_concurrent_connections: default_max_concurrent_connections(),
        }
    }
}

impl QuerySettings {
    fn default_values() -> Self {
        Self {
            max_blocks_to_scan: default_max_blocks_to_scan(),
            default_batch_size: default_batch_size(),
            search_timeout_ms: default_search_timeout_ms(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// CLI overrides for the knobs most often set at the shell; each also readable from its
/// matching `EXPLORER_*` environment variable via clap's `env` feature.
#[derive(Debug, Parser)]
#[command(name = "substrate-explorer")]
pub struct Cli {
    #[arg(long, env = "EXPLORER_CHAIN__RPC_ENDPOINT")]
    pub rpc_endpoint: Option<String>,

    #[arg(long, env = "EXPLORER_HTTP__PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "EXPLORER_HTTP__HOST")]
    pub host: Option<String>,

    #[arg(long, env = "EXPLORER_DATABASE__URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "EXPLORER_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, default_value = "config")]
    pub config_dir: String,
}

impl Settings {
    /// Loads `config/default.toml`, an optional `config/<RUN_ENV>.toml`, then
    /// `EXPLORER_`-prefixed environment variables, then the CLI overrides in `cli`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());
        let mut builder = Config::builder()
            .add_source(File::with_name(&format!("{}/default", cli.config_dir)).required(false))
            .add_source(
                File::with_name(&format!("{}/{run_env}", cli.config_dir)).required(false),
            )
            .add_source(
                Environment::with_prefix(constants::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(rpc) = &cli.rpc_endpoint {
            builder = builder.set_override("chain.rpc_endpoint", rpc.clone())
                .map_err(|e| ExplorerError::bad_request(e.to_string()))?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("http.port", port as i64)
                .map_err(|e| ExplorerError::bad_request(e.to_string()))?;
        }
        if let Some(host) = &cli.host {
            builder = builder.set_override("http.host", host.clone())
                .map_err(|e| ExplorerError::bad_request(e.to_string()))?;
        }
        if let Some(db) = &cli.database_url {
            builder = builder.set_override("database.url", db.clone())
                .map_err(|e| ExplorerError::bad_request(e.to_string()))?;
        }
        if let Some(level) = &cli.log_level {
            builder = builder.set_override("log_level", level.clone())
                .map_err(|e| ExplorerError::bad_request(e.to_string()))?;
        }

        let settings: Settings = builder
            .build()
            .map_err(|e| ExplorerError::bad_request(format!("failed to load configuration: {e}")))?
            .try_deserialize()
            .map_err(|e| ExplorerError::bad_request(format!("invalid configuration: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.chain.rpc_endpoint)
            .map_err(|e| ExplorerError::bad_request(format!("rpcEndpoint is not a valid URL: {e}")))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ExplorerError::bad_request(
                "rpcEndpoint must use the ws:// or wss:// scheme",
            ));
        }
        if self.query.max_blocks_to_scan == 0
            || self.query.max_blocks_to_scan > constants::MAX_BLOCKS_TO_SCAN_CAP
        {
            return Err(ExplorerError::bad_request(format!(
                "maxBlocksToScan must be in 1..={}",
                constants::MAX_BLOCKS_TO_SCAN_CAP
            )));
        }
        if self.query.default_batch_size == 0 || self.query.default_batch_size > constants::MAX_BATCH_SIZE {
            return Err(ExplorerError::bad_request(format!(
                "defaultBatchSize must be in 1..={}",
                constants::MAX_BATCH_SIZE
            )));
        }
        if self.database.url.is_empty() {
            return Err(ExplorerError::bad_request("database.url must not be empty"));
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.chain.connection_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.query.search_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(rpc: &str, db: &str, port: u16) -> Cli {
        Cli {
            rpc_endpoint: Some(rpc.to_string()),
            port: Some(port),
            host: None,
            database_url: Some(db.to_string()),
            log_level: None,
            config_dir: "config".to_string(),
        }
    }

    #[test]
    fn rejects_non_ws_scheme() {
        let settings = Settings {
            chain: ChainSettings { rpc_endpoint: "http://example.com".into(), connection_timeout_ms: 1000 },
            pool: PoolSettings::default_values(),
            http: HttpSettings { host: "0.0.0.0".into(), port: 8080, allowed_origins: vec![] },
            query: QuerySettings::default_values(),
            database: DatabaseSettings { url: "sqlite://x.db".into() },
            log_level: "info".into(),
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn accepts_wss_scheme() {
        let settings = Settings {
            chain: ChainSettings { rpc_endpoint: "wss://example.com".into(), connection_timeout_ms: 1000 },
            pool: PoolSettings::default_values(),
            http: HttpSettings { host: "0.0.0.0".into(), port: 8080, allowed_origins: vec![] },
            query: QuerySettings::default_values(),
            database: DatabaseSettings { url: "sqlite://x.db".into() },
            log_level: "info".into(),
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn cli_builder_smoke() {
        let cli = cli_with("wss://example.com", "sqlite://x.db", 9090);
        assert_eq!(cli.port, Some(9090));
    }
}
