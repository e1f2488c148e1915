//! Configuration management for the header store

use crate::blockchain::{BlockHeader, ChainParams, Network, TieBreak};
use crate::cache::BlockCache;
use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_network")]
    pub network: Network,
    /// 80-byte header as hex. Defaults to the network's genesis header.
    #[serde(default)]
    pub checkpoint_header: Option<String>,
    #[serde(default)]
    pub checkpoint_height: u32,
    #[serde(default = "default_true")]
    pub check_proof_of_work: bool,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            checkpoint_header: None,
            checkpoint_height: 0,
            check_proof_of_work: true,
            tie_break: TieBreak::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_block_cache")]
    pub blocks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { blocks: default_block_cache() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_orphan_batches")]
    pub max_orphan_batches: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_orphan_batches: default_max_orphan_batches() }
    }
}

impl Config {
    /// Runtime chain parameters described by the `[chain]` and `[cache]`
    /// sections.
    pub fn chain_params(&self) -> Result<ChainParams> {
        let mut params = ChainParams::new(self.chain.network).with_tie_break(self.chain.tie_break);
        if let Some(header_hex) = &self.chain.checkpoint_header {
            params = params.with_checkpoint(parse_checkpoint(header_hex)?, self.chain.checkpoint_height);
        } else {
            params.checkpoint_height = self.chain.checkpoint_height;
        }
        params.check_proof_of_work = self.chain.check_proof_of_work;
        params.block_cache_capacity = self.cache.blocks;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(ChainError::ConfigError("database.path must be set".to_string()));
        }
        if self.sync.max_orphan_batches == 0 {
            return Err(ChainError::ConfigError(
                "sync.max_orphan_batches must be at least 1".to_string(),
            ));
        }
        if let Some(header_hex) = &self.chain.checkpoint_header {
            parse_checkpoint(header_hex)?;
        }
        Ok(())
    }
}

fn parse_checkpoint(header_hex: &str) -> Result<BlockHeader> {
    let bytes = hex::decode(header_hex.trim())
        .map_err(|e| ChainError::ConfigError(format!("chain.checkpoint_header is not hex: {}", e)))?;
    BlockHeader::from_bytes(&bytes)
        .map_err(|e| ChainError::ConfigError(format!("chain.checkpoint_header: {}", e)))
}

/// Load `config.toml` from the working directory, falling back to defaults
/// when it is absent.
pub fn load_config() -> Result<Config> {
    load_config_from("config.toml")
}

pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = match fs::read_to_string(path.as_ref()) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let config: Config = toml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

fn default_database_path() -> String {
    "./data/headers.db".to_string()
}

fn default_network() -> Network {
    Network::Mainnet
}

fn default_true() -> bool {
    true
}

fn default_block_cache() -> usize {
    BlockCache::DEFAULT_CAPACITY
}

fn default_max_orphan_batches() -> usize {
    64
}
