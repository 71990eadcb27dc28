//! Node settings: defaults, overridden by an optional TOML file, overridden by
//! `STAKECHAIN_*` environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::Level;

use crate::constants::MAX_NUMBER_OF_TRANSACTIONS;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Secret phrase of the forging account.
    pub secret_phrase: String,
    /// Balance credited to the forger before genesis.
    pub genesis_balance: i64,
    /// Number of blocks to forge before exiting.
    pub blocks: u32,
    pub transactions_per_block: usize,
    pub block_version: i32,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            secret_phrase: "stakechain forger".to_string(),
            genesis_balance: 100_000_000_000,
            blocks: 10,
            transactions_per_block: 8,
            block_version: 2,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let cfg: Self = builder
            .add_source(Environment::with_prefix("STAKECHAIN").try_parsing(true))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.block_version < 1 {
            return Err(ConfigError::Message(format!(
                "block_version must be at least 1, got {}",
                self.block_version
            )));
        }
        if self.transactions_per_block > MAX_NUMBER_OF_TRANSACTIONS {
            return Err(ConfigError::Message(format!(
                "transactions_per_block must not exceed {MAX_NUMBER_OF_TRANSACTIONS}"
            )));
        }
        self.level().map(|_| ())
    }

    pub fn level(&self) -> Result<Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Message(format!("unknown log level {:?}", self.log_level)))
    }
}
