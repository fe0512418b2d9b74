//! Wallet configuration.
//!
//! ```
//! use shielded_wallet::WalletConfig;
//!
//! let config: WalletConfig = serde_json::from_str(r#"{ "start_block": 1200 }"#).unwrap();
//! assert_eq!(config.start_block, 1200);
//! assert_eq!(config.tree_depth, 16);
//! assert!(config.prune_tree);
//! ```

use std::path::Path;

use serde::Deserialize;
use shielded_primitives::MAX_DEPTH;
use thiserror::Error;

use crate::adapter::IterOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WalletConfig {
    /// First block to scan when nothing has been synced yet
    #[serde(default)]
    pub start_block: u64,

    /// Depth of the commitment tree (capacity `4^depth`)
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,

    /// Suggested blocks per diff
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: Option<u64>,

    /// Stop syncing once this block is reached
    #[serde(default)]
    pub end_block: Option<u64>,

    /// Prune the tree after every applied diff, before its dump is written
    #[serde(default = "default_true")]
    pub prune_tree: bool,

    /// Write the tree dump to the store with every applied diff
    #[serde(default = "default_true")]
    pub persist_tree: bool,
}

fn default_tree_depth() -> usize {
    MAX_DEPTH
}

fn default_max_chunk_size() -> Option<u64> {
    Some(10_000)
}

fn default_true() -> bool {
    true
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            tree_depth: default_tree_depth(),
            max_chunk_size: default_max_chunk_size(),
            end_block: None,
            prune_tree: true,
            persist_tree: true,
        }
    }
}

impl WalletConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tree_depth == 0 || self.tree_depth > MAX_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "tree_depth must be between 1 and {MAX_DEPTH}, got {}",
                self.tree_depth
            )));
        }
        if self.max_chunk_size == Some(0) {
            return Err(ConfigError::Invalid("max_chunk_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn iter_options(&self) -> IterOptions {
        IterOptions {
            max_chunk_size: self.max_chunk_size,
            end_block: self.end_block,
        }
    }
}
