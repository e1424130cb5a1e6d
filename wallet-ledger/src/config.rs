//! Configuration for the wallet ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wallet::Wallet;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `<id>` ledger files
    pub wallets_dir: PathBuf,

    /// Network tag for wallets loaded from disk
    pub network: String,

    /// Default log directive for the binary
    pub log_level: String,

    /// Merge configuration
    pub merge: MergeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wallets_dir: PathBuf::from("./wallets"),
            network: Wallet::MAIN_NETWORK.to_string(),
            log_level: "info".to_string(),
            merge: MergeConfig::default(),
        }
    }
}

/// Merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// In legacy mode, debits younger than this are skipped (seconds)
    pub legacy_window_secs: u64,

    /// Ask for absent paying wallets to be fetched
    pub pull: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            legacy_window_secs: 24 * 60 * 60,
            pull: true,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("WALLET_DIR") {
            config.wallets_dir = PathBuf::from(dir);
        }

        if let Ok(network) = std::env::var("WALLET_NETWORK") {
            config.network = network;
        }

        if let Ok(level) = std::env::var("WALLET_LOG") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        let network_ok = !self.network.is_empty()
            && self
                .network
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        if !network_ok {
            return Err(crate::Error::Config(format!(
                "Network tag {:?} must be lowercase alphanumeric",
                self.network
            )));
        }
        Ok(())
    }
}
