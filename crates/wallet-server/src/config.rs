//! Server settings read from the environment.

use std::path::PathBuf;

use ark_bn254::Fr;
use ark_ff::PrimeField;
use shielded_wallet::{ConfigError, WalletConfig};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error(transparent)]
    Wallet(#[from] ConfigError),
}

pub struct ServerConfig {
    pub port: u16,
    pub data_path: PathBuf,
    pub viewing_key: Fr,
    pub sync_interval_ms: u64,
    pub wallet: WalletConfig,
}

impl ServerConfig {
    /// `WALLET_VIEWING_KEY` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ServerConfigError> {
        let viewing_key = std::env::var("WALLET_VIEWING_KEY")
            .map_err(|_| ServerConfigError::Missing("WALLET_VIEWING_KEY"))?;
        let viewing_key = parse_fr(&viewing_key).map_err(|reason| ServerConfigError::Invalid {
            name: "WALLET_VIEWING_KEY",
            reason,
        })?;

        let wallet = match std::env::var("WALLET_CONFIG") {
            Ok(path) => WalletConfig::from_json_file(path)?,
            Err(_) => WalletConfig::default(),
        };

        Ok(Self {
            port: env_or("WALLET_PORT", 3001)?,
            data_path: std::env::var("WALLET_DATA_PATH")
                .unwrap_or_else(|_| "wallet-data.json".to_string())
                .into(),
            viewing_key,
            sync_interval_ms: env_or("WALLET_SYNC_INTERVAL_MS", 2000)?,
            wallet,
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ServerConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ServerConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a 32-byte little-endian hex string to Fr
pub fn parse_fr(hex: &str) -> Result<Fr, String> {
    let bytes = hex::decode(hex.trim_start_matches("0x"))
        .map_err(|e| format!("Invalid hex: {}", e))?;

    if bytes.len() != 32 {
        return Err("Field element must be 32 bytes".to_string());
    }

    Ok(Fr::from_le_bytes_mod_order(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fr() {
        let mut bytes = [0u8; 32];
        bytes[0] = 7;
        let hex = format!("0x{}", hex::encode(bytes));

        assert_eq!(parse_fr(&hex).unwrap(), Fr::from(7u64));
        assert!(parse_fr("0x0102").is_err());
        assert!(parse_fr("zz").is_err());
    }
}
