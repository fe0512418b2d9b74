//! Persisted key layout.
//!
//! ```text
//! NOTES_BY_INDEX-<merkle index, 10 digits>      -> note record (JSON)
//! NOTES_BY_ASSET-<type>-<ADDR>-<id>             -> merkle indices (JSON array)
//! NOTES_BY_NULLIFIER-<nullifier, decimal>       -> merkle index
//! NEXT_BLOCK, NEXT_MERKLE_INDEX                 -> sync cursor
//! MERKLE_TREE_DUMP                              -> tree dump (JSON)
//! ```

use num_bigint::BigUint;
use shielded_primitives::{fr_from_decimal, fr_to_decimal, Asset, AssetType, Fr, MerkleIndex};
use thiserror::Error;

pub const NOTES_BY_INDEX_PREFIX: &str = "NOTES_BY_INDEX";
pub const NOTES_BY_ASSET_PREFIX: &str = "NOTES_BY_ASSET";
pub const NOTES_BY_NULLIFIER_PREFIX: &str = "NOTES_BY_NULLIFIER";
pub const NEXT_BLOCK_KEY: &str = "NEXT_BLOCK";
pub const NEXT_MERKLE_INDEX_KEY: &str = "NEXT_MERKLE_INDEX";
pub const MERKLE_TREE_DUMP_KEY: &str = "MERKLE_TREE_DUMP";

/// A stored key that does not follow the layout. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed key {key:?}: {reason}")]
pub struct KeyError {
    pub key: String,
    pub reason: String,
}

impl KeyError {
    fn new(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub fn index_key(index: MerkleIndex) -> String {
    format!("{NOTES_BY_INDEX_PREFIX}-{index:010}")
}

pub fn parse_index_key(key: &str) -> Result<MerkleIndex, KeyError> {
    let digits = strip(key, NOTES_BY_INDEX_PREFIX)?;
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::new(key, "expected a 10 digit merkle index"));
    }
    digits
        .parse()
        .map_err(|_| KeyError::new(key, "merkle index out of range"))
}

pub fn asset_key(asset: &Asset) -> String {
    format!(
        "{NOTES_BY_ASSET_PREFIX}-{}-{}-{}",
        asset.asset_type,
        asset.asset_addr.to_uppercase(),
        asset.id
    )
}

pub fn parse_asset_key(key: &str) -> Result<Asset, KeyError> {
    let rest = strip(key, NOTES_BY_ASSET_PREFIX)?;
    let mut parts = rest.splitn(3, '-');
    let (Some(asset_type), Some(addr), Some(id)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(KeyError::new(key, "expected <type>-<addr>-<id>"));
    };

    let asset_type: AssetType = asset_type
        .parse()
        .map_err(|e: shielded_primitives::NoteError| KeyError::new(key, e.to_string()))?;
    let id = BigUint::parse_bytes(id.as_bytes(), 10)
        .ok_or_else(|| KeyError::new(key, "asset id is not a decimal integer"))?;

    Asset::new(asset_type, addr, id).map_err(|e| KeyError::new(key, e.to_string()))
}

pub fn nullifier_key(nullifier: &Fr) -> String {
    format!("{NOTES_BY_NULLIFIER_PREFIX}-{}", fr_to_decimal(nullifier))
}

pub fn parse_nullifier_key(key: &str) -> Result<Fr, KeyError> {
    let digits = strip(key, NOTES_BY_NULLIFIER_PREFIX)?;
    fr_from_decimal(digits).map_err(|e| KeyError::new(key, e.to_string()))
}

fn strip<'a>(key: &'a str, prefix: &str) -> Result<&'a str, KeyError> {
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .ok_or_else(|| KeyError::new(key, format!("expected prefix {prefix}-")))
}
