//! Notes, assets and stealth addresses.
//!
//! A note is a private value record. On chain it appears either in plaintext
//! (`IncludedNote`) or encrypted to its owner (`IncludedEncryptedNote`); in both
//! cases the tree leaf at its merkle index is the note commitment.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::{fr_from_biguint, serde_biguint, serde_fr, Fr};
use crate::poseidon::poseidon_hash_many;
use crate::smt::MerkleIndex;

/// Maximum number of hex digits in an asset contract address (20 bytes).
const MAX_ADDR_DIGITS: usize = 40;

/// Bit offset of the asset type inside the encoded asset address.
const ASSET_TYPE_SHIFT: usize = 160;

/// Errors constructing notes and assets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoteError {
    #[error("Invalid asset address: {0:?}")]
    InvalidAssetAddress(String),
    #[error("Unknown asset type: {0}")]
    UnknownAssetType(String),
}

/// Token standard of an asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AssetType {
    Erc20 = 0,
    Erc721 = 1,
    Erc1155 = 2,
}

impl From<AssetType> for u8 {
    fn from(t: AssetType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for AssetType {
    type Error = NoteError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(AssetType::Erc20),
            1 => Ok(AssetType::Erc721),
            2 => Ok(AssetType::Erc1155),
            other => Err(NoteError::UnknownAssetType(other.to_string())),
        }
    }
}

impl FromStr for AssetType {
    type Err = NoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v: u8 = s
            .parse()
            .map_err(|_| NoteError::UnknownAssetType(s.to_string()))?;
        AssetType::try_from(v)
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Deserialize)]
struct AssetWire {
    asset_type: AssetType,
    asset_addr: String,
    #[serde(with = "serde_biguint")]
    id: BigUint,
}

/// An asset: token standard, contract address and token id.
///
/// The address is normalized to a lower-case `0x`-prefixed hex string on construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AssetWire")]
pub struct Asset {
    pub asset_type: AssetType,
    pub asset_addr: String,
    #[serde(with = "serde_biguint")]
    pub id: BigUint,
}

impl TryFrom<AssetWire> for Asset {
    type Error = NoteError;

    fn try_from(w: AssetWire) -> Result<Self, Self::Error> {
        Asset::new(w.asset_type, &w.asset_addr, w.id)
    }
}

impl Asset {
    /// Create an asset, validating and normalizing the address.
    pub fn new(asset_type: AssetType, asset_addr: &str, id: BigUint) -> Result<Self, NoteError> {
        let digits = asset_addr
            .strip_prefix("0x")
            .or_else(|| asset_addr.strip_prefix("0X"))
            .ok_or_else(|| NoteError::InvalidAssetAddress(asset_addr.to_string()))?;

        if digits.is_empty()
            || digits.len() > MAX_ADDR_DIGITS
            || !digits.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(NoteError::InvalidAssetAddress(asset_addr.to_string()));
        }

        Ok(Self {
            asset_type,
            asset_addr: format!("0x{}", digits.to_ascii_lowercase()),
            id,
        })
    }

    /// Fungible token shorthand with id 0.
    pub fn erc20(asset_addr: &str) -> Result<Self, NoteError> {
        Self::new(AssetType::Erc20, asset_addr, BigUint::default())
    }

    /// Field encoding of the address: `addr + (asset_type << 160)`.
    pub fn encoded_addr(&self) -> Fr {
        let digits = self
            .asset_addr
            .strip_prefix("0x")
            .unwrap_or(&self.asset_addr);
        let addr = BigUint::parse_bytes(digits.as_bytes(), 16).unwrap_or_default();
        let tagged = addr + (BigUint::from(self.asset_type as u8) << ASSET_TYPE_SHIFT);
        fr_from_biguint(&tagged)
    }

    /// Field encoding of the token id (reduced modulo the field).
    pub fn encoded_id(&self) -> Fr {
        fr_from_biguint(&self.id)
    }
}

/// A one-time receiving address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StealthAddress {
    #[serde(with = "serde_fr")]
    pub h1: Fr,
    #[serde(with = "serde_fr")]
    pub h2: Fr,
}

/// A private value record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub owner: StealthAddress,
    #[serde(with = "serde_fr")]
    pub nonce: Fr,
    pub asset: Asset,
    pub value: u128,
}

impl Note {
    /// Commitment published on chain in place of the note.
    pub fn commitment(&self) -> Fr {
        poseidon_hash_many(&[
            self.owner.h1,
            self.owner.h2,
            self.nonce,
            self.asset.encoded_addr(),
            self.asset.encoded_id(),
            Fr::from(self.value),
        ])
    }
}

/// A note at a known position in the commitment tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludedNote {
    pub note: Note,
    pub merkle_index: MerkleIndex,
}

impl IncludedNote {
    pub fn commitment(&self) -> Fr {
        self.note.commitment()
    }
}

/// An owned note together with the nullifier that will reveal its spend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludedNoteWithNullifier {
    pub note: IncludedNote,
    #[serde(with = "serde_fr")]
    pub nullifier: Fr,
}

impl IncludedNoteWithNullifier {
    pub fn merkle_index(&self) -> MerkleIndex {
        self.note.merkle_index
    }
}

/// Only the commitment of a note that belongs to someone else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludedNoteCommitment {
    #[serde(with = "serde_fr")]
    pub commitment: Fr,
    pub merkle_index: MerkleIndex,
}

/// A note as published encrypted to its owner.
///
/// The asset and commitment are public; nonce and value are encrypted under a key
/// the owner recovers from `encapped_key`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludedEncryptedNote {
    pub owner: StealthAddress,
    #[serde(with = "serde_fr")]
    pub encapped_key: Fr,
    #[serde(with = "serde_fr")]
    pub encrypted_nonce: Fr,
    #[serde(with = "serde_fr")]
    pub encrypted_value: Fr,
    pub asset: Asset,
    #[serde(with = "serde_fr")]
    pub commitment: Fr,
    pub merkle_index: MerkleIndex,
}
