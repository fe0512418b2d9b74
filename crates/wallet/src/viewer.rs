//! Ownership detection, note decryption and nullifier derivation.

use ark_ff::Zero;
use shielded_primitives::field::fr_to_u128;
use shielded_primitives::poseidon::{poseidon_hash, poseidon_hash_two};
use shielded_primitives::{Fr, IncludedEncryptedNote, IncludedNote, Note, StealthAddress};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewerError {
    #[error("Address is not owned by this viewer")]
    NotOwned,
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Capability to recognise and open the local party's notes.
///
/// A viewer can see notes but not necessarily spend them.
pub trait Viewer: Send + Sync {
    fn is_own_address(&self, addr: &StealthAddress) -> bool;

    /// Nullifier revealed when `note` is spent. Fails if the note is not ours.
    fn create_nullifier(&self, note: &Note) -> Result<Fr, ViewerError>;

    /// Recover the plaintext of an encrypted note already known to be ours.
    fn decrypt_note(&self, encrypted: &IncludedEncryptedNote) -> Result<Note, ViewerError>;
}

/// Viewer backed by a single field-element viewing key.
///
/// Addresses satisfy `h2 = h1 * vk`. Nullifiers are `H(commitment, vk)`. Notes
/// are encrypted with a Poseidon keystream under `H(encapped_key * vk)`.
/// This is field arithmetic, not a curve scheme: it exercises the sync path
/// end to end but gives no privacy against someone who learns `h1`/`h2`.
#[derive(Clone)]
pub struct KeyViewer {
    vk: Fr,
}

impl KeyViewer {
    pub fn new(vk: Fr) -> Self {
        Self { vk }
    }

    /// A receiving address derived from the randomness `r`.
    pub fn generate_address(&self, r: Fr) -> StealthAddress {
        StealthAddress {
            h1: r,
            h2: r * self.vk,
        }
    }
}

impl Viewer for KeyViewer {
    fn is_own_address(&self, addr: &StealthAddress) -> bool {
        !addr.h1.is_zero() && addr.h2 == addr.h1 * self.vk
    }

    fn create_nullifier(&self, note: &Note) -> Result<Fr, ViewerError> {
        if !self.is_own_address(&note.owner) {
            return Err(ViewerError::NotOwned);
        }
        Ok(poseidon_hash_two(note.commitment(), self.vk))
    }

    fn decrypt_note(&self, encrypted: &IncludedEncryptedNote) -> Result<Note, ViewerError> {
        if !self.is_own_address(&encrypted.owner) {
            return Err(ViewerError::NotOwned);
        }

        let key = poseidon_hash(encrypted.encapped_key * self.vk);
        let (nonce_pad, value_pad) = keystream(key);

        let value = fr_to_u128(&(encrypted.encrypted_value - value_pad))
            .ok_or_else(|| ViewerError::Decryption("value out of range".to_string()))?;
        let note = Note {
            owner: encrypted.owner,
            nonce: encrypted.encrypted_nonce - nonce_pad,
            asset: encrypted.asset.clone(),
            value,
        };

        if note.commitment() != encrypted.commitment {
            return Err(ViewerError::Decryption(format!(
                "commitment mismatch at merkle index {}",
                encrypted.merkle_index
            )));
        }
        Ok(note)
    }
}

/// Encrypt `note` to its owner with sender randomness `ephemeral`.
///
/// The owner recovers the key as `H(encapped_key * vk)` because
/// `h2 * e = h1 * vk * e`.
pub fn encrypt_note(note: &IncludedNote, ephemeral: Fr) -> IncludedEncryptedNote {
    let owner = note.note.owner;
    let key = poseidon_hash(owner.h2 * ephemeral);
    let (nonce_pad, value_pad) = keystream(key);

    IncludedEncryptedNote {
        owner,
        encapped_key: owner.h1 * ephemeral,
        encrypted_nonce: note.note.nonce + nonce_pad,
        encrypted_value: Fr::from(note.note.value) + value_pad,
        asset: note.note.asset.clone(),
        commitment: note.commitment(),
        merkle_index: note.merkle_index,
    }
}

fn keystream(key: Fr) -> (Fr, Fr) {
    (
        poseidon_hash_two(key, Fr::from(0u64)),
        poseidon_hash_two(key, Fr::from(1u64)),
    )
}
