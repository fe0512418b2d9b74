//! Primitives for the shielded wallet state layer.
//!
//! This crate provides:
//! - `Fr`: the BN254 scalar field used for leaves, commitments and nullifiers
//! - Poseidon hashing over `Fr`
//! - Note, asset and stealth address types with their commitments
//! - `SparseMerkleTree`: the prunable quaternary commitment tree and its proofs

pub mod field;
pub mod note;
pub mod poseidon;
pub mod smt;

pub use field::{fr_from_decimal, fr_to_decimal, FieldError, Fr};
pub use note::{
    Asset, AssetType, IncludedEncryptedNote, IncludedNote, IncludedNoteCommitment,
    IncludedNoteWithNullifier, Note, NoteError, StealthAddress,
};
pub use smt::{
    zero_hash, MerkleIndex, MerkleProof, SparseMerkleTree, TreeDump, TreeError, ARITY, MAX_DEPTH,
    ZERO_VALUE,
};
