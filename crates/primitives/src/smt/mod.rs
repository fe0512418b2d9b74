//! Sparse, prunable quaternary Merkle tree over note commitments.
//!
//! This module provides:
//! - `SparseMerkleTree`: append-only insertion, pruning and proof generation
//! - `MerkleProof`: a self-contained membership proof with pure verification
//! - `TreeDump`: the serializable form of a (pruned) tree

mod proof;
mod tree;
mod zero;

#[cfg(test)]
mod tests;

pub use proof::MerkleProof;
pub use tree::{MerkleIndex, SparseMerkleTree, TreeDump, TreeError};
pub use zero::{hash_children, zero_hash, ARITY, MAX_DEPTH, ZERO_VALUE};
