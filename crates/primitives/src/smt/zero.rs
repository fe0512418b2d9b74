//! Tree shape constants and empty-subtree hashes.

use std::sync::OnceLock;

use ark_ff::MontFp;

use crate::field::Fr;
use crate::poseidon::poseidon_hash_many;

/// Children per internal node.
pub const ARITY: usize = 4;

/// Deepest supported tree (capacity `4^16 = 2^32` leaves).
pub const MAX_DEPTH: usize = 16;

/// Value of an empty leaf slot.
pub const ZERO_VALUE: Fr = MontFp!("0");

static ZERO_HASHES: OnceLock<Vec<Fr>> = OnceLock::new();

/// Hash of an empty subtree of the given height (0 = a single empty leaf).
pub fn zero_hash(height: usize) -> Fr {
    ZERO_HASHES.get_or_init(build_zero_hashes)[height]
}

/// Hash of an internal node from its children, in slot order.
pub fn hash_children(children: &[Fr; ARITY]) -> Fr {
    poseidon_hash_many(children)
}

fn build_zero_hashes() -> Vec<Fr> {
    let mut hashes = Vec::with_capacity(MAX_DEPTH + 1);
    let mut current = ZERO_VALUE;
    hashes.push(current);
    for _ in 0..MAX_DEPTH {
        current = hash_children(&[current; ARITY]);
        hashes.push(current);
    }
    hashes
}
