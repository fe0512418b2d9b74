//! Poseidon hash over the BN254 scalar field.
//!
//! Node hashes of the commitment tree, note commitments and the reference
//! viewer's nullifiers all go through the same sponge configuration.

mod config;
mod native;


pub use config::poseidon_config;
pub use native::{poseidon_hash, poseidon_hash_many, poseidon_hash_two};
