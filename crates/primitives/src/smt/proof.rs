//! Merkle proof structure for tree membership verification.

use serde::{Deserialize, Serialize};

use super::tree::MerkleIndex;
use super::zero::{hash_children, ARITY, ZERO_VALUE};
use crate::field::{fr_from_decimal, fr_to_decimal, Fr};

/// A Merkle proof for a single leaf.
///
/// Levels run from the leaf (0) to just below the root. At each level the
/// running hash sits in child slot `path_indices[level]` and the three
/// `siblings[level]` fill the other slots in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProofWire", into = "ProofWire")]
pub struct MerkleProof {
    root: Fr,
    leaf: Fr,
    siblings: Vec<[Fr; ARITY - 1]>,
    path_indices: Vec<u8>,
}

impl MerkleProof {
    /// Create a new Merkle proof. Panics on a malformed shape.
    pub fn new(root: Fr, leaf: Fr, siblings: Vec<[Fr; ARITY - 1]>, path_indices: Vec<u8>) -> Self {
        assert_eq!(
            siblings.len(),
            path_indices.len(),
            "siblings and path indices must have same length"
        );
        assert!(
            path_indices.iter().all(|&slot| (slot as usize) < ARITY),
            "path index out of range"
        );
        Self {
            root,
            leaf,
            siblings,
            path_indices,
        }
    }

    pub fn root(&self) -> Fr {
        self.root
    }

    pub fn leaf(&self) -> Fr {
        self.leaf
    }

    pub fn siblings(&self) -> &[[Fr; ARITY - 1]] {
        &self.siblings
    }

    pub fn path_indices(&self) -> &[u8] {
        &self.path_indices
    }

    /// Number of levels in the proof.
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Leaf position encoded by the path.
    pub fn merkle_index(&self) -> MerkleIndex {
        self.path_indices
            .iter()
            .rev()
            .fold(0, |acc, &slot| acc * ARITY as u64 + slot as u64)
    }

    /// Recombine the leaf with the siblings up to a root.
    pub fn compute_root(&self) -> Fr {
        let mut current = self.leaf;

        for (siblings, &slot) in self.siblings.iter().zip(&self.path_indices) {
            let slot = slot as usize;
            let mut children = [ZERO_VALUE; ARITY];
            let mut rest = siblings.iter();
            for (i, child) in children.iter_mut().enumerate() {
                if i == slot {
                    *child = current;
                } else if let Some(&sibling) = rest.next() {
                    *child = sibling;
                }
            }
            current = hash_children(&children);
        }

        current
    }

    /// Check the proof against its own root. Needs no tree.
    pub fn verify(&self) -> bool {
        self.compute_root() == self.root
    }
}

/// JSON shape of a proof: field elements as decimal strings.
#[derive(Serialize, Deserialize)]
struct ProofWire {
    root: String,
    leaf: String,
    siblings: Vec<Vec<String>>,
    path_indices: Vec<u8>,
}

impl From<MerkleProof> for ProofWire {
    fn from(p: MerkleProof) -> Self {
        Self {
            root: fr_to_decimal(&p.root),
            leaf: fr_to_decimal(&p.leaf),
            siblings: p
                .siblings
                .iter()
                .map(|level| level.iter().map(fr_to_decimal).collect())
                .collect(),
            path_indices: p.path_indices,
        }
    }
}

impl TryFrom<ProofWire> for MerkleProof {
    type Error = String;

    fn try_from(w: ProofWire) -> Result<Self, Self::Error> {
        let parse = |s: &String| fr_from_decimal(s).map_err(|e| e.to_string());

        if w.siblings.len() != w.path_indices.len() {
            return Err("siblings and path indices differ in length".to_string());
        }
        if w.path_indices.iter().any(|&slot| slot as usize >= ARITY) {
            return Err("path index out of range".to_string());
        }

        let mut siblings = Vec::with_capacity(w.siblings.len());
        for level in &w.siblings {
            if level.len() != ARITY - 1 {
                return Err(format!("expected {} siblings per level", ARITY - 1));
            }
            let mut hashes = [ZERO_VALUE; ARITY - 1];
            for (dst, s) in hashes.iter_mut().zip(level) {
                *dst = parse(s)?;
            }
            siblings.push(hashes);
        }

        Ok(MerkleProof {
            root: parse(&w.root)?,
            leaf: parse(&w.leaf)?,
            siblings,
            path_indices: w.path_indices,
        })
    }
}
