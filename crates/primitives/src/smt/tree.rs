//! Sparse Merkle tree native implementation.
//!
//! The tree is a quaternary Merkle tree over a fixed index space of
//! `ARITY^depth` leaves that only grows by appending. Only the nodes needed to
//! prove the tracked leaves, and to keep appending, survive `prune()`; every
//! other subtree collapses into the hash of its root.
//!
//! Node storage follows the usual sparse layout: `(height, index) -> hash`,
//! with height 0 = leaves and height `depth` = root. A node missing from the map
//! hashes as the empty subtree of its height.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::proof::MerkleProof;
use super::zero::{hash_children, zero_hash, ARITY, MAX_DEPTH, ZERO_VALUE};
use crate::field::{serde_fr, Fr};

/// 0-based leaf position in the commitment tree.
pub type MerkleIndex = u64;

/// Errors from tree operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Index {index} exceeds tree capacity {capacity}")]
    IndexOutOfRange { index: MerkleIndex, capacity: u64 },
    #[error("Index {index} is behind the leaf count {count}")]
    IndexBehindCount { index: MerkleIndex, count: u64 },
    #[error("Leaf {0} is pruned or absent")]
    PrunedOrAbsent(MerkleIndex),
    #[error("Leaf {0} is not tracked")]
    NotTracked(MerkleIndex),
    #[error("Unsupported tree depth {0}")]
    InvalidDepth(usize),
    #[error("Corrupt tree dump: {0}")]
    CorruptDump(String),
}

/// Prunable sparse Merkle tree.
#[derive(Clone, Debug)]
pub struct SparseMerkleTree {
    /// Number of levels between the leaves and the root
    depth: usize,

    /// Leaves written so far; never decreases
    count: u64,

    /// Retained nodes: (height, index) -> hash
    nodes: HashMap<(usize, u64), Fr>,

    /// Tracked leaves, the ones proofs can be produced for
    leaves: BTreeMap<MerkleIndex, Fr>,
}

impl SparseMerkleTree {
    /// Create an empty tree. Panics unless `1 <= depth <= MAX_DEPTH`.
    pub fn new(depth: usize) -> Self {
        assert!(
            (1..=MAX_DEPTH).contains(&depth),
            "tree depth must be between 1 and {MAX_DEPTH}"
        );

        Self {
            depth,
            count: 0,
            nodes: HashMap::new(),
            leaves: BTreeMap::new(),
        }
    }

    /// Get the tree depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of leaf slots.
    pub fn capacity(&self) -> u64 {
        (ARITY as u64).pow(self.depth as u32)
    }

    /// Number of leaves written, i.e. the next index to append at.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get the current root hash.
    pub fn root(&self) -> Fr {
        self.node(self.depth, 0)
    }

    /// Whether a proof can be produced for `index`.
    pub fn is_tracked(&self, index: MerkleIndex) -> bool {
        self.leaves.contains_key(&index)
    }

    /// Tracked leaf indices in ascending order.
    pub fn tracked_indices(&self) -> impl Iterator<Item = MerkleIndex> + '_ {
        self.leaves.keys().copied()
    }

    /// Number of retained nodes, leaves included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Write `leaf` at `index`, zero-filling any gap since the last insert.
    pub fn insert(&mut self, index: MerkleIndex, leaf: Fr, include: bool) -> Result<(), TreeError> {
        self.check_append(index)?;

        self.nodes.insert((0, index), leaf);
        if include {
            self.leaves.insert(index, leaf);
        }
        self.count = index + 1;

        self.recompute_path(index);
        Ok(())
    }

    /// Write a contiguous run of leaves starting at `start`.
    ///
    /// Equivalent to inserting the leaves one by one, but every affected
    /// internal node is hashed once.
    pub fn insert_batch(
        &mut self,
        start: MerkleIndex,
        leaves: &[Fr],
        includes: &[bool],
    ) -> Result<(), TreeError> {
        assert_eq!(
            leaves.len(),
            includes.len(),
            "leaves and includes must have the same length"
        );
        if leaves.is_empty() {
            return Ok(());
        }

        let end = start + leaves.len() as u64 - 1;
        self.check_append(start)?;
        self.check_capacity(end)?;

        for (index, (&leaf, &include)) in (start..).zip(leaves.iter().zip(includes)) {
            self.nodes.insert((0, index), leaf);
            if include {
                self.leaves.insert(index, leaf);
            }
        }
        self.count = end + 1;

        let (mut lo, mut hi) = (start, end);
        for height in 0..self.depth {
            lo /= ARITY as u64;
            hi /= ARITY as u64;
            for (index, hash) in self.hash_parents(height, lo, hi) {
                self.nodes.insert((height + 1, index), hash);
            }
        }
        Ok(())
    }

    /// Grow the tree to `new_count` leaves with empty slots.
    pub fn pad_to(&mut self, new_count: u64) -> Result<(), TreeError> {
        if new_count <= self.count {
            return Ok(());
        }
        self.insert(new_count - 1, ZERO_VALUE, false)
    }

    /// Stop tracking `index`; it becomes prunable.
    pub fn mark_for_pruning(&mut self, index: MerkleIndex) -> Result<(), TreeError> {
        self.leaves
            .remove(&index)
            .map(|_| ())
            .ok_or(TreeError::NotTracked(index))
    }

    /// Generate a membership proof for a tracked leaf.
    pub fn get_proof(&self, index: MerkleIndex) -> Result<MerkleProof, TreeError> {
        let leaf = *self
            .leaves
            .get(&index)
            .ok_or(TreeError::PrunedOrAbsent(index))?;

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_indices = Vec::with_capacity(self.depth);

        let mut current = index;
        for height in 0..self.depth {
            let slot = (current % ARITY as u64) as usize;
            let children = self.children(height, current / ARITY as u64);

            let mut level = [ZERO_VALUE; ARITY - 1];
            let others = children
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != slot)
                .map(|(_, hash)| *hash);
            for (dst, hash) in level.iter_mut().zip(others) {
                *dst = hash;
            }

            siblings.push(level);
            path_indices.push(slot as u8);
            current /= ARITY as u64;
        }

        Ok(MerkleProof::new(self.root(), leaf, siblings, path_indices))
    }

    /// Drop every subtree not needed to prove a tracked leaf or to append.
    ///
    /// Returns the number of nodes removed.
    pub fn prune(&mut self) -> usize {
        let mut dropped = 0;
        self.prune_node(self.depth, 0, &mut dropped);
        dropped
    }

    /// Serializable snapshot of the retained structure.
    pub fn dump(&self) -> TreeDump {
        let mut nodes: Vec<DumpedNode> = self
            .nodes
            .iter()
            .map(|(&(height, index), &hash)| DumpedNode {
                height,
                index,
                hash,
            })
            .collect();
        nodes.sort_by_key(|n| (n.height, n.index));

        TreeDump {
            depth: self.depth,
            count: self.count,
            root: self.root(),
            nodes,
            leaves: self
                .leaves
                .iter()
                .map(|(&index, &hash)| DumpedLeaf { index, hash })
                .collect(),
        }
    }

    /// Restore a tree from `dump()` output, checking it for consistency.
    pub fn load(dump: TreeDump) -> Result<Self, TreeError> {
        if !(1..=MAX_DEPTH).contains(&dump.depth) {
            return Err(TreeError::InvalidDepth(dump.depth));
        }

        let mut tree = Self::new(dump.depth);
        if dump.count > tree.capacity() {
            return Err(TreeError::CorruptDump(format!(
                "count {} exceeds capacity {}",
                dump.count,
                tree.capacity()
            )));
        }
        tree.count = dump.count;

        for node in dump.nodes {
            if node.height > tree.depth {
                return Err(TreeError::CorruptDump(format!(
                    "node at height {} in a tree of depth {}",
                    node.height, tree.depth
                )));
            }
            tree.nodes.insert((node.height, node.index), node.hash);
        }

        for leaf in dump.leaves {
            if tree.nodes.get(&(0, leaf.index)) != Some(&leaf.hash) {
                return Err(TreeError::CorruptDump(format!(
                    "tracked leaf {} missing from node set",
                    leaf.index
                )));
            }
            tree.leaves.insert(leaf.index, leaf.hash);
        }

        if tree.root() != dump.root {
            return Err(TreeError::CorruptDump("root mismatch".to_string()));
        }
        Ok(tree)
    }

    fn check_capacity(&self, index: MerkleIndex) -> Result<(), TreeError> {
        if index >= self.capacity() {
            return Err(TreeError::IndexOutOfRange {
                index,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn check_append(&self, index: MerkleIndex) -> Result<(), TreeError> {
        self.check_capacity(index)?;
        if index < self.count {
            return Err(TreeError::IndexBehindCount {
                index,
                count: self.count,
            });
        }
        Ok(())
    }

    /// Get a node hash, returning the empty-subtree hash if not present.
    fn node(&self, height: usize, index: u64) -> Fr {
        self.nodes
            .get(&(height, index))
            .copied()
            .unwrap_or_else(|| zero_hash(height))
    }

    /// Hashes of the children (at `height`) of the node `parent`.
    fn children(&self, height: usize, parent: u64) -> [Fr; ARITY] {
        let first = parent * ARITY as u64;
        std::array::from_fn(|slot| self.node(height, first + slot as u64))
    }

    /// Recompute hashes from a leaf up to the root.
    fn recompute_path(&mut self, index: MerkleIndex) {
        let mut current = index;
        for height in 0..self.depth {
            let parent = current / ARITY as u64;
            let hash = hash_children(&self.children(height, parent));
            self.nodes.insert((height + 1, parent), hash);
            current = parent;
        }
    }

    /// New hashes for parents `lo..=hi` of nodes at `height`.
    #[cfg(feature = "parallel")]
    fn hash_parents(&self, height: usize, lo: u64, hi: u64) -> Vec<(u64, Fr)> {
        (lo..hi + 1)
            .into_par_iter()
            .map(|parent| (parent, hash_children(&self.children(height, parent))))
            .collect()
    }

    /// New hashes for parents `lo..=hi` of nodes at `height`.
    #[cfg(not(feature = "parallel"))]
    fn hash_parents(&self, height: usize, lo: u64, hi: u64) -> Vec<(u64, Fr)> {
        (lo..=hi)
            .map(|parent| (parent, hash_children(&self.children(height, parent))))
            .collect()
    }

    /// Post-order pruning pass; returns whether the node itself is prunable.
    fn prune_node(&mut self, height: usize, index: u64, dropped: &mut usize) -> bool {
        if height == 0 {
            return self.leaf_prunable(index);
        }

        let first = index * ARITY as u64;
        let mut prunable = true;
        for child in first..first + ARITY as u64 {
            // Nodes never written, or already collapsed, have nothing below them.
            if self.nodes.contains_key(&(height - 1, child)) {
                prunable &= self.prune_node(height - 1, child, dropped);
            }
        }
        prunable &= !self.is_open_frontier(height, index);

        if prunable {
            for child in first..first + ARITY as u64 {
                if self.nodes.remove(&(height - 1, child)).is_some() {
                    *dropped += 1;
                }
            }
        }
        prunable
    }

    fn leaf_prunable(&self, index: MerkleIndex) -> bool {
        let group_start = index - index % ARITY as u64;
        let group_tracked = self
            .leaves
            .range(group_start..group_start + ARITY as u64)
            .next()
            .is_some();

        !group_tracked && !self.is_open_frontier(1, index / ARITY as u64)
    }

    /// Whether the node holds the last written leaf and still has empty slots
    /// to its right. Future appends need all of its children.
    fn is_open_frontier(&self, height: usize, index: u64) -> bool {
        if self.count == 0 {
            return false;
        }
        let span = (ARITY as u64).pow(height as u32);
        index == (self.count - 1) / span && self.count % span != 0
    }
}

/// Serializable form of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDump {
    pub depth: usize,
    pub count: u64,
    #[serde(with = "serde_fr")]
    pub root: Fr,
    pub nodes: Vec<DumpedNode>,
    pub leaves: Vec<DumpedLeaf>,
}

/// A retained node in a `TreeDump`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpedNode {
    pub height: usize,
    pub index: u64,
    #[serde(with = "serde_fr")]
    pub hash: Fr,
}

/// A tracked leaf in a `TreeDump`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpedLeaf {
    pub index: MerkleIndex,
    #[serde(with = "serde_fr")]
    pub hash: Fr,
}

#[cfg(test)]
mod tree_tests {
    use super::*;

    fn leaf(i: u64) -> Fr {
        Fr::from(i + 1)
    }

    #[test]
    fn test_empty_tree() {
        let tree = SparseMerkleTree::new(MAX_DEPTH);

        assert_eq!(tree.count(), 0);
        assert_eq!(tree.capacity(), 1u64 << 32);
        assert_eq!(tree.root(), zero_hash(MAX_DEPTH));
        assert_eq!(tree.tracked_indices().count(), 0);
    }

    #[test]
    #[should_panic(expected = "tree depth")]
    fn test_zero_depth_rejected() {
        SparseMerkleTree::new(0);
    }

    #[test]
    fn test_single_insert_changes_root() {
        let mut tree = SparseMerkleTree::new(4);
        let root1 = tree.root();

        tree.insert(0, leaf(0), false).unwrap();

        assert_ne!(root1, tree.root());
        assert_eq!(tree.count(), 1);
        assert!(!tree.is_tracked(0));
    }

    #[test]
    fn test_insert_rejects_rewind_and_overflow() {
        let mut tree = SparseMerkleTree::new(2);
        tree.insert(3, leaf(3), false).unwrap();

        assert_eq!(
            tree.insert(2, leaf(2), false),
            Err(TreeError::IndexBehindCount { index: 2, count: 4 })
        );
        assert_eq!(
            tree.insert(16, leaf(16), false),
            Err(TreeError::IndexOutOfRange {
                index: 16,
                capacity: 16
            })
        );
        assert_eq!(tree.count(), 4);
    }

    #[test]
    fn test_batch_rejects_overflowing_run() {
        let mut tree = SparseMerkleTree::new(2);
        let err = tree
            .insert_batch(14, &[leaf(14), leaf(15), leaf(16)], &[false; 3])
            .unwrap_err();

        assert_eq!(
            err,
            TreeError::IndexOutOfRange {
                index: 16,
                capacity: 16
            }
        );
        assert_eq!(tree.count(), 0);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut tree = SparseMerkleTree::new(2);
        tree.insert_batch(5, &[], &[]).unwrap();
        assert_eq!(tree.count(), 0);
    }

    #[test]
    fn test_pad_to() {
        let mut padded = SparseMerkleTree::new(3);
        padded.insert(0, leaf(0), true).unwrap();
        let root = padded.root();

        padded.pad_to(10).unwrap();
        assert_eq!(padded.count(), 10);
        assert_eq!(padded.root(), root, "zero leaves do not change the root");

        padded.pad_to(5).unwrap();
        assert_eq!(padded.count(), 10);
    }

    #[test]
    fn test_mark_for_pruning() {
        let mut tree = SparseMerkleTree::new(2);
        tree.insert(0, leaf(0), true).unwrap();

        tree.mark_for_pruning(0).unwrap();
        assert!(!tree.is_tracked(0));
        assert_eq!(tree.mark_for_pruning(0), Err(TreeError::NotTracked(0)));
        assert_eq!(tree.get_proof(0), Err(TreeError::PrunedOrAbsent(0)));
    }

    #[test]
    fn test_load_rejects_tampered_dump() {
        let mut tree = SparseMerkleTree::new(2);
        tree.insert(0, leaf(0), true).unwrap();

        let mut dump = tree.dump();
        dump.root = Fr::from(123u64);
        assert!(matches!(
            SparseMerkleTree::load(dump),
            Err(TreeError::CorruptDump(_))
        ));

        let mut dump = tree.dump();
        dump.depth = MAX_DEPTH + 1;
        assert_eq!(
            SparseMerkleTree::load(dump).unwrap_err(),
            TreeError::InvalidDepth(MAX_DEPTH + 1)
        );
    }
}
