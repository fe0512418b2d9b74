//! Integration tests for the tree module.

use super::*;
use crate::field::Fr;
use ark_std::UniformRand;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_leaves(rng: &mut StdRng, n: usize) -> Vec<Fr> {
    (0..n).map(|_| Fr::rand(rng)).collect()
}

/// Tree of the given depth with `n` random leaves, tracking indices where `track(i)` holds.
fn build(depth: usize, n: usize, track: impl Fn(u64) -> bool) -> (SparseMerkleTree, Vec<Fr>) {
    let mut rng = StdRng::seed_from_u64(42);
    let leaves = random_leaves(&mut rng, n);
    let mut tree = SparseMerkleTree::new(depth);
    for (i, leaf) in leaves.iter().enumerate() {
        tree.insert(i as u64, *leaf, track(i as u64)).unwrap();
    }
    (tree, leaves)
}

#[test]
fn test_count_follows_last_index() {
    let mut tree = SparseMerkleTree::new(5);
    let mut rng = StdRng::seed_from_u64(1);

    let mut index = 0u64;
    for _ in 0..50 {
        index += rng.gen_range(0..4);
        tree.insert(index, Fr::rand(&mut rng), false).unwrap();
        assert_eq!(tree.count(), index + 1);
        index += 1;
    }
}

#[test]
fn test_gap_is_zero_filled() {
    let leaf = Fr::from(77u64);

    let mut gapped = SparseMerkleTree::new(3);
    gapped.insert(0, Fr::from(1u64), false).unwrap();
    gapped.insert(9, leaf, true).unwrap();

    let mut explicit = SparseMerkleTree::new(3);
    explicit.insert(0, Fr::from(1u64), false).unwrap();
    for i in 1..9 {
        explicit.insert(i, ZERO_VALUE, false).unwrap();
    }
    explicit.insert(9, leaf, true).unwrap();

    assert_eq!(gapped.count(), 10);
    assert_eq!(gapped.root(), explicit.root());
    assert_eq!(gapped.get_proof(9).unwrap(), explicit.get_proof(9).unwrap());
}

#[test]
fn test_every_tracked_proof_verifies() {
    let (tree, leaves) = build(4, 150, |i| i % 7 == 0);

    for i in tree.tracked_indices() {
        let proof = tree.get_proof(i).unwrap();
        assert!(proof.verify(), "proof for {} failed", i);
        assert_eq!(proof.leaf(), leaves[i as usize]);
        assert_eq!(proof.root(), tree.root());
        assert_eq!(proof.merkle_index(), i);
        assert_eq!(proof.depth(), 4);
    }
}

#[test]
fn test_untracked_proof_fails() {
    let (tree, _) = build(3, 20, |i| i == 3);

    assert_eq!(tree.get_proof(4), Err(TreeError::PrunedOrAbsent(4)));
    assert_eq!(tree.get_proof(40), Err(TreeError::PrunedOrAbsent(40)));
}

#[test]
fn test_prune_preserves_proofs() {
    let (mut tree, _) = build(4, 203, |i| i % 23 == 5);

    let tracked: Vec<u64> = tree.tracked_indices().collect();
    let before: Vec<MerkleProof> = tracked.iter().map(|&i| tree.get_proof(i).unwrap()).collect();
    let root = tree.root();
    let nodes = tree.node_count();

    let dropped = tree.prune();

    assert!(dropped > 0);
    assert_eq!(tree.node_count(), nodes - dropped);
    assert_eq!(tree.root(), root);
    for (i, proof) in tracked.iter().zip(&before) {
        assert_eq!(&tree.get_proof(*i).unwrap(), proof);
    }

    // A second pass has nothing left to drop.
    assert_eq!(tree.prune(), 0);
}

#[test]
fn test_prune_then_append_matches_unpruned() {
    let mut rng = StdRng::seed_from_u64(7);

    for initial in [1usize, 3, 4, 5, 15, 16, 17, 63, 64, 65, 100] {
        let leaves = random_leaves(&mut rng, initial + 40);

        let mut pruned = SparseMerkleTree::new(4);
        let mut full = SparseMerkleTree::new(4);
        for (i, leaf) in leaves[..initial].iter().enumerate() {
            pruned.insert(i as u64, *leaf, false).unwrap();
            full.insert(i as u64, *leaf, false).unwrap();
        }

        pruned.prune();

        // Appends right after the frontier, then across a gap.
        for (i, leaf) in leaves[initial..initial + 20].iter().enumerate() {
            let index = (initial + i) as u64;
            pruned.insert(index, *leaf, index % 3 == 0).unwrap();
            full.insert(index, *leaf, index % 3 == 0).unwrap();
        }
        let far = (initial + 37) as u64;
        pruned.insert(far, leaves[initial + 39], true).unwrap();
        full.insert(far, leaves[initial + 39], true).unwrap();

        assert_eq!(pruned.root(), full.root(), "diverged after {} leaves", initial);
        for i in full.tracked_indices() {
            assert_eq!(pruned.get_proof(i).unwrap(), full.get_proof(i).unwrap());
        }
    }
}

#[test]
fn test_nothing_tracked_prunes_to_frontier() {
    let (mut tree, _) = build(3, 18, |_| false);
    let root = tree.root();

    tree.prune();

    // Only the open frontier path and its siblings remain.
    assert_eq!(tree.root(), root);
    assert!(tree.node_count() < 18);
    tree.insert(18, Fr::from(5u64), true).unwrap();
    assert!(tree.get_proof(18).unwrap().verify());
}

#[test]
fn test_full_tree_prunes_to_root() {
    let (mut tree, _) = build(2, 16, |_| false);
    let root = tree.root();

    tree.prune();

    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.root(), root);
}

#[test]
fn test_batch_matches_single_inserts() {
    let mut rng = StdRng::seed_from_u64(3);
    let leaves = random_leaves(&mut rng, 70);
    let includes: Vec<bool> = (0..70).map(|i| i % 5 == 1).collect();

    let mut single = SparseMerkleTree::new(4);
    for (i, (leaf, include)) in leaves.iter().zip(&includes).enumerate() {
        single.insert(3 + i as u64, *leaf, *include).unwrap();
    }

    let mut batched = SparseMerkleTree::new(4);
    batched.insert_batch(3, &leaves[..30], &includes[..30]).unwrap();
    batched.insert_batch(33, &leaves[30..], &includes[30..]).unwrap();

    assert_eq!(single.count(), batched.count());
    assert_eq!(single.root(), batched.root());
    assert_eq!(single.dump(), batched.dump());
}

#[test]
fn test_dump_load_round_trip() {
    let (mut tree, _) = build(4, 97, |i| i % 11 == 2);
    tree.prune();

    let json = serde_json::to_string(&tree.dump()).unwrap();
    let dump: TreeDump = serde_json::from_str(&json).unwrap();
    let loaded = SparseMerkleTree::load(dump).unwrap();

    assert_eq!(loaded.count(), tree.count());
    assert_eq!(loaded.root(), tree.root());
    for i in tree.tracked_indices() {
        assert_eq!(loaded.get_proof(i).unwrap(), tree.get_proof(i).unwrap());
    }
    assert_eq!(loaded.dump(), tree.dump());
}

#[test]
fn test_proof_json_round_trip() {
    let (tree, _) = build(3, 10, |i| i == 6);
    let proof = tree.get_proof(6).unwrap();

    let json = serde_json::to_value(&proof).unwrap();
    assert_eq!(json["path_indices"], serde_json::json!([2, 1, 0]));

    let back: MerkleProof = serde_json::from_value(json).unwrap();
    assert_eq!(back, proof);
    assert!(back.verify());
}

#[test]
fn test_arity4_depth2_scenario() {
    let mut tree = SparseMerkleTree::new(2);
    for i in 0..16u64 {
        tree.insert(i, Fr::from(i + 1), matches!(i, 0 | 5 | 10)).unwrap();
    }

    tree.prune();

    for i in [0, 5, 10] {
        let proof = tree.get_proof(i).unwrap();
        assert!(proof.verify());
        assert_eq!(proof.leaf(), Fr::from(i + 1));
    }
    assert_eq!(tree.get_proof(1), Err(TreeError::PrunedOrAbsent(1)));
    assert_eq!(
        tree.insert(16, Fr::from(17u64), false),
        Err(TreeError::IndexOutOfRange {
            index: 16,
            capacity: 16
        })
    );
}

#[test]
fn test_tampered_sibling_fails() {
    let (tree, _) = build(3, 30, |i| i == 17);
    let proof = tree.get_proof(17).unwrap();

    let mut siblings = proof.siblings().to_vec();
    siblings[1][0] += Fr::from(1u64);
    let forged = MerkleProof::new(
        proof.root(),
        proof.leaf(),
        siblings,
        proof.path_indices().to_vec(),
    );

    assert!(!forged.verify());
}
