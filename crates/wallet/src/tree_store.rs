//! Persistence of the commitment tree alongside the note store.

use shielded_primitives::{SparseMerkleTree, TreeDump, TreeError, MAX_DEPTH};
use thiserror::Error;

use crate::keys::MERKLE_TREE_DUMP_KEY;
use crate::kv::{KvError, KvStore};

#[derive(Error, Debug)]
pub enum TreeStoreError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("Tree dump is not valid JSON: {0}")]
    Json(String),
    #[error("Stored tree has depth {stored}, configured depth is {configured}")]
    DepthMismatch { stored: usize, configured: usize },
}

/// Restore the persisted tree, or start an empty one of `depth`.
pub async fn load_tree<K: KvStore + ?Sized>(
    kv: &K,
    depth: usize,
) -> Result<SparseMerkleTree, TreeStoreError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(TreeError::InvalidDepth(depth).into());
    }

    let Some(raw) = kv.get_string(MERKLE_TREE_DUMP_KEY).await? else {
        return Ok(SparseMerkleTree::new(depth));
    };

    let dump: TreeDump = serde_json::from_str(&raw).map_err(|e| TreeStoreError::Json(e.to_string()))?;
    if dump.depth != depth {
        return Err(TreeStoreError::DepthMismatch {
            stored: dump.depth,
            configured: depth,
        });
    }
    Ok(SparseMerkleTree::load(dump)?)
}

pub async fn save_tree_dump<K: KvStore + ?Sized>(
    kv: &K,
    dump: &TreeDump,
) -> Result<(), TreeStoreError> {
    let raw = serde_json::to_string(dump).map_err(|e| TreeStoreError::Json(e.to_string()))?;
    kv.put_string(MERKLE_TREE_DUMP_KEY, raw).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use shielded_primitives::Fr;

    #[tokio::test]
    async fn test_missing_dump_gives_empty_tree() {
        let kv = MemoryKv::new();
        let tree = load_tree(&kv, 4).await.unwrap();

        assert_eq!(tree.count(), 0);
        assert_eq!(tree.depth(), 4);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let kv = MemoryKv::new();
        let mut tree = SparseMerkleTree::new(3);
        for i in 0..20u64 {
            tree.insert(i, Fr::from(i + 1), i == 13).unwrap();
        }
        tree.prune();

        save_tree_dump(&kv, &tree.dump()).await.unwrap();
        let loaded = load_tree(&kv, 3).await.unwrap();

        assert_eq!(loaded.root(), tree.root());
        assert_eq!(loaded.get_proof(13).unwrap(), tree.get_proof(13).unwrap());
    }

    #[tokio::test]
    async fn test_rejects_depth_mismatch_and_garbage() {
        let kv = MemoryKv::new();
        save_tree_dump(&kv, &SparseMerkleTree::new(3).dump())
            .await
            .unwrap();

        assert!(matches!(
            load_tree(&kv, 4).await,
            Err(TreeStoreError::DepthMismatch {
                stored: 3,
                configured: 4
            })
        ));
        assert!(matches!(
            load_tree(&kv, 0).await,
            Err(TreeStoreError::Tree(TreeError::InvalidDepth(0)))
        ));

        kv.put_string(MERKLE_TREE_DUMP_KEY, "{".to_string())
            .await
            .unwrap();
        assert!(matches!(
            load_tree(&kv, 3).await,
            Err(TreeStoreError::Json(_))
        ));
    }
}
