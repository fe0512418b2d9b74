use super::*;
use crate::diff::ClassifiedNote;
use crate::keys::{NOTES_BY_INDEX_PREFIX, NOTES_BY_NULLIFIER_PREFIX};
use crate::kv::MemoryKv;
use num_bigint::BigUint;
use shielded_primitives::{AssetType, IncludedNote, IncludedNoteCommitment, Note, StealthAddress};

fn owned(index: MerkleIndex, asset: &Asset, value: u128) -> IncludedNoteWithNullifier {
    IncludedNoteWithNullifier {
        note: IncludedNote {
            note: Note {
                owner: StealthAddress {
                    h1: Fr::from(3u64),
                    h2: Fr::from(21u64),
                },
                nonce: Fr::from(index + 1000),
                asset: asset.clone(),
                value,
            },
            merkle_index: index,
        },
        nullifier: Fr::from(index + 7_000_000),
    }
}

fn store() -> (Arc<MemoryKv>, NoteStore<MemoryKv>) {
    let kv = Arc::new(MemoryKv::new());
    (Arc::clone(&kv), NoteStore::new(kv, 100))
}

fn token(addr: &str) -> Asset {
    Asset::erc20(addr).unwrap()
}

#[tokio::test]
async fn test_notes_for_asset_is_exact_subset() {
    let (_, store) = store();
    let a = token("0xaaa");
    let b = token("0xbbb");
    let nft = Asset::new(AssetType::Erc721, "0xaaa", BigUint::from(9u32)).unwrap();

    let notes = vec![
        owned(0, &a, 5),
        owned(3, &b, 7),
        owned(4, &a, 11),
        owned(8, &nft, 1),
        owned(9, &a, 2),
    ];
    store.store_notes(&notes).await.unwrap();

    let for_a = store.get_notes_for_asset(&a).await.unwrap();
    let expected: Vec<_> = notes.iter().filter(|n| n.note.note.asset == a).cloned().collect();
    assert_eq!(for_a, expected);
    assert_eq!(store.get_notes_for_asset(&nft).await.unwrap(), vec![notes[3].clone()]);
    assert!(store.get_notes_for_asset(&token("0xccc")).await.unwrap().is_empty());

    assert_eq!(store.get_balance_for_asset(&a).await.unwrap(), 18);
    assert_eq!(store.get_balance_for_asset(&b).await.unwrap(), 7);
}

#[tokio::test]
async fn test_store_is_idempotent() {
    let (kv, store) = store();
    let a = token("0xaaa");
    let notes = vec![owned(1, &a, 5), owned(2, &a, 6)];

    store.store_notes(&notes).await.unwrap();
    let first = kv.snapshot().await;
    store.store_notes(&notes).await.unwrap();
    store.store_notes(&notes[..1]).await.unwrap();

    assert_eq!(kv.snapshot().await, first);
    assert_eq!(store.get_notes_for_asset(&a).await.unwrap(), notes);
}

#[tokio::test]
async fn test_incremental_store_unions_asset_set() {
    let (_, store) = store();
    let a = token("0xaaa");

    store.store_notes(&[owned(1, &a, 5)]).await.unwrap();
    store.store_notes(&[owned(6, &a, 6)]).await.unwrap();

    assert_eq!(store.get_balance_for_asset(&a).await.unwrap(), 11);
}

#[tokio::test]
async fn test_nullify_removes_from_every_view() {
    let (kv, store) = store();
    let a = token("0xaaa");
    let notes = vec![owned(1, &a, 5), owned(2, &a, 6)];
    store.store_notes(&notes).await.unwrap();

    let removed = store.nullify_notes(&[notes[0].nullifier]).await.unwrap();

    assert_eq!(removed, vec![1]);
    assert_eq!(store.get_notes_for_asset(&a).await.unwrap(), vec![notes[1].clone()]);
    assert_eq!(store.get_balance_for_asset(&a).await.unwrap(), 6);
    assert_eq!(store.get_note(1).await.unwrap(), None);
    assert!(store
        .merkle_indices_for_nullifiers(&[notes[0].nullifier])
        .await
        .unwrap()
        .is_empty());

    store.nullify_notes(&[notes[1].nullifier]).await.unwrap();
    assert!(kv.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_unknown_nullifier_is_noop() {
    let (kv, store) = store();
    let a = token("0xaaa");
    store.store_notes(&[owned(1, &a, 5)]).await.unwrap();
    let before = kv.snapshot().await;

    let removed = store.nullify_notes(&[Fr::from(424242u64)]).await.unwrap();

    assert!(removed.is_empty());
    assert_eq!(kv.snapshot().await, before);
}

#[tokio::test]
async fn test_same_diff_create_and_nullify() {
    let (kv, store) = store();
    let a = token("0xaaa");
    let spent = owned(5, &a, 40);
    let kept = owned(6, &a, 2);
    let cursor = SyncCursor {
        next_block: 321,
        next_merkle_index: 9,
    };

    let diff = StateDiff {
        notes: vec![
            ClassifiedNote::Opaque(IncludedNoteCommitment {
                commitment: Fr::from(1u64),
                merkle_index: 4,
            }),
            ClassifiedNote::Owned(spent.clone()),
            ClassifiedNote::Owned(kept.clone()),
        ],
        nullifiers: vec![spent.nullifier, Fr::from(999u64)],
        next_cursor: cursor,
    };
    let applied = store.apply_state_diff(&diff).await.unwrap();

    assert_eq!(applied.stored, 2);
    assert_eq!(applied.nullified, vec![5]);
    assert_eq!(applied.cursor, cursor);
    assert_eq!(store.cursor().await.unwrap(), cursor);

    let snapshot = kv.snapshot().await;
    assert!(!snapshot.contains_key(&index_key(5)));
    assert!(!snapshot.contains_key(&nullifier_key(&spent.nullifier)));
    assert_eq!(store.get_notes_for_asset(&a).await.unwrap(), vec![kept]);
}

#[tokio::test]
async fn test_cursor_defaults_to_start() {
    let (_, store) = store();

    assert_eq!(store.next_block().await.unwrap(), 100);
    assert_eq!(store.next_merkle_index().await.unwrap(), 0);

    store
        .set_cursor(SyncCursor {
            next_block: 150,
            next_merkle_index: 12,
        })
        .await
        .unwrap();
    assert_eq!(store.next_block().await.unwrap(), 150);
    assert_eq!(store.next_merkle_index().await.unwrap(), 12);
}

#[tokio::test]
async fn test_key_layout() {
    let (kv, store) = store();
    let a = token("0xabc");
    let note = owned(42, &a, 1);
    store.store_notes(&[note.clone()]).await.unwrap();

    let keys: Vec<String> = kv.snapshot().await.into_keys().collect();
    assert_eq!(
        keys,
        vec![
            "NOTES_BY_ASSET-0-0XABC-0".to_string(),
            format!("{NOTES_BY_INDEX_PREFIX}-0000000042"),
            format!("{NOTES_BY_NULLIFIER_PREFIX}-7000042"),
        ]
    );
    assert_eq!(
        kv.get_string("NOTES_BY_ASSET-0-0XABC-0").await.unwrap().as_deref(),
        Some("[42]")
    );
}

#[tokio::test]
async fn test_all_balances_grouped_by_asset() {
    let (_, store) = store();
    let a = token("0xaaa");
    let b = token("0xbbb");
    store
        .store_notes(&[owned(0, &b, 3), owned(1, &a, 4), owned(2, &a, 5)])
        .await
        .unwrap();

    let balances = store.get_all_balances().await.unwrap();
    assert_eq!(balances, vec![(a.clone(), 9), (b.clone(), 3)]);

    let grouped = store.get_all_notes().await.unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0].0, a);
    assert_eq!(grouped[0].1.len(), 2);
}

#[tokio::test]
async fn test_corrupt_asset_set_is_fatal() {
    let (kv, store) = store();
    let a = token("0xaaa");
    kv.put_string(&asset_key(&a), "not json".to_string())
        .await
        .unwrap();

    assert!(matches!(
        store.get_notes_for_asset(&a).await,
        Err(NoteStoreError::Corrupt { .. })
    ));
}

#[tokio::test]
async fn test_malformed_asset_key_is_fatal() {
    let (kv, store) = store();
    kv.put_string("NOTES_BY_ASSET-7-0XABC-0", "[]".to_string())
        .await
        .unwrap();

    assert!(matches!(
        store.get_all_notes().await,
        Err(NoteStoreError::Key(_))
    ));
}

/// Fails the first removal of a note record, then behaves like `MemoryKv`.
#[derive(Default)]
struct FlakyRecordRemoval {
    inner: MemoryKv,
    tripped: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl KvStore for FlakyRecordRemoval {
    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
        self.inner.get_string(key).await
    }

    async fn put_string(&self, key: &str, value: String) -> Result<(), KvError> {
        self.inner.put_string(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        use std::sync::atomic::Ordering;
        if key.starts_with(NOTES_BY_INDEX_PREFIX) && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(KvError::Backend("disk full".to_string()));
        }
        self.inner.remove(key).await
    }

    async fn iter_range(&self, start: &str, end: &str) -> Result<Vec<(String, String)>, KvError> {
        self.inner.iter_range(start, end).await
    }
}

#[tokio::test]
async fn test_replay_after_failed_nullify_removes_record() {
    let kv = Arc::new(FlakyRecordRemoval::default());
    let store = NoteStore::new(Arc::clone(&kv), 0);
    let a = token("0xaaa");
    let spent = owned(5, &a, 40);
    store.store_notes(&[spent.clone()]).await.unwrap();

    let diff = StateDiff {
        notes: Vec::new(),
        nullifiers: vec![spent.nullifier],
        next_cursor: SyncCursor {
            next_block: 10,
            next_merkle_index: 6,
        },
    };
    assert!(store.apply_state_diff(&diff).await.is_err());
    assert_eq!(store.next_block().await.unwrap(), 0);

    let applied = store.apply_state_diff(&diff).await.unwrap();
    assert_eq!(applied.nullified, vec![5]);
    assert_eq!(store.get_note(5).await.unwrap(), None);
    assert!(store.get_notes_for_asset(&a).await.unwrap().is_empty());
    assert!(kv.inner.iter_prefix("NOTES_").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_nullify_many_in_one_call() {
    let (kv, store) = store();
    let a = token("0xaaa");
    let b = token("0xbbb");
    let notes = vec![owned(1, &a, 3), owned(2, &a, 4), owned(3, &b, 5)];
    store.store_notes(&notes).await.unwrap();

    let removed = store
        .nullify_notes(&[notes[2].nullifier, notes[0].nullifier, notes[0].nullifier])
        .await
        .unwrap();

    assert_eq!(removed, vec![1, 3]);
    assert_eq!(store.get_notes_for_asset(&a).await.unwrap(), vec![notes[1].clone()]);
    assert!(!kv.snapshot().await.contains_key(&asset_key(&b)));
}
