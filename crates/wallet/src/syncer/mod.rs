//! Chain syncer: pulls state diffs, classifies them and applies them to the
//! note store and the commitment tree.
//!
//! Each diff is applied in the same order every time:
//!
//! 1. classify entries as owned notes or opaque commitments
//! 2. append the leaves to the tree, tracking owned ones
//! 3. stop tracking owned notes revealed by the diff's nullifiers
//! 4. prune the tree if configured, then persist the dump
//! 5. store notes, nullify, then write the cursor
//!
//! A crash anywhere before the cursor write leaves the cursor behind the
//! tree. Replaying the diff skips leaves the tree already holds and rewrites
//! identical store entries, so it has no further effect.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::StreamExt;
use rayon::prelude::*;
use shielded_primitives::{
    Fr, IncludedNote, IncludedNoteCommitment, IncludedNoteWithNullifier, MerkleIndex,
    SparseMerkleTree, TreeDump, TreeError,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, IterOptions, SyncAdapter};
use crate::config::WalletConfig;
use crate::diff::{ClassifiedNote, DiffNote, EncryptedStateDiff, StateDiff, SyncCursor};
use crate::kv::KvStore;
use crate::note_store::{AppliedDiff, NoteStore, NoteStoreError};
use crate::tree_store::{load_tree, save_tree_dump, TreeStoreError};
use crate::viewer::{Viewer, ViewerError};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    NoteStore(#[from] NoteStoreError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    TreeStore(#[from] TreeStoreError),
    #[error("Out of order state diff: {0}")]
    OutOfOrder(String),
    #[error("Classification task failed: {0}")]
    Classify(#[from] tokio::task::JoinError),
    #[error("Tree lock poisoned")]
    LockPoisoned,
    #[error("Tree holds {tree_count} leaves but the cursor is at merkle index {cursor}")]
    TreeBehindCursor { tree_count: u64, cursor: MerkleIndex },
}

pub struct Syncer<K, V, A> {
    notes: NoteStore<K>,
    tree: Arc<RwLock<SparseMerkleTree>>,
    viewer: Arc<V>,
    adapter: Arc<A>,
    config: WalletConfig,
    cancel: Arc<watch::Sender<bool>>,
    /// Held for the duration of a sync run so diffs are never applied concurrently.
    running: Mutex<()>,
}

impl<K, V, A> Syncer<K, V, A>
where
    K: KvStore + 'static,
    V: Viewer + 'static,
    A: SyncAdapter + 'static,
{
    /// Load the persisted tree and check it against the persisted cursor.
    pub async fn open(
        kv: Arc<K>,
        viewer: Arc<V>,
        adapter: Arc<A>,
        config: WalletConfig,
    ) -> Result<Self, SyncError> {
        let tree = load_tree(kv.as_ref(), config.tree_depth).await?;
        let notes = NoteStore::new(kv, config.start_block);

        let cursor = notes.next_merkle_index().await?;
        if tree.count() < cursor {
            return Err(SyncError::TreeBehindCursor {
                tree_count: tree.count(),
                cursor,
            });
        }
        info!(
            depth = tree.depth(),
            count = tree.count(),
            tracked = tree.tracked_indices().count(),
            "opened wallet state"
        );

        let (cancel, _) = watch::channel(false);
        Ok(Self {
            notes,
            tree: Arc::new(RwLock::new(tree)),
            viewer,
            adapter,
            config,
            cancel: Arc::new(cancel),
            running: Mutex::new(()),
        })
    }

    pub fn note_store(&self) -> &NoteStore<K> {
        &self.notes
    }

    /// Shared handle to the tree for readers such as proof generation.
    pub fn tree(&self) -> Arc<RwLock<SparseMerkleTree>> {
        Arc::clone(&self.tree)
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Stop the current and any later sync runs after the diff being applied.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Sync with the configured chunk size and end block.
    pub async fn sync(&self) -> Result<SyncCursor, SyncError> {
        self.sync_with(self.config.iter_options()).await
    }

    /// Apply every diff the adapter has past the persisted cursor.
    ///
    /// Returns the cursor after the last applied diff. Cancellation is only
    /// observed while waiting for the next diff.
    pub async fn sync_with(&self, opts: IterOptions) -> Result<SyncCursor, SyncError> {
        let _running = self.running.lock().await;
        let mut cancelled = self.cancel.subscribe();

        let mut cursor = self.notes.cursor().await?;
        info!(
            next_block = cursor.next_block,
            next_merkle_index = cursor.next_merkle_index,
            "sync started"
        );

        let mut diffs = self.adapter.iter_state_diffs(cursor, opts);
        let mut applied = 0usize;
        loop {
            if *cancelled.borrow_and_update() {
                info!("sync cancelled");
                break;
            }

            let next = tokio::select! {
                biased;
                changed = cancelled.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = diffs.next() => next,
            };
            let Some(diff) = next else {
                break;
            };

            cursor = self.apply_diff(cursor, diff?).await?.cursor;
            applied += 1;
        }

        info!(
            applied,
            next_block = cursor.next_block,
            next_merkle_index = cursor.next_merkle_index,
            "sync finished"
        );
        Ok(cursor)
    }

    /// Apply one diff on top of `cursor`.
    pub async fn apply_diff(
        &self,
        cursor: SyncCursor,
        diff: EncryptedStateDiff,
    ) -> Result<AppliedDiff, SyncError> {
        check_order(cursor, &diff)?;

        let state = self.classify(diff).await?;

        // Nullifiers of notes already stored plus owned notes created by this diff.
        let mut spent = self
            .notes
            .merkle_indices_for_nullifiers(&state.nullifiers)
            .await?;
        let revealed: HashSet<Fr> = state.nullifiers.iter().copied().collect();
        spent.extend(
            state
                .owned_notes()
                .filter(|n| revealed.contains(&n.nullifier))
                .map(IncludedNoteWithNullifier::merkle_index),
        );

        let dump = {
            let mut tree = self.write_tree()?;
            let inserted = feed_tree(&mut tree, &state.notes)?;
            tree.pad_to(state.next_cursor.next_merkle_index)?;
            for &index in &spent {
                if tree.is_tracked(index) {
                    tree.mark_for_pruning(index)?;
                }
            }
            let dropped = if self.config.prune_tree {
                tree.prune()
            } else {
                0
            };
            debug!(inserted, dropped, count = tree.count(), "fed tree");
            self.config.persist_tree.then(|| tree.dump())
        };
        if let Some(dump) = dump {
            self.save_dump(&dump).await?;
        }

        let applied = self.notes.apply_state_diff(&state).await?;
        debug!(
            next_block = applied.cursor.next_block,
            next_merkle_index = applied.cursor.next_merkle_index,
            entries = state.notes.len(),
            stored = applied.stored,
            nullified = applied.nullified.len(),
            "applied state diff"
        );
        Ok(applied)
    }

    /// Classify every entry, in order, on the rayon pool.
    ///
    /// Runs on a blocking thread; entries the viewer rejected are logged once
    /// classification is done.
    pub async fn classify(&self, diff: EncryptedStateDiff) -> Result<StateDiff, SyncError> {
        let viewer = Arc::clone(&self.viewer);
        let EncryptedStateDiff {
            notes,
            nullifiers,
            next_cursor,
        } = diff;

        let classified: Vec<(ClassifiedNote, Option<ViewerError>)> =
            tokio::task::spawn_blocking(move || {
                notes
                    .into_par_iter()
                    .map(|note| classify_note(viewer.as_ref(), note))
                    .collect()
            })
            .await?;

        let mut notes = Vec::with_capacity(classified.len());
        for (note, rejected) in classified {
            if let Some(e) = rejected {
                warn!(
                    merkle_index = note.merkle_index(),
                    error = %e,
                    "cannot open owned note"
                );
            }
            notes.push(note);
        }

        Ok(StateDiff {
            notes,
            nullifiers,
            next_cursor,
        })
    }

    /// Prune the tree and persist the result. Returns the number of dropped nodes.
    pub async fn prune_and_persist(&self) -> Result<usize, SyncError> {
        let (dropped, dump) = {
            let mut tree = self.write_tree()?;
            let dropped = tree.prune();
            (dropped, self.config.persist_tree.then(|| tree.dump()))
        };
        if let Some(dump) = dump {
            self.save_dump(&dump).await?;
        }
        debug!(dropped, "pruned tree");
        Ok(dropped)
    }

    async fn save_dump(&self, dump: &TreeDump) -> Result<(), SyncError> {
        save_tree_dump(self.notes.kv().as_ref(), dump).await?;
        Ok(())
    }

    pub fn read_tree(&self) -> Result<RwLockReadGuard<'_, SparseMerkleTree>, SyncError> {
        self.tree.read().map_err(|_| SyncError::LockPoisoned)
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, SparseMerkleTree>, SyncError> {
        self.tree.write().map_err(|_| SyncError::LockPoisoned)
    }

    /// Run `sync` every `interval` until the handle is closed.
    pub fn spawn_loop(self: Arc<Self>, interval: Duration) -> SyncHandle {
        let cancel = Arc::clone(&self.cancel);
        let mut cancelled = cancel.subscribe();

        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = self.sync().await {
                    warn!(error = %e, "sync run failed");
                }
                if *cancelled.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    _ = cancelled.changed() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("sync loop stopped");
        });

        SyncHandle { cancel, task }
    }
}

/// Handle to a background sync loop.
pub struct SyncHandle {
    cancel: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the loop to stop and wait for it. Any diff being applied is
    /// finished first, so the persisted cursor always matches a whole diff.
    pub async fn close(self) {
        self.cancel.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync loop panicked");
        }
    }
}

fn check_order(cursor: SyncCursor, diff: &EncryptedStateDiff) -> Result<(), SyncError> {
    let next = diff.next_cursor;
    if next.next_block < cursor.next_block {
        return Err(SyncError::OutOfOrder(format!(
            "block {} is behind cursor block {}",
            next.next_block, cursor.next_block
        )));
    }
    if next.next_merkle_index < cursor.next_merkle_index {
        return Err(SyncError::OutOfOrder(format!(
            "tree size {} is behind cursor index {}",
            next.next_merkle_index, cursor.next_merkle_index
        )));
    }
    if let Some((a, b)) = diff.ordering_violation() {
        return Err(SyncError::OutOfOrder(format!(
            "entries not ascending: {a} then {b}"
        )));
    }
    if let Some(last) = diff.notes.last() {
        if last.merkle_index() >= next.next_merkle_index {
            return Err(SyncError::OutOfOrder(format!(
                "entry {} beyond declared tree size {}",
                last.merkle_index(),
                next.next_merkle_index
            )));
        }
    }
    Ok(())
}

/// Reduce one entry to what the wallet keeps of it.
///
/// Entries addressed to us that cannot be opened or nullified are kept as
/// opaque commitments, together with the viewer's error, so a bad entry
/// never stops the sync.
fn classify_note<V: Viewer + ?Sized>(
    viewer: &V,
    note: DiffNote,
) -> (ClassifiedNote, Option<ViewerError>) {
    let merkle_index = note.merkle_index();
    let opaque = |commitment| {
        ClassifiedNote::Opaque(IncludedNoteCommitment {
            commitment,
            merkle_index,
        })
    };

    match note {
        DiffNote::Plain(note) if viewer.is_own_address(&note.note.owner) => {
            match viewer.create_nullifier(&note.note) {
                Ok(nullifier) => (
                    ClassifiedNote::Owned(IncludedNoteWithNullifier { note, nullifier }),
                    None,
                ),
                Err(e) => (opaque(note.commitment()), Some(e)),
            }
        }
        DiffNote::Plain(note) => (opaque(note.commitment()), None),
        DiffNote::Encrypted(enc) if viewer.is_own_address(&enc.owner) => {
            let opened = viewer.decrypt_note(&enc).and_then(|plain| {
                let nullifier = viewer.create_nullifier(&plain)?;
                Ok((plain, nullifier))
            });
            match opened {
                Ok((plain, nullifier)) => (
                    ClassifiedNote::Owned(IncludedNoteWithNullifier {
                        note: IncludedNote {
                            note: plain,
                            merkle_index,
                        },
                        nullifier,
                    }),
                    None,
                ),
                Err(e) => (opaque(enc.commitment), Some(e)),
            }
        }
        DiffNote::Encrypted(enc) => (opaque(enc.commitment), None),
    }
}

/// Append the entries the tree does not hold yet, in contiguous runs.
///
/// Returns the number of leaves written.
fn feed_tree(tree: &mut SparseMerkleTree, notes: &[ClassifiedNote]) -> Result<usize, TreeError> {
    let count = tree.count();
    let fresh = notes.iter().skip_while(|n| n.merkle_index() < count);

    let mut inserted = 0;
    let mut run_start: MerkleIndex = 0;
    let mut leaves = Vec::new();
    let mut includes = Vec::new();
    for note in fresh {
        let index = note.merkle_index();
        if !leaves.is_empty() && index != run_start + leaves.len() as u64 {
            tree.insert_batch(run_start, &leaves, &includes)?;
            inserted += leaves.len();
            leaves.clear();
            includes.clear();
        }
        if leaves.is_empty() {
            run_start = index;
        }
        leaves.push(note.commitment());
        includes.push(note.is_owned());
    }
    tree.insert_batch(run_start, &leaves, &includes)?;
    inserted += leaves.len();

    Ok(inserted)
}
