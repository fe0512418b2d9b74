//! Local index of the wallet's unspent notes.
//!
//! Three views over the same notes are kept in the key-value store: the
//! authoritative record by merkle index, a set of merkle indices per asset,
//! and a nullifier to merkle index map. Writes are ordered so that a crash
//! never leaves the asset or nullifier view pointing at a missing record,
//! and every write is keyed by content so re-applying a diff is a no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use shielded_primitives::{Asset, Fr, IncludedNoteWithNullifier, MerkleIndex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::diff::{StateDiff, SyncCursor};
use crate::keys::{
    asset_key, index_key, nullifier_key, parse_asset_key, KeyError, NEXT_BLOCK_KEY,
    NEXT_MERKLE_INDEX_KEY, NOTES_BY_ASSET_PREFIX,
};
use crate::kv::{KvError, KvStore};

#[derive(Error, Debug)]
pub enum NoteStoreError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("Corrupt note store entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Outcome of applying one diff.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppliedDiff {
    /// Owned notes written, including ones nullified by the same diff.
    pub stored: usize,
    /// Merkle indices of notes removed by the diff's nullifiers.
    pub nullified: Vec<MerkleIndex>,
    pub cursor: SyncCursor,
}

type AssetSet = BTreeSet<MerkleIndex>;

pub struct NoteStore<K> {
    kv: Arc<K>,
    start_block: u64,
}

impl<K> Clone for NoteStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            start_block: self.start_block,
        }
    }
}

impl<K: KvStore> NoteStore<K> {
    /// `start_block` is reported by `next_block` until a cursor is persisted.
    pub fn new(kv: Arc<K>, start_block: u64) -> Self {
        Self { kv, start_block }
    }

    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    /// Write the notes to all three views. Notes already present are rewritten
    /// with identical values.
    pub async fn store_notes(
        &self,
        notes: &[IncludedNoteWithNullifier],
    ) -> Result<(), NoteStoreError> {
        if notes.is_empty() {
            return Ok(());
        }

        let mut by_asset: BTreeMap<String, Vec<MerkleIndex>> = BTreeMap::new();
        let mut records = Vec::with_capacity(notes.len());
        let mut nullifiers = Vec::with_capacity(notes.len());
        for note in notes {
            let index = note.merkle_index();
            records.push((index_key(index), encode(note)?));
            nullifiers.push((nullifier_key(&note.nullifier), index.to_string()));
            by_asset
                .entry(asset_key(&note.note.note.asset))
                .or_default()
                .push(index);
        }

        let keys: Vec<String> = by_asset.keys().cloned().collect();
        let existing = self.kv.get_many(&keys).await?;
        let mut sets = Vec::with_capacity(keys.len());
        for ((key, added), raw) in by_asset.into_iter().zip(existing) {
            let mut set: AssetSet = match raw {
                Some(raw) => decode(&key, &raw)?,
                None => AssetSet::new(),
            };
            set.extend(added);
            sets.push((key, encode(&set)?));
        }

        // Records first: the other views may only reference stored records.
        let mut entries = records;
        entries.extend(nullifiers);
        entries.extend(sets);
        self.kv.put_many(entries).await?;

        debug!(count = notes.len(), "stored notes");
        Ok(())
    }

    /// Remove the notes revealed by `nullifiers` from every view.
    ///
    /// Unknown nullifiers belong to other parties and are skipped. Returns the
    /// merkle indices of the removed notes.
    ///
    /// Asset sets are updated first, then records are removed, and nullifier
    /// keys go last. A crash part way through leaves the nullifier lookup in
    /// place, so replaying the same nullifiers finishes the removal.
    pub async fn nullify_notes(
        &self,
        nullifiers: &[Fr],
    ) -> Result<Vec<MerkleIndex>, NoteStoreError> {
        let nf_keys: Vec<String> = nullifiers.iter().map(nullifier_key).collect();
        let indices = self.kv.get_many(&nf_keys).await?;

        let mut spent: BTreeMap<MerkleIndex, String> = BTreeMap::new();
        for (nf_key, raw) in nf_keys.into_iter().zip(indices) {
            let Some(raw) = raw else { continue };
            let index = raw.parse().map_err(|_| NoteStoreError::Corrupt {
                key: nf_key.clone(),
                reason: format!("expected a merkle index, found {raw:?}"),
            })?;
            spent.entry(index).or_insert(nf_key);
        }
        if spent.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<String> = spent.keys().copied().map(index_key).collect();
        let records = self.kv.get_many(&record_keys).await?;

        let mut by_asset: BTreeMap<String, Vec<MerkleIndex>> = BTreeMap::new();
        for ((index, key), raw) in spent.keys().zip(&record_keys).zip(records) {
            match raw {
                Some(raw) => {
                    let note: IncludedNoteWithNullifier = decode(key, &raw)?;
                    by_asset
                        .entry(asset_key(&note.note.note.asset))
                        .or_default()
                        .push(*index);
                }
                None => warn!(index, "nullifier references a missing note record"),
            }
        }

        let set_keys: Vec<String> = by_asset.keys().cloned().collect();
        let existing = self.kv.get_many(&set_keys).await?;
        let mut updated_sets = Vec::new();
        let mut removals = Vec::new();
        for ((key, gone), raw) in by_asset.into_iter().zip(existing) {
            let Some(raw) = raw else { continue };
            let mut set: AssetSet = decode(&key, &raw)?;
            let before = set.len();
            for index in &gone {
                set.remove(index);
            }
            if set.len() == before {
                continue;
            }
            if set.is_empty() {
                removals.push(key);
            } else {
                updated_sets.push((key, encode(&set)?));
            }
        }

        self.kv.put_many(updated_sets).await?;
        removals.extend(record_keys);
        removals.extend(spent.values().cloned());
        self.kv.remove_many(&removals).await?;

        let removed: Vec<MerkleIndex> = spent.into_keys().collect();
        debug!(?removed, "nullified notes");
        Ok(removed)
    }

    pub async fn get_note(
        &self,
        index: MerkleIndex,
    ) -> Result<Option<IncludedNoteWithNullifier>, NoteStoreError> {
        let key = index_key(index);
        match self.kv.get_string(&key).await? {
            Some(raw) => Ok(Some(decode(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Unspent notes of `asset`, ascending by merkle index.
    pub async fn get_notes_for_asset(
        &self,
        asset: &Asset,
    ) -> Result<Vec<IncludedNoteWithNullifier>, NoteStoreError> {
        let key = asset_key(asset);
        match self.kv.get_string(&key).await? {
            Some(raw) => {
                let set: AssetSet = decode(&key, &raw)?;
                self.load_records(set).await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn load_records(
        &self,
        set: AssetSet,
    ) -> Result<Vec<IncludedNoteWithNullifier>, NoteStoreError> {
        let keys: Vec<String> = set.into_iter().map(index_key).collect();
        let values = self.kv.get_many(&keys).await?;

        keys.iter()
            .zip(values)
            .map(|(key, raw)| match raw {
                Some(raw) => decode(key, &raw),
                None => Err(NoteStoreError::Corrupt {
                    key: key.clone(),
                    reason: "asset index references a missing note".to_string(),
                }),
            })
            .collect()
    }

    pub async fn get_balance_for_asset(&self, asset: &Asset) -> Result<u128, NoteStoreError> {
        let notes = self.get_notes_for_asset(asset).await?;
        Ok(total_value(&notes))
    }

    /// Every unspent note, grouped by asset in key order.
    pub async fn get_all_notes(
        &self,
    ) -> Result<Vec<(Asset, Vec<IncludedNoteWithNullifier>)>, NoteStoreError> {
        let prefix = format!("{NOTES_BY_ASSET_PREFIX}-");
        let mut grouped = Vec::new();
        for (key, raw) in self.kv.iter_prefix(&prefix).await? {
            let asset = parse_asset_key(&key)?;
            let set: AssetSet = decode(&key, &raw)?;
            grouped.push((asset, self.load_records(set).await?));
        }
        Ok(grouped)
    }

    pub async fn get_all_balances(&self) -> Result<Vec<(Asset, u128)>, NoteStoreError> {
        Ok(self
            .get_all_notes()
            .await?
            .into_iter()
            .map(|(asset, notes)| {
                let balance = total_value(&notes);
                (asset, balance)
            })
            .collect())
    }

    /// Merkle indices of the known notes among `nullifiers`, without removing them.
    pub async fn merkle_indices_for_nullifiers(
        &self,
        nullifiers: &[Fr],
    ) -> Result<Vec<MerkleIndex>, NoteStoreError> {
        let keys: Vec<String> = nullifiers.iter().map(nullifier_key).collect();
        let values = self.kv.get_many(&keys).await?;

        let mut indices = Vec::new();
        for (key, raw) in keys.iter().zip(values) {
            if let Some(raw) = raw {
                let index = raw.parse().map_err(|_| NoteStoreError::Corrupt {
                    key: key.clone(),
                    reason: format!("expected a merkle index, found {raw:?}"),
                })?;
                indices.push(index);
            }
        }
        Ok(indices)
    }

    /// Store owned notes, then nullify, then advance the cursor.
    ///
    /// Storing before nullifying makes a note created and spent in the same
    /// diff end up absent. The cursor is written only after both succeed.
    pub async fn apply_state_diff(&self, diff: &StateDiff) -> Result<AppliedDiff, NoteStoreError> {
        let owned: Vec<IncludedNoteWithNullifier> = diff.owned_notes().cloned().collect();
        self.store_notes(&owned).await?;
        let nullified = self.nullify_notes(&diff.nullifiers).await?;
        self.set_cursor(diff.next_cursor).await?;

        Ok(AppliedDiff {
            stored: owned.len(),
            nullified,
            cursor: diff.next_cursor,
        })
    }

    pub async fn set_cursor(&self, cursor: SyncCursor) -> Result<(), NoteStoreError> {
        // Written in one batch, merkle index first.
        self.kv
            .put_many(vec![
                (
                    NEXT_MERKLE_INDEX_KEY.to_string(),
                    cursor.next_merkle_index.to_string(),
                ),
                (NEXT_BLOCK_KEY.to_string(), cursor.next_block.to_string()),
            ])
            .await?;
        Ok(())
    }

    pub async fn next_block(&self) -> Result<u64, NoteStoreError> {
        Ok(self
            .kv
            .get_number(NEXT_BLOCK_KEY)
            .await?
            .unwrap_or(self.start_block))
    }

    pub async fn next_merkle_index(&self) -> Result<MerkleIndex, NoteStoreError> {
        Ok(self
            .kv
            .get_number(NEXT_MERKLE_INDEX_KEY)
            .await?
            .unwrap_or(0))
    }

    pub async fn cursor(&self) -> Result<SyncCursor, NoteStoreError> {
        Ok(SyncCursor {
            next_block: self.next_block().await?,
            next_merkle_index: self.next_merkle_index().await?,
        })
    }
}

fn total_value(notes: &[IncludedNoteWithNullifier]) -> u128 {
    notes
        .iter()
        .fold(0u128, |acc, n| acc.saturating_add(n.note.note.value))
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, NoteStoreError> {
    serde_json::to_string(value).map_err(|e| NoteStoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, NoteStoreError> {
    serde_json::from_str(raw).map_err(|e| NoteStoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests;
