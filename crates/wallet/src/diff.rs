//! State diffs: what changed on chain between two sync checkpoints.

use serde::{Deserialize, Serialize};
use shielded_primitives::field::serde_fr_vec;
use shielded_primitives::{
    Fr, IncludedEncryptedNote, IncludedNote, IncludedNoteCommitment, IncludedNoteWithNullifier,
    MerkleIndex,
};

/// Where the next sync resumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncCursor {
    pub next_block: u64,
    pub next_merkle_index: u64,
}

/// A new tree leaf as published on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffNote {
    Plain(IncludedNote),
    Encrypted(IncludedEncryptedNote),
}

impl DiffNote {
    pub fn merkle_index(&self) -> MerkleIndex {
        match self {
            DiffNote::Plain(note) => note.merkle_index,
            DiffNote::Encrypted(note) => note.merkle_index,
        }
    }
}

/// A diff as delivered by a `SyncAdapter`.
///
/// `notes` lists only non-empty leaves, strictly ascending by merkle index.
/// `next_cursor.next_merkle_index` is the tree size after the diff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedStateDiff {
    pub notes: Vec<DiffNote>,
    #[serde(with = "serde_fr_vec")]
    pub nullifiers: Vec<Fr>,
    pub next_cursor: SyncCursor,
}

impl EncryptedStateDiff {
    /// The first pair of entries that is not strictly ascending, if any.
    pub fn ordering_violation(&self) -> Option<(MerkleIndex, MerkleIndex)> {
        self.notes
            .windows(2)
            .map(|w| (w[0].merkle_index(), w[1].merkle_index()))
            .find(|(a, b)| a >= b)
    }

    /// Combine with the diff that immediately follows this one.
    pub fn merge(mut self, later: EncryptedStateDiff) -> EncryptedStateDiff {
        self.notes.extend(later.notes);
        self.nullifiers.extend(later.nullifiers);
        self.next_cursor = later.next_cursor;
        self
    }
}

/// A diff entry after ownership classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassifiedNote {
    /// One of ours: kept in full with its nullifier.
    Owned(IncludedNoteWithNullifier),
    /// Someone else's: only the leaf value is kept.
    Opaque(IncludedNoteCommitment),
}

impl ClassifiedNote {
    pub fn merkle_index(&self) -> MerkleIndex {
        match self {
            ClassifiedNote::Owned(note) => note.merkle_index(),
            ClassifiedNote::Opaque(c) => c.merkle_index,
        }
    }

    /// The tree leaf for this entry.
    pub fn commitment(&self) -> Fr {
        match self {
            ClassifiedNote::Owned(note) => note.note.commitment(),
            ClassifiedNote::Opaque(c) => c.commitment,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ClassifiedNote::Owned(_))
    }
}

/// A diff ready to be applied to the note store and the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateDiff {
    pub notes: Vec<ClassifiedNote>,
    pub nullifiers: Vec<Fr>,
    pub next_cursor: SyncCursor,
}

impl StateDiff {
    pub fn owned_notes(&self) -> impl Iterator<Item = &IncludedNoteWithNullifier> {
        self.notes.iter().filter_map(|n| match n {
            ClassifiedNote::Owned(note) => Some(note),
            ClassifiedNote::Opaque(_) => None,
        })
    }
}
