//! Client-side state for a shielded wallet.
//!
//! This crate provides:
//! - An ordered key-value storage contract with in-memory and file backends
//! - The note store: unspent notes indexed by position, asset and nullifier
//! - The syncer that applies chain state diffs to the note store and the
//!   commitment tree

pub mod adapter;
pub mod config;
pub mod diff;
pub mod keys;
pub mod kv;
pub mod note_store;
pub mod syncer;
pub mod tree_store;
pub mod viewer;

pub use adapter::{AdapterError, DiffStream, FeedAdapter, IterOptions, SyncAdapter};
pub use config::{ConfigError, WalletConfig};
pub use diff::{ClassifiedNote, DiffNote, EncryptedStateDiff, StateDiff, SyncCursor};
pub use keys::KeyError;
pub use kv::{FileKv, KvError, KvStore, MemoryKv};
pub use note_store::{AppliedDiff, NoteStore, NoteStoreError};
pub use syncer::{SyncError, SyncHandle, Syncer};
pub use tree_store::TreeStoreError;
pub use viewer::{encrypt_note, KeyViewer, Viewer, ViewerError};
