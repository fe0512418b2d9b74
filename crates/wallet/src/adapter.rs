//! Source of chain state diffs.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::diff::{EncryptedStateDiff, SyncCursor};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Adapter I/O error: {0}")]
    Io(String),
    #[error("Malformed state diff: {0}")]
    Malformed(String),
}

/// Bounds for one sync run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterOptions {
    /// Suggested number of blocks per diff. Adapters may return less.
    pub max_chunk_size: Option<u64>,
    /// Stop before any diff that would end past this block.
    pub end_block: Option<u64>,
}

pub type DiffStream = BoxStream<'static, Result<EncryptedStateDiff, AdapterError>>;

/// Delivers diffs starting at a cursor.
///
/// Diffs arrive in increasing cursor order and the entries of each diff are
/// ascending by merkle index. The stream ends when the adapter has nothing
/// newer than the last diff it yielded.
pub trait SyncAdapter: Send + Sync {
    fn iter_state_diffs(&self, start: SyncCursor, opts: IterOptions) -> DiffStream;
}

/// In-process adapter over diffs pushed by a relayer or a test.
///
/// Each pushed diff covers the blocks between the previous diff's
/// `next_block` and its own. Streams read the feed lazily, so diffs pushed
/// while a sync is running are picked up by that sync.
#[derive(Clone, Default)]
pub struct FeedAdapter {
    diffs: Arc<RwLock<Vec<EncryptedStateDiff>>>,
}

impl FeedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diff, rejecting one that does not extend the feed.
    pub async fn push(&self, diff: EncryptedStateDiff) -> Result<(), AdapterError> {
        if let Some((a, b)) = diff.ordering_violation() {
            return Err(AdapterError::Malformed(format!(
                "entries not ascending: {a} then {b}"
            )));
        }
        if let Some(last) = diff.notes.last() {
            if last.merkle_index() >= diff.next_cursor.next_merkle_index {
                return Err(AdapterError::Malformed(format!(
                    "entry {} beyond declared tree size {}",
                    last.merkle_index(),
                    diff.next_cursor.next_merkle_index
                )));
            }
        }

        let mut diffs = self.diffs.write().await;
        if let Some(prev) = diffs.last() {
            let prev = prev.next_cursor;
            if diff.next_cursor.next_block <= prev.next_block {
                return Err(AdapterError::Malformed(format!(
                    "block {} does not advance past {}",
                    diff.next_cursor.next_block, prev.next_block
                )));
            }
            let first = diff.notes.first().map(|n| n.merkle_index());
            if diff.next_cursor.next_merkle_index < prev.next_merkle_index
                || first.is_some_and(|i| i < prev.next_merkle_index)
            {
                return Err(AdapterError::Malformed(format!(
                    "merkle index regresses below {}",
                    prev.next_merkle_index
                )));
            }
        }
        diffs.push(diff);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.diffs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.diffs.read().await.is_empty()
    }

    /// Cursor after the newest pushed diff.
    pub async fn head(&self) -> Option<SyncCursor> {
        self.diffs.read().await.last().map(|d| d.next_cursor)
    }

    /// Next chunk after `from`: the first unseen diff merged with as many
    /// followers as fit in `max_chunk_size` blocks.
    async fn next_chunk(&self, from: u64, opts: IterOptions) -> Option<EncryptedStateDiff> {
        let diffs = self.diffs.read().await;
        let within_end = |d: &&EncryptedStateDiff| {
            opts.end_block
                .map_or(true, |end| d.next_cursor.next_block <= end)
        };

        let start = diffs.partition_point(|d| d.next_cursor.next_block <= from);
        let mut pending = diffs[start..].iter().take_while(within_end);

        let mut chunk = pending.next()?.clone();
        if let Some(max) = opts.max_chunk_size {
            for next in pending {
                if next.next_cursor.next_block - from > max {
                    break;
                }
                chunk = chunk.merge(next.clone());
            }
        }
        Some(chunk)
    }
}

impl SyncAdapter for FeedAdapter {
    fn iter_state_diffs(&self, start: SyncCursor, opts: IterOptions) -> DiffStream {
        let feed = self.clone();
        stream::unfold(start.next_block, move |from| {
            let feed = feed.clone();
            async move {
                let chunk = feed.next_chunk(from, opts).await?;
                let next = chunk.next_cursor.next_block;
                Some((Ok(chunk), next))
            }
        })
        .boxed()
    }
}
