//! Ordered key-value storage contract.
//!
//! Keys are compared lexicographically. Single-key operations are atomic;
//! batches are not required to be transactional across keys.

mod file;
mod memory;

pub use file::FileKv;
pub use memory::MemoryKv;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt value at '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn put_string(&self, key: &str, value: String) -> Result<(), KvError>;
    async fn remove(&self, key: &str) -> Result<(), KvError>;

    /// All entries with `start <= key < end`, in key order.
    async fn iter_range(&self, start: &str, end: &str) -> Result<Vec<(String, String)>, KvError>;

    /// Default implementation falls back to sequential gets.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get_string(key).await?);
        }
        Ok(values)
    }

    /// Write entries in order. Default implementation falls back to sequential puts.
    async fn put_many(&self, entries: Vec<(String, String)>) -> Result<(), KvError> {
        for (key, value) in entries {
            self.put_string(&key, value).await?;
        }
        Ok(())
    }

    /// Remove keys in order. Default implementation falls back to sequential removes.
    async fn remove_many(&self, keys: &[String]) -> Result<(), KvError> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }

    async fn get_number(&self, key: &str) -> Result<Option<u64>, KvError> {
        match self.get_string(key).await? {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| KvError::Corrupt {
                key: key.to_string(),
                reason: format!("expected an unsigned integer, found {raw:?}"),
            }),
        }
    }

    async fn put_number(&self, key: &str, value: u64) -> Result<(), KvError> {
        self.put_string(key, value.to_string()).await
    }

    /// All entries whose key starts with `prefix`, in key order.
    async fn iter_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, KvError> {
        let end = format!("{prefix}\u{10ffff}");
        let mut entries = self.iter_range(prefix, &end).await?;
        entries.retain(|(key, _)| key.starts_with(prefix));
        Ok(entries)
    }
}
