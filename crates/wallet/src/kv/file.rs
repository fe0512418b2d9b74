//! JSON-file backed store.
//!
//! The whole map is kept in memory and rewritten on every mutation through a
//! temporary file and a rename, so the file on disk always holds a complete
//! snapshot.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{KvError, KvStore};

pub struct FileKv {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileKv {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref().to_path_buf();

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| KvError::Corrupt {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = data.len(), "Opened file store");

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &BTreeMap<String, String>) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(data).map_err(|e| KvError::Backend(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKv {
    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put_string(&self, key: &str, value: String) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value);
        self.persist(&data).await
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        if data.remove(key).is_some() {
            self.persist(&data).await?;
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let mut removed = false;
        for key in keys {
            removed |= data.remove(key).is_some();
        }
        if removed {
            self.persist(&data).await?;
        }
        Ok(())
    }

    async fn iter_range(&self, start: &str, end: &str) -> Result<Vec<(String, String)>, KvError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let data = self.data.read().await;
        Ok(data
            .range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put_many(&self, entries: Vec<(String, String)>) -> Result<(), KvError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().await;
        data.extend(entries);
        self.persist(&data).await
    }
}
