//! In-memory store for tests and ephemeral wallets.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KvError, KvStore};

/// In-process ordered store.
#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current entry count
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Copy of every entry, for inspection in tests.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put_string(&self, key: &str, value: String) -> Result<(), KvError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        self.data.write().await.remove(key);
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

    async fn remove_many(&self, keys: &[String]) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        let data = self.data.read().await;
        Ok(keys.iter().map(|key| data.get(key).cloned()).collect())
    }

    async fn put_many(&self, entries: Vec<(String, String)>) -> Result<(), KvError> {
        self.data.write().await.extend(entries);
        Ok(())
    }
}
