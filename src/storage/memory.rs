//! In-process partition storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::http::Response;

type Partitions = HashMap<String, BTreeMap<String, Response>>;

/// Partitions held in memory; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    partitions: Mutex<Partitions>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Partitions>> {
        self.partitions
            .lock()
            .map_err(|_| Error::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        self.lock()?.entry(partition.to_string()).or_default();
        Ok(())
    }

    async fn has_partition(&self, partition: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(partition))
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<Response>> {
        Ok(self
            .lock()?
            .get(partition)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()> {
        self.lock()?
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .get_mut(partition)
            .is_some_and(|entries| entries.remove(key).is_some()))
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .get(partition)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        Ok(self.lock()?.remove(partition).is_some())
    }

    async fn partitions(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
