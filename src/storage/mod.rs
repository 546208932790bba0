//! Named cache partitions behind an injectable storage abstraction.

mod disk;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::http::Response;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Key→response stores grouped into named partitions.
///
/// Keys are absolute request URLs without fragments. Reads against a
/// partition that was never opened behave like reads against an empty one.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the partition if it does not exist yet.
    async fn open(&self, partition: &str) -> Result<()>;

    /// Returns true when the partition exists.
    async fn has_partition(&self, partition: &str) -> Result<bool>;

    /// Looks up a stored response.
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Response>>;

    /// Stores a response, replacing any previous value. Opens the partition
    /// implicitly.
    async fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()>;

    /// Removes an entry. Returns true if something was removed.
    async fn delete(&self, partition: &str, key: &str) -> Result<bool>;

    /// Lists all keys in the partition, sorted.
    async fn keys(&self, partition: &str) -> Result<Vec<String>>;

    /// Drops the partition and everything in it. Returns true if it existed.
    async fn delete_partition(&self, partition: &str) -> Result<bool>;

    /// Lists existing partitions, sorted.
    async fn partitions(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: CacheStorage + ?Sized> CacheStorage for Arc<T> {
    async fn open(&self, partition: &str) -> Result<()> {
        self.as_ref().open(partition).await
    }

    async fn has_partition(&self, partition: &str) -> Result<bool> {
        self.as_ref().has_partition(partition).await
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<Response>> {
        self.as_ref().get(partition, key).await
    }

    async fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()> {
        self.as_ref().put(partition, key, response).await
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool> {
        self.as_ref().delete(partition, key).await
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        self.as_ref().keys(partition).await
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        self.as_ref().delete_partition(partition).await
    }

    async fn partitions(&self) -> Result<Vec<String>> {
        self.as_ref().partitions().await
    }
}
