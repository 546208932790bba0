//! Partition storage persisted on the local file system.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<partition>/<sha256(key)>.body   raw response bytes
//! <root>/<partition>/<sha256(key)>.json   key, url, status and headers
//! ```
//!
//! Both files are written to a `.tmp` sibling and renamed into place, body
//! first, so a listed entry always has a complete body.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::http::Response;

const META_EXT: &str = "json";
const BODY_EXT: &str = "body";

/// Metadata stored next to each body.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    url: String,
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// Partitions stored as directories under a root.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf> {
        if partition.is_empty()
            || partition == "."
            || partition == ".."
            || partition.contains(['/', '\\'])
        {
            return Err(Error::Storage(format!("invalid partition name: {partition:?}")));
        }
        Ok(self.root.join(partition))
    }

    fn entry_stem(key: &str) -> String {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes `contents` to `path` atomically (write tmp + rename).
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await
}

/// Removes a file, treating "not found" as `Ok(false)`.
async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.partition_dir(partition)?).await?;
        Ok(())
    }

    async fn has_partition(&self, partition: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.partition_dir(partition)?)
            .await
            .is_ok_and(|m| m.is_dir()))
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<Response>> {
        let dir = self.partition_dir(partition)?;
        let stem = Self::entry_stem(key);
        let Some(meta) = Self::read_meta(&dir.join(format!("{stem}.{META_EXT}"))).await? else {
            return Ok(None);
        };
        let body = match tokio::fs::read(dir.join(format!("{stem}.{BODY_EXT}"))).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Cache entry {key} in {partition} has no body, ignoring");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Response {
            url: meta.url,
            status: meta.status,
            headers: meta.headers,
            body: body.into(),
        }))
    }

    async fn put(&self, partition: &str, key: &str, response: &Response) -> Result<()> {
        let dir = self.partition_dir(partition)?;
        tokio::fs::create_dir_all(&dir).await?;

        let stem = Self::entry_stem(key);
        let meta = EntryMeta {
            key: key.to_string(),
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
        };
        write_atomic(&dir.join(format!("{stem}.{BODY_EXT}")), &response.body).await?;
        write_atomic(
            &dir.join(format!("{stem}.{META_EXT}")),
            &serde_json::to_vec(&meta)?,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool> {
        let dir = self.partition_dir(partition)?;
        let stem = Self::entry_stem(key);
        let removed = remove_if_exists(&dir.join(format!("{stem}.{META_EXT}"))).await?;
        remove_if_exists(&dir.join(format!("{stem}.{BODY_EXT}"))).await?;
        Ok(removed)
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>> {
        let dir = self.partition_dir(partition)?;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == META_EXT)
                && let Some(meta) = Self::read_meta(&path).await?
            {
                keys.push(meta.key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.partition_dir(partition)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn partitions(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
