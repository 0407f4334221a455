//! Local-filesystem adapters.
//!
//! Keys map to paths under a base directory; `/` in a key becomes a
//! directory separator. Listing walks the tree and returns keys sorted
//! lexicographically, matching the other adapters.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::{StoreError, StoreResult};
use super::{BlobStore, DeleteOutcome, MessageSink};

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create the store, making sure the base directory exists.
    pub async fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|part| !matches!(part, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StoreError::configuration(format!(
                "invalid object key: {key:?}"
            )));
        }
        Ok(self.base_dir.join(relative))
    }

    async fn ensure_parent(path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.base_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.base_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(key))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let path = match self.path_for(key) {
                Ok(path) => path,
                Err(err) => {
                    outcomes.push(DeleteOutcome::failed(key, err.to_string()));
                    continue;
                }
            };
            let outcome = match fs::remove_file(&path).await {
                Ok(()) => DeleteOutcome::deleted(key),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    DeleteOutcome::missing(key)
                }
                Err(err) => DeleteOutcome::failed(key, err.to_string()),
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Message sink that appends one line of payload per publish to
/// `{base_dir}/{topic}.ndjson`.
#[derive(Debug, Clone)]
pub struct FileSink {
    base_dir: PathBuf,
}

impl FileSink {
    pub async fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }
}

#[async_trait]
impl MessageSink for FileSink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> StoreResult<()> {
        let path = self.base_dir.join(format!("{topic}.ndjson"));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(payload).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}
