//! In-memory adapters for tests and local development.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use async_trait::async_trait;

use super::error::{StoreError, StoreResult};
use super::{BlobStore, DeleteOutcome, MessageSink};

/// In-memory blob store.
///
/// Cloning shares the underlying object map, so a test can keep a handle
/// and inspect what the pipeline wrote. Keys list in lexicographic order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Whether an object exists under `key`.
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<Vec<DeleteOutcome>> {
        let mut objects = self.objects.write().await;
        Ok(keys
            .iter()
            .map(|key| match objects.remove(key) {
                Some(_) => DeleteOutcome::deleted(key),
                None => DeleteOutcome::missing(key),
            })
            .collect())
    }
}

/// In-memory message sink that records every published payload.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<RwLock<Vec<(String, Vec<u8>)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(topic, payload)` pairs published so far, in publish order.
    pub async fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> StoreResult<()> {
        self.messages
            .write()
            .await
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}
