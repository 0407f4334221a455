//! Storage abstraction layer: blob store and message sink capabilities.
//!
//! The pipeline only ever talks to these two traits; which vendor sits
//! behind them is a runtime adapter choice. Adapters ship for local
//! development and tests ([`MemoryStore`], [`FileStore`]) and, behind the
//! `s3` cargo feature, AWS S3.
//!
//! Keys are opaque `/`-separated strings. `list` returns keys in
//! lexicographic order on every adapter, so chunk partitioning is
//! deterministic regardless of backend.

pub mod error;
pub mod file;
pub mod memory;
pub mod retry;
#[cfg(feature = "s3")]
pub mod s3;

pub use error::{StoreError, StoreResult};
pub use file::{FileSink, FileStore};
pub use memory::{MemorySink, MemoryStore};
pub use retry::with_retry;
#[cfg(feature = "s3")]
pub use s3::S3Store;

use async_trait::async_trait;

/// Durable blob storage shared by every pipeline stage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List all keys starting with `prefix`, in lexicographic order.
    ///
    /// An empty result is a legitimate outcome, not an error; callers that
    /// need to treat "nothing there" specially do so themselves.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Fetch the full contents of one object.
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Write one object, replacing any existing value.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()>;

    /// Bulk-delete objects, reporting a per-key outcome.
    ///
    /// Deleting a missing key is [`DeleteStatus::Missing`], never an `Err`;
    /// the whole call fails only when the backend itself is unreachable.
    async fn delete(&self, keys: &[String]) -> StoreResult<Vec<DeleteOutcome>>;
}

/// Outbound message channel for terminal run notifications.
///
/// Delivery is at-least-once; consumers must be idempotent on the artifact
/// reference carried in the payload.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Publish one payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8]) -> StoreResult<()>;
}

/// Per-key result of a bulk delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub key: String,
    pub status: DeleteStatus,
}

/// What happened to one key during a bulk delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The object existed and is gone now.
    Deleted,
    /// The object was already gone.
    Missing,
    /// The backend refused this key; the reason is backend-specific.
    Failed(String),
}

impl DeleteOutcome {
    pub fn deleted(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: DeleteStatus::Deleted,
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: DeleteStatus::Missing,
        }
    }

    pub fn failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: DeleteStatus::Failed(reason.into()),
        }
    }
}
