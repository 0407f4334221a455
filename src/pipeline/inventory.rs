//! Inventory stage: enumerate a day's source objects and partition them
//! into transform work items.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{ConfigError, ListingError};
use crate::store::{with_retry, BlobStore};

/// One unit of map work: a contiguous slice of the day's source keys.
///
/// Indices are assigned in listing order and drive both intermediate
/// artifact naming and outcome ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub keys: Vec<String>,
}

/// Lists source objects for a target date.
pub struct Inventory {
    store: Arc<dyn BlobStore>,
    config: PipelineConfig,
}

impl fmt::Debug for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inventory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Inventory {
    /// Build the stage. Rejects a configuration no run could use, so a
    /// zero `chunk_size` never reaches [`Inventory::list`].
    pub fn new(
        store: Arc<dyn BlobStore>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Enumerate the day's source objects and split them into chunks of at
    /// most `chunk_size` keys.
    ///
    /// An empty listing is [`ListingError::NoSourceObjects`], not a silent
    /// no-op run.
    pub async fn list(&self, target_date: NaiveDate) -> Result<Vec<Chunk>, ListingError> {
        let prefix = format!("{}/{}/", self.config.source_prefix, target_date);

        let keys = with_retry(&self.config.retry, "list source objects", || {
            self.store.list(&prefix)
        })
        .await
        .map_err(|source| ListingError::Store {
            prefix: prefix.clone(),
            source,
        })?;

        if keys.is_empty() {
            return Err(ListingError::NoSourceObjects { prefix });
        }

        let chunks = partition_into_chunks(keys, self.config.chunk_size);
        info!(
            %prefix,
            objects = chunks.iter().map(|c| c.keys.len()).sum::<usize>(),
            chunks = chunks.len(),
            "listed source objects"
        );
        Ok(chunks)
    }
}

/// Split `keys` into consecutive chunks of at most `chunk_size`, preserving
/// order. Every key lands in exactly one chunk; only the last chunk may be
/// short.
fn partition_into_chunks(keys: Vec<String>, chunk_size: usize) -> Vec<Chunk> {
    debug_assert!(chunk_size > 0, "chunk_size is validated at construction");
    keys.chunks(chunk_size)
        .enumerate()
        .map(|(index, slice)| Chunk {
            index,
            keys: slice.to_vec(),
        })
        .collect()
}
