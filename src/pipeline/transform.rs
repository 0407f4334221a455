//! Transform stage: fetch one chunk of source objects, pivot long-format
//! readings into wide rows, and persist the result as an intermediate
//! artifact.
//!
//! Each invocation is independent of its siblings and touches only keys
//! derived from its own chunk, so the orchestrator can run any number of
//! them concurrently.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{ConfigError, TransformError};
use crate::model::{
    gunzip_bytes, gzip_bytes, is_gzip, ArtifactRef, IntermediateArtifact, NormalizedRow,
    RawReading, RowKey,
};
use crate::pipeline::inventory::Chunk;
use crate::store::{with_retry, BlobStore};

/// Result of one transform task.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOutcome {
    pub artifact: IntermediateArtifact,
    pub skipped_lines: usize,
}

/// Pivots one chunk of source objects into an intermediate artifact.
pub struct Transformer {
    store: Arc<dyn BlobStore>,
    config: PipelineConfig,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    /// Build the stage over a validated configuration; `fetch_concurrency`
    /// is known positive by the time the fetch stream uses it.
    pub fn new(
        store: Arc<dyn BlobStore>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Run the map step for one chunk.
    ///
    /// Source objects are fetched with bounded concurrency in chunk order,
    /// so later objects overwrite earlier ones on key collisions no matter
    /// how the fetches interleave. Malformed lines are skipped and counted;
    /// the chunk fails only when nothing at all parsed.
    pub async fn transform(
        &self,
        run_id: Uuid,
        chunk: &Chunk,
    ) -> Result<MapOutcome, TransformError> {
        let fetched: Vec<(Vec<RawReading>, usize)> = stream::iter(chunk.keys.clone())
            .map(|key| self.fetch_readings(key))
            .buffered(self.config.fetch_concurrency)
            .try_collect()
            .await?;

        let mut readings = Vec::new();
        let mut skipped_lines = 0;
        for (parsed, skipped) in fetched {
            readings.extend(parsed);
            skipped_lines += skipped;
        }

        if readings.is_empty() && skipped_lines > 0 {
            return Err(TransformError::AllLinesMalformed {
                index: chunk.index,
                skipped: skipped_lines,
            });
        }

        let rows = pivot_readings(readings);
        let row_count = rows.len();

        let key = format!(
            "{}/{}/part-{:05}.ndjson.gz",
            self.config.temp_prefix, run_id, chunk.index
        );
        let bytes = encode_rows(&rows).map_err(|detail| TransformError::Encode {
            key: key.clone(),
            detail,
        })?;

        with_retry(&self.config.retry, "persist intermediate artifact", || {
            self.store.put(&key, bytes.clone())
        })
        .await
        .map_err(|source| TransformError::Persist {
            key: key.clone(),
            source,
        })?;

        debug!(
            chunk = chunk.index,
            rows = row_count,
            skipped = skipped_lines,
            artifact = %key,
            "transformed chunk"
        );

        Ok(MapOutcome {
            artifact: IntermediateArtifact {
                artifact_ref: ArtifactRef::from(key),
                row_count,
            },
            skipped_lines,
        })
    }

    /// Fetch one source object and parse its NDJSON lines.
    ///
    /// Source feeds are third-party data, so decoding is tolerant: bad
    /// lines are counted and dropped, and non-UTF-8 bytes are replaced
    /// rather than rejected. Returns the parsed readings and the number of
    /// lines skipped.
    async fn fetch_readings(&self, key: String) -> Result<(Vec<RawReading>, usize), TransformError> {
        let bytes = with_retry(&self.config.retry, "fetch source object", || {
            self.store.get(&key)
        })
        .await
        .map_err(|source| TransformError::Fetch {
            key: key.clone(),
            source,
        })?;

        let decoded = if is_gzip(&bytes) {
            gunzip_bytes(&bytes).map_err(|source| TransformError::Decompress {
                key: key.clone(),
                source,
            })?
        } else {
            bytes
        };
        let text = String::from_utf8_lossy(&decoded);

        let mut readings = Vec::new();
        let mut skipped = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match RawReading::from_ndjson_line(line) {
                Some(reading) => readings.push(reading),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(%key, skipped, kept = readings.len(), "skipped malformed lines");
        }
        Ok((readings, skipped))
    }
}

/// Pivot long-format readings into one wide row per location-instant.
///
/// Readings are folded in input order and an insert wins over any earlier
/// value for the same (key, parameter), so duplicates resolve to the last
/// reading seen. Output order follows the row key, making the artifact
/// bytes a pure function of the input sequence.
pub fn pivot_readings(readings: Vec<RawReading>) -> Vec<NormalizedRow> {
    let mut grouped: BTreeMap<RowKey, BTreeMap<String, f64>> = BTreeMap::new();
    for reading in readings {
        let key = RowKey {
            country: reading.country,
            city: reading.city,
            location: reading.location,
            timestamp_utc: reading.timestamp_utc,
        };
        grouped
            .entry(key)
            .or_default()
            .insert(reading.parameter, reading.value);
    }
    grouped
        .into_iter()
        .map(|(key, values)| NormalizedRow {
            country: key.country,
            city: key.city,
            location: key.location,
            timestamp_utc: key.timestamp_utc,
            values,
        })
        .collect()
}

/// Encode rows as gzipped NDJSON.
fn encode_rows(rows: &[NormalizedRow]) -> Result<Vec<u8>, String> {
    let mut ndjson = Vec::new();
    for row in rows {
        let line = serde_json::to_vec(row).map_err(|e| e.to_string())?;
        ndjson.extend_from_slice(&line);
        ndjson.push(b'\n');
    }
    gzip_bytes(&ndjson).map_err(|e| e.to_string())
}
