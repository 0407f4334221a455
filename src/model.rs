//! Shared record shapes for the daily air-quality pipeline.
//!
//! Three shapes flow through a run: [`RawReading`] (one sensor observation,
//! long format), [`NormalizedRow`] (one location-instant, wide format with a
//! column per pollutant), and [`SummaryRow`] (one location-day with
//! min/max/mean per pollutant). Raw source objects and intermediate
//! artifacts are NDJSON, usually gzip-compressed; the byte-level helpers for
//! that live here too.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// One sensor observation as read from source storage.
///
/// Parameter codes form a small open set (pm25, pm10, no2, o3, so2, co, bc
/// are the ones observed in practice); unknown codes pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub country: String,
    pub city: String,
    pub location: String,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    pub timestamp_utc: DateTime<Utc>,
}

/// Wire shape of one source feed record. Only the fields the pipeline needs
/// are typed; everything else in the record (coordinates, attribution,
/// averaging periods) is ignored at parse time so schema drift upstream
/// cannot leak into the pivot.
#[derive(Debug, Deserialize)]
struct SourceRecord {
    country: Option<String>,
    city: Option<String>,
    location: Option<String>,
    parameter: Option<String>,
    value: Option<f64>,
    unit: Option<String>,
    date: Option<SourceTimestamp>,
}

/// The feed nests its timestamps under `date`; only the UTC instant matters.
#[derive(Debug, Deserialize)]
struct SourceTimestamp {
    utc: DateTime<Utc>,
}

impl RawReading {
    /// Parse one NDJSON line into a reading.
    ///
    /// Returns `None` for malformed JSON and for records missing any
    /// mandatory field; callers count those as skipped rather than failing
    /// the surrounding chunk.
    pub fn from_ndjson_line(line: &str) -> Option<Self> {
        let record: SourceRecord = serde_json::from_str(line).ok()?;
        Some(Self {
            country: record.country?,
            city: record.city?,
            location: record.location?,
            parameter: record.parameter?,
            value: record.value?,
            unit: record.unit?,
            timestamp_utc: record.date?.utc,
        })
    }
}

/// Grouping key for the pivot: one row per location per instant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub country: String,
    pub city: String,
    pub location: String,
    pub timestamp_utc: DateTime<Utc>,
}

/// One location-instant in wide form: a value per pollutant observed there.
///
/// A pollutant absent from `values` was not observed at this instant; it is
/// missing, not zero, and aggregation excludes it from statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub country: String,
    pub city: String,
    pub location: String,
    pub timestamp_utc: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

/// Statistics for one pollutant over one location-day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollutantStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Full key of a summary row; unique within one final artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SummaryKey {
    pub date: NaiveDate,
    pub country: String,
    pub city: String,
    pub location: String,
}

/// One location-day in the final artifact: min/max/mean per pollutant
/// observed in that bucket. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub date: NaiveDate,
    pub country: String,
    pub city: String,
    pub location: String,
    pub stats: BTreeMap<String, PollutantStats>,
}

/// Opaque, relocatable reference to a persisted artifact.
///
/// Always a storage key, never a local filesystem path; it is the only state
/// the orchestrator threads between the map fan-out and the later stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ArtifactRef {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// One persisted map output plus how many rows it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateArtifact {
    pub artifact_ref: ArtifactRef,
    pub row_count: usize,
}

/// True when the buffer starts with the gzip magic bytes.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Gzip-compress a buffer.
pub fn gzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a gzip buffer, tolerating multi-member streams.
pub fn gunzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
