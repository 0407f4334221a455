//! Aggregate stage: fold every intermediate artifact into one daily
//! summary and persist it as the final artifact.
//!
//! The fold is commutative and associative over rows, and values are
//! sorted before statistics are taken, so the output bytes do not depend
//! on which chunk produced which row or in what order artifacts arrive.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::AggregateError;
use crate::model::{
    gunzip_bytes, gzip_bytes, ArtifactRef, IntermediateArtifact, NormalizedRow, PollutantStats,
    SummaryKey, SummaryRow,
};
use crate::store::{with_retry, BlobStore};

/// Result of the reduce step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceOutcome {
    pub artifact_ref: ArtifactRef,
    pub row_count: usize,
}

/// Folds intermediate artifacts into the final daily summary.
pub struct Aggregator {
    store: Arc<dyn BlobStore>,
    config: PipelineConfig,
}

impl Aggregator {
    pub fn new(store: Arc<dyn BlobStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Fetch every intermediate, summarize, and persist the final artifact
    /// at `{output_prefix}/{target_date}.csv.gz`.
    pub async fn reduce(
        &self,
        target_date: NaiveDate,
        intermediates: &[IntermediateArtifact],
    ) -> Result<ReduceOutcome, AggregateError> {
        let mut rows = Vec::new();
        for artifact in intermediates {
            rows.extend(self.fetch_rows(artifact.artifact_ref.as_str()).await?);
        }

        let summary = summarize(rows, target_date);
        if summary.is_empty() {
            return Err(AggregateError::Empty { target_date });
        }

        let csv = encode_summary_csv(&summary)
            .map_err(|detail| AggregateError::Encode { detail })?;
        let bytes =
            gzip_bytes(&csv).map_err(|e| AggregateError::Encode { detail: e.to_string() })?;

        let key = format!("{}/{}.csv.gz", self.config.output_prefix, target_date);
        with_retry(&self.config.retry, "persist summary artifact", || {
            self.store.put(&key, bytes.clone())
        })
        .await
        .map_err(|source| AggregateError::Persist {
            key: key.clone(),
            source,
        })?;

        info!(artifact = %key, rows = summary.len(), "persisted daily summary");
        Ok(ReduceOutcome {
            artifact_ref: ArtifactRef::from(key),
            row_count: summary.len(),
        })
    }

    /// Fetch and decode one intermediate artifact.
    ///
    /// Intermediates are pipeline-owned, so unlike source feeds they decode
    /// strictly: any undecodable byte or line fails the stage.
    async fn fetch_rows(&self, key: &str) -> Result<Vec<NormalizedRow>, AggregateError> {
        let bytes = with_retry(&self.config.retry, "fetch intermediate artifact", || {
            self.store.get(key)
        })
        .await
        .map_err(|source| AggregateError::Fetch {
            key: key.to_string(),
            source,
        })?;

        let decoded = gunzip_bytes(&bytes).map_err(|e| AggregateError::Decode {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        let text = String::from_utf8(decoded).map_err(|e| AggregateError::Decode {
            key: key.to_string(),
            detail: e.to_string(),
        })?;

        let mut rows = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let row = serde_json::from_str(line).map_err(|e| AggregateError::Decode {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Bucket rows by location-day and compute per-pollutant statistics.
///
/// Rows whose UTC calendar day is not `target_date` are stale strays from
/// the feed and are dropped before bucketing. One output row per bucket,
/// in key order.
pub fn summarize(rows: Vec<NormalizedRow>, target_date: NaiveDate) -> Vec<SummaryRow> {
    let mut buckets: BTreeMap<SummaryKey, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    let mut stale = 0usize;

    for row in rows {
        let day = row.timestamp_utc.date_naive();
        if day != target_date {
            stale += 1;
            continue;
        }
        let key = SummaryKey {
            date: day,
            country: row.country,
            city: row.city,
            location: row.location,
        };
        let bucket = buckets.entry(key).or_default();
        for (code, value) in row.values {
            bucket.entry(code).or_default().push(value);
        }
    }
    if stale > 0 {
        warn!(stale, %target_date, "dropped rows outside the target date");
    }

    buckets
        .into_iter()
        .map(|(key, by_code)| SummaryRow {
            date: key.date,
            country: key.country,
            city: key.city,
            location: key.location,
            stats: by_code
                .into_iter()
                .filter_map(|(code, values)| fold_stats(&values).map(|stats| (code, stats)))
                .collect(),
        })
        .collect()
}

/// Min, max, and arithmetic mean of a non-empty sample.
///
/// Values are sorted first so the fold is independent of arrival order.
fn fold_stats(values: &[f64]) -> Option<PollutantStats> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    Some(PollutantStats { min, max, mean })
}

/// Render summary rows as CSV with the stable public schema.
///
/// Columns are `date,country,city,location` followed by
/// `{code}_min,{code}_max,{code}_mean` for every pollutant code present
/// anywhere in the run, in lexicographic code order. A pollutant missing
/// from a row leaves its three cells empty.
pub fn encode_summary_csv(rows: &[SummaryRow]) -> Result<Vec<u8>, String> {
    let codes: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.stats.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![
        "date".to_string(),
        "country".to_string(),
        "city".to_string(),
        "location".to_string(),
    ];
    for code in &codes {
        header.push(format!("{code}_min"));
        header.push(format!("{code}_max"));
        header.push(format!("{code}_mean"));
    }
    writer.write_record(&header).map_err(|e| e.to_string())?;

    for row in rows {
        let mut record = vec![
            row.date.to_string(),
            row.country.clone(),
            row.city.clone(),
            row.location.clone(),
        ];
        for code in &codes {
            match row.stats.get(*code) {
                Some(stats) => {
                    record.push(stats.min.to_string());
                    record.push(stats.max.to_string());
                    record.push(stats.mean.to_string());
                }
                None => {
                    record.push(String::new());
                    record.push(String::new());
                    record.push(String::new());
                }
            }
        }
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }

    writer
        .into_inner()
        .map_err(|e| e.to_string())
}
