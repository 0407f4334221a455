//! Error types for the pipeline.
//!
//! Each stage owns its error enum so a failed run can name the stage and
//! the cause without string matching. [`StageError`] is the umbrella the
//! orchestrator stores in the run report.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Pipeline stage names, used in state transitions and failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Listing,
    Mapping,
    Reducing,
    CleaningUp,
    Notifying,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Listing => "listing",
            Stage::Mapping => "mapping",
            Stage::Reducing => "reducing",
            Stage::CleaningUp => "cleaning_up",
            Stage::Notifying => "notifying",
        };
        write!(f, "{name}")
    }
}

/// Errors from the inventory stage.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("failed to list source objects under '{prefix}'")]
    Store {
        prefix: String,
        #[source]
        source: StoreError,
    },

    /// The listing itself succeeded but matched nothing. Distinct from a
    /// transport failure: the feed for that day simply is not there.
    #[error("no source objects found under '{prefix}'")]
    NoSourceObjects { prefix: String },
}

/// Errors from one transform task.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to fetch source object '{key}'")]
    Fetch {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to decompress source object '{key}'")]
    Decompress {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Every line in the chunk was malformed. A partially bad chunk is
    /// tolerated; a fully bad one means the feed itself is broken.
    #[error("chunk {index} produced no readings ({skipped} lines skipped)")]
    AllLinesMalformed { index: usize, skipped: usize },

    #[error("failed to encode intermediate artifact for '{key}': {detail}")]
    Encode { key: String, detail: String },

    #[error("failed to persist intermediate artifact '{key}'")]
    Persist {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("transform task failed: {detail}")]
    Task { detail: String },
}

/// Errors from the aggregate stage.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed to fetch intermediate artifact '{key}'")]
    Fetch {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Intermediates are pipeline-owned, so a bad one is a bug or
    /// corruption, never tolerable input.
    #[error("failed to decode intermediate artifact '{key}': {detail}")]
    Decode { key: String, detail: String },

    #[error("no rows remained for {target_date} after filtering")]
    Empty { target_date: NaiveDate },

    #[error("failed to encode summary artifact: {detail}")]
    Encode { detail: String },

    #[error("failed to persist summary artifact '{key}'")]
    Persist {
        key: String,
        #[source]
        source: StoreError,
    },
}

/// Errors from the cleanup stage.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to delete {count} intermediate artifact(s)")]
    Unavailable {
        count: usize,
        #[source]
        source: StoreError,
    },
}

/// Errors from the notify stage.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode run outcome: {detail}")]
    Encode { detail: String },

    #[error("failed to publish run outcome to '{topic}'")]
    Publish {
        topic: String,
        #[source]
        source: StoreError,
    },
}

/// Configuration errors, raised before any stage runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}'", path = .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'", path = .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{field} must be at least 1")]
    NotPositive { field: &'static str },

    #[error("retry.multiplier must be at least 1.0, got {value}")]
    BadMultiplier { value: f64 },

    #[error("{field} is required for the selected backend")]
    MissingField { field: &'static str },
}

/// Umbrella over the five stage errors; carries which stage failed.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl StageError {
    /// The stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Listing(_) => Stage::Listing,
            StageError::Transform(_) => Stage::Mapping,
            StageError::Aggregate(_) => Stage::Reducing,
            StageError::Cleanup(_) => Stage::CleaningUp,
            StageError::Notify(_) => Stage::Notifying,
        }
    }
}

/// Render an error and its source chain as a single line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
