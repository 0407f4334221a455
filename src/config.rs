//! Pipeline configuration.
//!
//! Every stage receives an explicit [`PipelineConfig`] at construction; no
//! stage reads ambient globals or environment state. Values load from an
//! optional TOML file with serde defaults, and the CLI may override
//! individual fields before validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Local filesystem under `store.base_dir` (default).
    File,
    /// In-memory store, for tests and dry local runs.
    Memory,
    /// AWS S3; requires the `s3` cargo feature and `store.bucket`.
    S3,
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::File
    }
}

/// Adapter selection and backend-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which blob-store adapter to run against.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Base directory for the file backend and the file message sink.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Bucket name, required for the s3 backend.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Custom endpoint URL for S3-compatible object stores.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            base_dir: default_base_dir(),
            bucket: None,
            endpoint: None,
        }
    }
}

/// Retry policy for every store and sink I/O operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry attempts after the first try.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomize each delay to spread concurrent retries.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

/// Full configuration for one pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Blob-store adapter selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Prefix the raw daily feed objects live under; the target date is
    /// appended as `{source_prefix}/{date}/`.
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,

    /// Prefix for run-scoped intermediate artifacts.
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,

    /// Prefix for final daily summary artifacts.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// Topic the terminal run-outcome message publishes to.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Source objects per transform chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Concurrent transform tasks during the map fan-out.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Concurrent source-object fetches within one chunk.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Retry policy shared by all store and sink operations.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            source_prefix: default_source_prefix(),
            temp_prefix: default_temp_prefix(),
            output_prefix: default_output_prefix(),
            topic: default_topic(),
            chunk_size: default_chunk_size(),
            max_parallel: default_max_parallel(),
            fetch_concurrency: default_fetch_concurrency(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `path`, or from `plume.toml` in the working
    /// directory when no path is given and that file exists. Absent both,
    /// the defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from("plume.toml");
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Reject values no stage can run with.
    ///
    /// Invalid input is an error, never silently coerced.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "chunk_size",
            });
        }
        if self.max_parallel == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_parallel",
            });
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::NotPositive {
                field: "fetch_concurrency",
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::BadMultiplier {
                value: self.retry.multiplier,
            });
        }
        if self.store.backend == StoreBackend::S3 && self.store.bucket.is_none() {
            return Err(ConfigError::MissingField {
                field: "store.bucket",
            });
        }
        Ok(())
    }
}

// Default value functions for serde

fn default_base_dir() -> PathBuf {
    PathBuf::from("./plume-data")
}

fn default_source_prefix() -> String {
    "realtime-gzipped".to_string()
}

fn default_temp_prefix() -> String {
    "plume/temp".to_string()
}

fn default_output_prefix() -> String {
    "plume/output".to_string()
}

fn default_topic() -> String {
    "plume-runs".to_string()
}

fn default_chunk_size() -> usize {
    12
}

fn default_max_parallel() -> usize {
    8
}

fn default_fetch_concurrency() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}
