//! Cleanup stage: delete the run's intermediate artifacts.
//!
//! Cleanup reclaims storage; it is not a correctness requirement. Missing
//! keys count as success (a retried run may find them already gone) and
//! per-key failures are reported without stopping the run. Only total
//! backend unavailability fails the stage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::CleanupError;
use crate::model::ArtifactRef;
use crate::store::{with_retry, BlobStore, DeleteStatus};

/// One intermediate the backend refused to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelete {
    pub key: String,
    pub reason: String,
}

/// What cleanup did with each intermediate artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub missing: usize,
    pub failed: Vec<FailedDelete>,
}

impl CleanupReport {
    /// True when nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes intermediate artifacts in one bulk call.
pub struct Cleanup {
    store: Arc<dyn BlobStore>,
    config: PipelineConfig,
}

impl Cleanup {
    pub fn new(store: Arc<dyn BlobStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Delete every referenced intermediate. Safe to call again with the
    /// same references: already-deleted keys are reported as missing, not
    /// as failures.
    pub async fn cleanup(&self, refs: &[ArtifactRef]) -> Result<CleanupReport, CleanupError> {
        if refs.is_empty() {
            return Ok(CleanupReport::default());
        }

        let keys: Vec<String> = refs.iter().map(|r| r.as_str().to_string()).collect();
        let outcomes = with_retry(&self.config.retry, "delete intermediate artifacts", || {
            self.store.delete(&keys)
        })
        .await
        .map_err(|source| CleanupError::Unavailable {
            count: keys.len(),
            source,
        })?;

        let mut report = CleanupReport::default();
        for outcome in outcomes {
            match outcome.status {
                DeleteStatus::Deleted => report.deleted += 1,
                DeleteStatus::Missing => report.missing += 1,
                DeleteStatus::Failed(reason) => {
                    warn!(key = %outcome.key, %reason, "failed to delete intermediate");
                    report.failed.push(FailedDelete {
                        key: outcome.key,
                        reason,
                    });
                }
            }
        }

        info!(
            deleted = report.deleted,
            missing = report.missing,
            failed = report.failed.len(),
            "cleaned up intermediates"
        );
        Ok(report)
    }
}
