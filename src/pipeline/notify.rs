//! Notify stage: publish the terminal run-outcome message.
//!
//! Delivery is at-least-once; consumers key on the artifact reference.

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::NotifyError;
use crate::pipeline::state::RunOutcome;
use crate::store::{with_retry, MessageSink};

/// Publishes one message per finished run.
pub struct Notifier {
    sink: Arc<dyn MessageSink>,
    config: PipelineConfig,
}

impl Notifier {
    pub fn new(sink: Arc<dyn MessageSink>, config: PipelineConfig) -> Self {
        Self { sink, config }
    }

    /// Publish `outcome` to the configured topic as JSON.
    pub async fn notify(&self, outcome: &RunOutcome) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(outcome).map_err(|e| NotifyError::Encode {
            detail: e.to_string(),
        })?;

        with_retry(&self.config.retry, "publish run outcome", || {
            self.sink.publish(&self.config.topic, &payload)
        })
        .await
        .map_err(|source| NotifyError::Publish {
            topic: self.config.topic.clone(),
            source,
        })?;

        info!(topic = %self.config.topic, artifact = %outcome.final_artifact_ref, "published run outcome");
        Ok(())
    }
}
