//! Orchestrator: drives one run through the five stages.
//!
//! The run is a strict barrier pipeline. Mapping fans out one task per
//! chunk under a concurrency limit and every task is awaited before the
//! run moves on, succeed or fail; a failed task fails the whole run and
//! leaves sibling artifacts in place for inspection. Dropping the future
//! returned by [`Orchestrator::run`] aborts outstanding transform tasks
//! without deleting artifacts they already wrote.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{error_chain, ConfigError, Stage, StageError, TransformError};
use crate::model::ArtifactRef;
use crate::pipeline::aggregate::Aggregator;
use crate::pipeline::cleanup::{Cleanup, CleanupReport};
use crate::pipeline::inventory::Inventory;
use crate::pipeline::notify::Notifier;
use crate::pipeline::state::{RunFailure, RunManifest, RunOutcome, RunReport, RunState};
use crate::pipeline::transform::{MapOutcome, Transformer};
use crate::store::{BlobStore, MessageSink};

/// Counters that live outside the manifest.
#[derive(Default)]
struct RunTotals {
    skipped_lines: usize,
    summary_rows: usize,
    cleanup: Option<CleanupReport>,
}

/// Drives one run per call to [`Orchestrator::run`].
pub struct Orchestrator {
    config: PipelineConfig,
    inventory: Inventory,
    transformer: Arc<Transformer>,
    aggregator: Aggregator,
    cleanup: Cleanup,
    notifier: Notifier,
}

impl Orchestrator {
    /// Build the stage set over the given adapters. Fails when the
    /// configuration cannot drive a run at all.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn BlobStore>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inventory: Inventory::new(store.clone(), config.clone())?,
            transformer: Arc::new(Transformer::new(store.clone(), config.clone())?),
            aggregator: Aggregator::new(store.clone(), config.clone()),
            cleanup: Cleanup::new(store, config.clone()),
            notifier: Notifier::new(sink, config.clone()),
            config,
        })
    }

    /// Process one target date end to end.
    ///
    /// Always returns a report: a failed run names the failing stage, the
    /// cause, and the intermediate artifacts left behind, and still carries
    /// the final artifact reference when only notification failed.
    pub async fn run(&self, target_date: NaiveDate) -> RunReport {
        let started = Instant::now();
        let mut manifest = RunManifest::new(target_date);
        let mut totals = RunTotals::default();
        info!(run_id = %manifest.run_id, %target_date, "starting run");

        match self.inventory.list(target_date).await {
            Ok(chunks) => manifest.chunks = chunks,
            Err(err) => return self.fail(&mut manifest, err.into(), totals, started),
        }
        manifest.transition(RunState::Mapping);

        let (outcomes, map_error) = self.map_all(&manifest).await;
        for outcome in outcomes {
            totals.skipped_lines += outcome.skipped_lines;
            manifest.intermediates.push(outcome.artifact);
        }
        if let Some(err) = map_error {
            return self.fail(&mut manifest, err.into(), totals, started);
        }
        manifest.transition(RunState::Reducing);

        let reduced = match self
            .aggregator
            .reduce(target_date, &manifest.intermediates)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => return self.fail(&mut manifest, err.into(), totals, started),
        };
        manifest.final_artifact = Some(reduced.artifact_ref.clone());
        totals.summary_rows = reduced.row_count;
        manifest.transition(RunState::CleaningUp);

        let intermediate_refs: Vec<ArtifactRef> = manifest
            .intermediates
            .iter()
            .map(|artifact| artifact.artifact_ref.clone())
            .collect();
        match self.cleanup.cleanup(&intermediate_refs).await {
            Ok(report) => totals.cleanup = Some(report),
            Err(err) => return self.fail(&mut manifest, err.into(), totals, started),
        }
        manifest.transition(RunState::Notifying);

        let outcome = RunOutcome {
            target_date,
            status: "done".to_string(),
            final_artifact_ref: reduced.artifact_ref.clone(),
            summary_rows: reduced.row_count,
            human_message: format!(
                "Processing complete, you can download the result from {}",
                reduced.artifact_ref
            ),
        };
        if let Err(err) = self.notifier.notify(&outcome).await {
            return self.fail(&mut manifest, err.into(), totals, started);
        }
        manifest.transition(RunState::Done);

        info!(
            run_id = %manifest.run_id,
            rows = totals.summary_rows,
            elapsed = ?started.elapsed(),
            "run complete"
        );
        self.report(&manifest, totals, None, started)
    }

    /// Fan the transform out over the chunks and wait for every task.
    ///
    /// All tasks are drained even after a failure so none is left running
    /// into the next stage; the first failure is what the run reports.
    /// Outcomes of successful siblings are returned either way, so their
    /// already-persisted artifacts stay accounted for.
    async fn map_all(
        &self,
        manifest: &RunManifest,
    ) -> (Vec<MapOutcome>, Option<TransformError>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut tasks: JoinSet<(usize, Result<MapOutcome, TransformError>)> = JoinSet::new();

        for chunk in manifest.chunks.iter().cloned() {
            let semaphore = semaphore.clone();
            let transformer = self.transformer.clone();
            let run_id = manifest.run_id;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                (chunk.index, transformer.transform(run_id, &chunk).await)
            });
        }

        let mut outcomes: Vec<Option<MapOutcome>> = vec![None; manifest.chunks.len()];
        let mut first_error: Option<TransformError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => outcomes[index] = Some(outcome),
                Ok((index, Err(err))) => {
                    warn!(chunk = index, error = %error_chain(&err), "transform task failed");
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "transform task panicked");
                    first_error.get_or_insert(TransformError::Task {
                        detail: join_err.to_string(),
                    });
                }
            }
        }

        (outcomes.into_iter().flatten().collect(), first_error)
    }

    fn fail(
        &self,
        manifest: &mut RunManifest,
        err: StageError,
        totals: RunTotals,
        started: Instant,
    ) -> RunReport {
        let stage = err.stage();
        let cause = error_chain(&err);
        error!(run_id = %manifest.run_id, %stage, %cause, "run failed");
        manifest.transition(RunState::Failed { stage });
        // Name what a later sweep has to deal with. Before Notifying the
        // manifest's intermediates are all still in storage; at Notifying
        // cleanup has already run and only its per-key failures remain.
        let leftover_artifacts = match stage {
            Stage::Notifying => totals
                .cleanup
                .as_ref()
                .map(|report| {
                    report
                        .failed
                        .iter()
                        .map(|failed| ArtifactRef::from(failed.key.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            _ => manifest
                .intermediates
                .iter()
                .map(|artifact| artifact.artifact_ref.clone())
                .collect(),
        };
        self.report(
            manifest,
            totals,
            Some(RunFailure {
                stage,
                cause,
                leftover_artifacts,
            }),
            started,
        )
    }

    fn report(
        &self,
        manifest: &RunManifest,
        totals: RunTotals,
        failure: Option<RunFailure>,
        started: Instant,
    ) -> RunReport {
        RunReport {
            run_id: manifest.run_id,
            target_date: manifest.target_date,
            status: manifest.status,
            source_objects: manifest.chunks.iter().map(|c| c.keys.len()).sum(),
            chunks: manifest.chunks.len(),
            intermediate_rows: manifest
                .intermediates
                .iter()
                .map(|artifact| artifact.row_count)
                .sum(),
            skipped_lines: totals.skipped_lines,
            summary_rows: totals.summary_rows,
            final_artifact: manifest.final_artifact.clone(),
            cleanup: totals.cleanup,
            failure,
            elapsed: started.elapsed(),
        }
    }
}
