//! Run state machine and run-level records.
//!
//! A run advances through a fixed linear chain and ends in exactly one of
//! two terminal states. Every transition goes through
//! [`RunManifest::transition`], which enforces the legal edges.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Stage;
use crate::model::{ArtifactRef, IntermediateArtifact};
use crate::pipeline::cleanup::CleanupReport;
use crate::pipeline::inventory::Chunk;

/// Run state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Enumerating source objects for the target date.
    Listing,
    /// Transform tasks running over the chunks.
    Mapping,
    /// Folding intermediates into the daily summary.
    Reducing,
    /// Deleting intermediate artifacts.
    CleaningUp,
    /// Publishing the run outcome.
    Notifying,
    /// Run finished; final artifact persisted and outcome published.
    Done,
    /// Run stopped at `stage`; no later stage executed.
    Failed { stage: Stage },
}

impl RunState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// The happy path is strictly linear; `Failed` is reachable from any
    /// non-terminal state; terminal states have no outgoing edges.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(target, Self::Failed { .. }) {
            return true;
        }
        match self {
            Self::Listing => matches!(target, Self::Mapping),
            Self::Mapping => matches!(target, Self::Reducing),
            Self::Reducing => matches!(target, Self::CleaningUp),
            Self::CleaningUp => matches!(target, Self::Notifying),
            Self::Notifying => matches!(target, Self::Done),
            Self::Done | Self::Failed { .. } => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listing => write!(f, "listing"),
            Self::Mapping => write!(f, "mapping"),
            Self::Reducing => write!(f, "reducing"),
            Self::CleaningUp => write!(f, "cleaning_up"),
            Self::Notifying => write!(f, "notifying"),
            Self::Done => write!(f, "done"),
            Self::Failed { stage } => write!(f, "failed({stage})"),
        }
    }
}

/// Mutable record of one run, owned by the orchestrator while it drives
/// the stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub target_date: NaiveDate,
    pub status: RunState,
    pub chunks: Vec<Chunk>,
    pub intermediates: Vec<IntermediateArtifact>,
    pub final_artifact: Option<ArtifactRef>,
}

impl RunManifest {
    pub fn new(target_date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target_date,
            status: RunState::Listing,
            chunks: Vec::new(),
            intermediates: Vec::new(),
            final_artifact: None,
        }
    }

    /// Advance the state machine. Illegal edges are orchestrator bugs.
    pub fn transition(&mut self, target: RunState) {
        debug_assert!(
            self.status.can_transition_to(target),
            "illegal run transition {} -> {}",
            self.status,
            target
        );
        tracing::debug!(run_id = %self.run_id, from = %self.status, to = %target, "run transition");
        self.status = target;
    }
}

/// Which stage a run failed at, why, and what it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub cause: String,
    /// Intermediate artifacts still in storage, ready for a later sweep
    /// without re-listing the temp prefix.
    pub leftover_artifacts: Vec<ArtifactRef>,
}

/// Everything a caller learns about a finished run.
///
/// Produced for failed runs too: a failure report still carries whatever
/// the run got done before it stopped, including the final artifact when
/// only notification failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target_date: NaiveDate,
    pub status: RunState,
    pub source_objects: usize,
    pub chunks: usize,
    pub intermediate_rows: usize,
    pub skipped_lines: usize,
    pub summary_rows: usize,
    pub final_artifact: Option<ArtifactRef>,
    pub cleanup: Option<CleanupReport>,
    pub failure: Option<RunFailure>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunState::Done)
    }
}

/// Payload of the terminal notification message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub target_date: NaiveDate,
    pub status: String,
    pub final_artifact_ref: ArtifactRef,
    pub summary_rows: usize,
    pub human_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[test]
    fn happy_path_is_strictly_linear() {
        let chain = [
            RunState::Listing,
            RunState::Mapping,
            RunState::Reducing,
            RunState::CleaningUp,
            RunState::Notifying,
            RunState::Done,
        ];
        for pair in chain.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} must be legal",
                pair[0],
                pair[1]
            );
        }
        // No skipping ahead.
        assert!(!RunState::Listing.can_transition_to(RunState::Reducing));
        assert!(!RunState::Mapping.can_transition_to(RunState::Done));
        // No going back.
        assert!(!RunState::Reducing.can_transition_to(RunState::Mapping));
    }

    #[test]
    fn failed_is_reachable_from_every_non_terminal_state() {
        let failed = RunState::Failed {
            stage: Stage::Mapping,
        };
        for state in [
            RunState::Listing,
            RunState::Mapping,
            RunState::Reducing,
            RunState::CleaningUp,
            RunState::Notifying,
        ] {
            assert!(state.can_transition_to(failed));
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        let failed = RunState::Failed {
            stage: Stage::Reducing,
        };
        assert!(failed.is_terminal());
        assert!(RunState::Done.is_terminal());
        for target in [RunState::Listing, RunState::Done, failed] {
            assert!(!RunState::Done.can_transition_to(target));
            assert!(!failed.can_transition_to(target));
        }
    }

    #[test]
    fn manifest_starts_listing_and_advances() {
        let mut manifest = RunManifest::new(date());
        assert_eq!(manifest.status, RunState::Listing);
        manifest.transition(RunState::Mapping);
        manifest.transition(RunState::Reducing);
        assert_eq!(manifest.status, RunState::Reducing);
    }

    #[test]
    fn failed_state_serializes_the_stage() {
        let state = RunState::Failed {
            stage: Stage::Notifying,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"failed":{"stage":"notifying"}}"#);
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
