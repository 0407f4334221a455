//! The five-stage daily pipeline.
//!
//! A run flows `Listing -> Mapping -> Reducing -> CleaningUp -> Notifying ->
//! Done`, with any stage able to divert to `Failed`. The
//! [`Orchestrator`] drives the stages; each stage is its own type, talks to
//! storage only through the [`crate::store::BlobStore`] and
//! [`crate::store::MessageSink`] traits, and exchanges artifact references
//! rather than file paths.

pub mod aggregate;
pub mod cleanup;
pub mod inventory;
pub mod notify;
pub mod orchestrator;
pub mod state;
pub mod transform;

pub use aggregate::{Aggregator, ReduceOutcome};
pub use cleanup::{Cleanup, CleanupReport, FailedDelete};
pub use inventory::{Chunk, Inventory};
pub use notify::Notifier;
pub use orchestrator::Orchestrator;
pub use state::{RunFailure, RunManifest, RunOutcome, RunReport, RunState};
pub use transform::{MapOutcome, Transformer};
