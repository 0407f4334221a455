//! End-to-end runs of the five-stage pipeline against in-memory adapters,
//! including injected storage and sink failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use plume::config::PipelineConfig;
use plume::error::Stage;
use plume::model::{gunzip_bytes, gzip_bytes};
use plume::pipeline::{Orchestrator, RunOutcome, RunState};
use plume::store::{
    BlobStore, DeleteOutcome, MemorySink, MemoryStore, MessageSink, StoreError, StoreResult,
};

/// Wraps a [`MemoryStore`] and fails selected operations, either with a
/// transport error or with per-key delete denials.
struct FlakyStore {
    inner: MemoryStore,
    fail_list: bool,
    fail_deletes: bool,
    deny_each_delete: bool,
    fail_one_get: AtomicBool,
}

impl FlakyStore {
    fn wrapping(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_list: false,
            fail_deletes: false,
            deny_each_delete: false,
            fail_one_get: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        if self.fail_list {
            return Err(StoreError::unavailable("injected list outage"));
        }
        self.inner.list(prefix).await
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        if self.fail_one_get.swap(false, Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected transient get failure"));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.inner.put(key, bytes).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<Vec<DeleteOutcome>> {
        if self.fail_deletes {
            return Err(StoreError::unavailable("injected delete outage"));
        }
        if self.deny_each_delete {
            return Ok(keys
                .iter()
                .map(|key| DeleteOutcome::failed(key.as_str(), "injected delete denial"))
                .collect());
        }
        self.inner.delete(keys).await
    }
}

/// A message sink whose broker is always down.
struct DeadSink;

#[async_trait]
impl MessageSink for DeadSink {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> StoreResult<()> {
        Err(StoreError::unavailable("injected sink outage"))
    }
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.chunk_size = 2;
    config.max_parallel = 4;
    config.retry.max_retries = 2;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(4);
    config.retry.jitter = false;
    config
}

fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

fn reading_line(location: &str, parameter: &str, value: f64, timestamp: &str) -> String {
    format!(
        concat!(
            r#"{{"country":"GB","city":"London","location":"{}","parameter":"{}","#,
            r#""value":{},"unit":"µg/m³","date":{{"utc":"{}"}}}}"#
        ),
        location, parameter, value, timestamp
    )
}

async fn seed(store: &MemoryStore, key: &str, lines: &[String]) {
    let body = gzip_bytes(lines.join("\n").as_bytes()).unwrap();
    store.put(key, body).await.unwrap();
}

/// Three source objects, one malformed line, one stale historical row.
async fn seed_happy_day(store: &MemoryStore) {
    seed(
        store,
        "realtime-gzipped/2024-01-02/0000.ndjson.gz",
        &[
            reading_line("loc-1", "pm25", 10.0, "2024-01-02T02:00:00Z"),
            reading_line("loc-1", "no2", 38.0, "2024-01-02T02:00:00Z"),
            "{truncated".to_string(),
        ],
    )
    .await;
    seed(
        store,
        "realtime-gzipped/2024-01-02/0008.ndjson.gz",
        &[
            reading_line("loc-1", "pm25", 30.0, "2024-01-02T08:00:00Z"),
            // stale row from an earlier year, must not reach the output
            reading_line("loc-1", "pm25", 99.0, "2019-06-01T08:00:00Z"),
        ],
    )
    .await;
    seed(
        store,
        "realtime-gzipped/2024-01-02/0016.ndjson.gz",
        &[reading_line("loc-2", "pm25", 8.0, "2024-01-02T16:00:00Z")],
    )
    .await;
}

#[tokio::test]
async fn full_run_produces_summary_cleans_up_and_notifies() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    seed_happy_day(&store).await;

    let orchestrator =
        Orchestrator::new(test_config(), store.clone(), sink.clone()).unwrap();
    let report = orchestrator.run(target_date()).await;

    assert_eq!(report.status, RunState::Done);
    assert!(report.is_success());
    assert_eq!(report.source_objects, 3);
    assert_eq!(report.chunks, 2);
    // 3 pivoted rows from the first chunk (two instants plus the stale
    // row), 1 from the second.
    assert_eq!(report.intermediate_rows, 4);
    assert_eq!(report.skipped_lines, 1);
    assert_eq!(report.summary_rows, 2);
    assert!(report.failure.is_none());

    // Final artifact: one gzipped CSV under the output prefix.
    let final_ref = report.final_artifact.expect("final artifact");
    assert_eq!(final_ref.as_str(), "plume/output/2024-01-02.csv.gz");
    let csv = String::from_utf8(
        gunzip_bytes(&store.get(final_ref.as_str()).await.unwrap()).unwrap(),
    )
    .unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "date,country,city,location,no2_min,no2_max,no2_mean,pm25_min,pm25_max,pm25_mean"
    );
    assert_eq!(lines.next().unwrap(), "2024-01-02,GB,London,loc-1,38,38,38,10,30,20");
    assert_eq!(lines.next().unwrap(), "2024-01-02,GB,London,loc-2,,,,8,8,8");
    assert_eq!(lines.next(), None);

    // Intermediates are gone, source objects remain.
    assert!(store.list("plume/temp/").await.unwrap().is_empty());
    assert_eq!(store.list("realtime-gzipped/").await.unwrap().len(), 3);
    let cleanup = report.cleanup.expect("cleanup report");
    assert_eq!(cleanup.deleted, 2);
    assert!(cleanup.is_clean());

    // Exactly one outcome message.
    let messages = sink.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "plume-runs");
    let outcome: RunOutcome = serde_json::from_slice(&messages[0].1).unwrap();
    assert_eq!(outcome.final_artifact_ref, final_ref);
    assert_eq!(outcome.status, "done");
    assert_eq!(outcome.summary_rows, 2);
    assert!(outcome.human_message.contains("plume/output/2024-01-02.csv.gz"));
}

#[tokio::test]
async fn transient_get_failure_is_retried_to_success() {
    let inner = MemoryStore::new();
    seed_happy_day(&inner).await;
    let mut flaky = FlakyStore::wrapping(inner);
    flaky.fail_one_get = AtomicBool::new(true);

    let store: Arc<dyn BlobStore> = Arc::new(flaky);
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::new(test_config(), store, sink.clone()).unwrap();

    let report = orchestrator.run(target_date()).await;
    assert_eq!(report.status, RunState::Done);
    assert_eq!(sink.messages().await.len(), 1);
}

#[tokio::test]
async fn failed_chunk_fails_the_run_and_leaves_sibling_artifacts() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    seed(
        store.as_ref(),
        "realtime-gzipped/2024-01-02/0000.ndjson.gz",
        &[reading_line("loc-1", "pm25", 10.0, "2024-01-02T02:00:00Z")],
    )
    .await;
    seed(
        store.as_ref(),
        "realtime-gzipped/2024-01-02/0008.ndjson.gz",
        &["junk line".to_string(), "more junk".to_string()],
    )
    .await;

    let mut config = test_config();
    config.chunk_size = 1;
    let orchestrator = Orchestrator::new(config, store.clone(), sink.clone()).unwrap();
    let report = orchestrator.run(target_date()).await;

    assert_eq!(
        report.status,
        RunState::Failed {
            stage: Stage::Mapping
        }
    );
    let failure = report.failure.expect("failure recorded");
    assert_eq!(failure.stage, Stage::Mapping);
    assert!(failure.cause.contains("no readings"));
    assert!(report.final_artifact.is_none());

    // The healthy sibling's artifact stays for inspection, the report
    // names it, and nothing was published.
    let leftovers = store.list("plume/temp/").await.unwrap();
    assert_eq!(leftovers.len(), 1);
    assert!(leftovers[0].ends_with("part-00000.ndjson.gz"));
    assert_eq!(failure.leftover_artifacts.len(), 1);
    assert_eq!(failure.leftover_artifacts[0].as_str(), leftovers[0]);
    assert!(sink.messages().await.is_empty());
}

#[tokio::test]
async fn all_stale_data_fails_in_reducing_and_keeps_intermediates() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    seed(
        store.as_ref(),
        "realtime-gzipped/2024-01-02/0000.ndjson.gz",
        &[reading_line("loc-1", "pm25", 10.0, "2019-06-01T02:00:00Z")],
    )
    .await;

    let orchestrator =
        Orchestrator::new(test_config(), store.clone(), sink.clone()).unwrap();
    let report = orchestrator.run(target_date()).await;

    assert_eq!(
        report.status,
        RunState::Failed {
            stage: Stage::Reducing
        }
    );
    let failure = report.failure.expect("failure recorded");
    assert!(failure.cause.contains("no rows remained"));
    assert_eq!(failure.leftover_artifacts.len(), 1);
    assert!(report.final_artifact.is_none());
    // Cleanup never ran; the intermediate is still there.
    assert_eq!(store.list("plume/temp/").await.unwrap().len(), 1);
    assert!(sink.messages().await.is_empty());
}

#[tokio::test]
async fn empty_day_and_listing_outage_fail_differently() {
    // No objects at all: the day is missing.
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(MemoryStore::new()),
        sink.clone(),
    )
    .unwrap();
    let report = orchestrator.run(target_date()).await;
    assert_eq!(
        report.status,
        RunState::Failed {
            stage: Stage::Listing
        }
    );
    assert!(report.failure.unwrap().cause.contains("no source objects"));

    // Backend down: same stage, different cause.
    let mut flaky = FlakyStore::wrapping(MemoryStore::new());
    flaky.fail_list = true;
    let orchestrator =
        Orchestrator::new(test_config(), Arc::new(flaky), sink).unwrap();
    let report = orchestrator.run(target_date()).await;
    assert_eq!(
        report.status,
        RunState::Failed {
            stage: Stage::Listing
        }
    );
    assert!(report.failure.unwrap().cause.contains("injected list outage"));
}

#[tokio::test]
async fn delete_outage_fails_the_run_after_the_artifact_is_durable() {
    let inner = MemoryStore::new();
    seed_happy_day(&inner).await;
    let mut flaky = FlakyStore::wrapping(inner.clone());
    flaky.fail_deletes = true;

    let sink = Arc::new(MemorySink::new());
    let orchestrator =
        Orchestrator::new(test_config(), Arc::new(flaky), sink.clone()).unwrap();
    let report = orchestrator.run(target_date()).await;

    assert_eq!(
        report.status,
        RunState::Failed {
            stage: Stage::CleaningUp
        }
    );
    // The summary still exists and the report says where it is.
    let final_ref = report.final_artifact.expect("final artifact");
    assert!(inner.contains(final_ref.as_str()).await);
    // Both intermediates survived the outage and the report names them.
    let failure = report.failure.expect("failure recorded");
    assert_eq!(failure.leftover_artifacts.len(), 2);
    // Notification was never attempted.
    assert!(sink.messages().await.is_empty());
}

#[tokio::test]
async fn per_key_delete_failures_are_reported_but_do_not_fail_the_run() {
    let inner = MemoryStore::new();
    seed_happy_day(&inner).await;
    let mut flaky = FlakyStore::wrapping(inner.clone());
    flaky.deny_each_delete = true;

    let sink = Arc::new(MemorySink::new());
    let orchestrator =
        Orchestrator::new(test_config(), Arc::new(flaky), sink.clone()).unwrap();
    let report = orchestrator.run(target_date()).await;

    // Undeleted intermediates cost storage, not correctness.
    assert_eq!(report.status, RunState::Done);
    assert!(report.failure.is_none());
    let cleanup = report.cleanup.expect("cleanup report");
    assert_eq!(cleanup.deleted, 0);
    assert_eq!(cleanup.failed.len(), 2);
    assert!(!cleanup.is_clean());
    assert!(cleanup
        .failed
        .iter()
        .all(|failed| failed.reason.contains("injected delete denial")));

    // The denied intermediates are still in storage and the outcome still
    // went out.
    assert_eq!(inner.list("plume/temp/").await.unwrap().len(), 2);
    assert_eq!(sink.messages().await.len(), 1);
}

#[tokio::test]
async fn notify_failure_does_not_hide_completed_work() {
    let store = Arc::new(MemoryStore::new());
    seed_happy_day(&store).await;

    let orchestrator =
        Orchestrator::new(test_config(), store.clone(), Arc::new(DeadSink)).unwrap();
    let report = orchestrator.run(target_date()).await;

    assert_eq!(
        report.status,
        RunState::Failed {
            stage: Stage::Notifying
        }
    );
    let failure = report.failure.expect("failure recorded");
    assert_eq!(failure.stage, Stage::Notifying);
    assert!(failure.cause.contains("plume-runs"));
    // Cleanup already removed the intermediates; nothing is left to sweep.
    assert!(failure.leftover_artifacts.is_empty());

    // Everything durable happened: summary written, intermediates deleted.
    let final_ref = report.final_artifact.expect("final artifact");
    assert!(store.contains(final_ref.as_str()).await);
    assert!(store.list("plume/temp/").await.unwrap().is_empty());
    assert_eq!(report.summary_rows, 2);
}

#[tokio::test]
async fn rerunning_a_day_overwrites_the_summary_in_place() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(MemorySink::new());
    seed_happy_day(&store).await;

    let orchestrator =
        Orchestrator::new(test_config(), store.clone(), sink.clone()).unwrap();
    let first = orchestrator.run(target_date()).await;
    let second = orchestrator.run(target_date()).await;

    assert_eq!(first.status, RunState::Done);
    assert_eq!(second.status, RunState::Done);
    assert_ne!(first.run_id, second.run_id);
    // Same destination key both times, and only one summary object exists.
    assert_eq!(first.final_artifact, second.final_artifact);
    assert_eq!(store.list("plume/output/").await.unwrap().len(), 1);
    assert!(store.list("plume/temp/").await.unwrap().is_empty());
    assert_eq!(sink.messages().await.len(), 2);
}
