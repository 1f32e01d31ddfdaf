// End-to-end scenarios for the changegate sync runner.
//
// Everything runs in-process: a stub source stands in for the external
// API, the filesystem snapshot store lives in a temp directory, and Runs
// go through the same driver the binary wires up.

use async_trait::async_trait;
use common::config::Settings;
use common::controller::{ControllerConfig, RunDriver, TriggerController};
use common::errors::{ExecutionError, PublishError};
use common::executor::{EtlExecutor, SourceClient, SourceItem};
use common::lock::LocalRunLock;
use common::models::{PartialFailurePolicy, Run, RunOutcome, TriggerReason};
use common::publisher::{ChangeGatedPublisher, PublishOutcome, SyncDriver};
use common::retry::FixedDelay;
use common::schedule::JobSchedule;
use common::store::{FsSnapshotStore, SnapshotStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Stub source whose contents can be swapped between Runs and whose items
/// can be made to fail.
#[derive(Clone, Default)]
struct StubSource {
    items: Arc<Mutex<HashMap<String, SourceItem>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl StubSource {
    fn set_items(&self, items: &[(&str, &str, &str)]) {
        let mut map = self.items.lock().unwrap();
        map.clear();
        for (id, title, body) in items {
            map.insert(
                id.to_string(),
                SourceItem {
                    id: id.to_string(),
                    title: title.to_string(),
                    body: body.to_string(),
                },
            );
        }
    }

    fn fail_item(&self, id: &str) {
        self.failing.lock().unwrap().push(id.to_string());
    }
}

#[async_trait]
impl SourceClient for StubSource {
    async fn list_items(&self) -> Result<Vec<String>, ExecutionError> {
        let mut ids: Vec<String> = self.items.lock().unwrap().keys().cloned().collect();
        ids.extend(self.failing.lock().unwrap().iter().cloned());
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn fetch_item(&self, id: &str) -> Result<SourceItem, ExecutionError> {
        if self.failing.lock().unwrap().contains(&id.to_string()) {
            return Err(ExecutionError::SourceRequestFailed(format!(
                "injected failure for {}",
                id
            )));
        }
        self.items
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ExecutionError::InvalidPayload(format!("unknown id {}", id)))
    }
}

fn driver_for(
    source: StubSource,
    store: Arc<dyn SnapshotStore>,
    policy: PartialFailurePolicy,
) -> SyncDriver {
    let executor = EtlExecutor::new(
        Arc::new(source),
        None,
        policy,
        4,
        Arc::new(FixedDelay::new(Duration::from_millis(1), 2)),
    );
    SyncDriver::new(executor, ChangeGatedPublisher::new(store))
}

#[tokio::test]
async fn first_run_publishes_initial_snapshot_second_identical_run_noops() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(dir.path()).unwrap());

    let source = StubSource::default();
    source.set_items(&[
        ("v1", "First video", "transcript one"),
        ("v2", "Second video", "transcript two"),
    ]);
    let driver = driver_for(source.clone(), store.clone(), PartialFailurePolicy::AbortRun);

    // Run 1: scheduled, against an empty baseline
    let run1 = Run::begin(TriggerReason::Schedule);
    let outcome = driver.execute(&run1).await.unwrap();
    let PublishOutcome::Published { head, commit } = outcome else {
        panic!("expected first run to publish");
    };
    assert_eq!(head.version, 1);
    assert_eq!(commit.message, "initial snapshot");

    // Run 2: manual dispatch the same day, identical source data
    let run2 = Run::begin(TriggerReason::Manual);
    let outcome = driver.execute(&run2).await.unwrap();
    assert_eq!(outcome, PublishOutcome::NoOp);

    // Zero new commits; head untouched
    let commits = store.commits().await.unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(store.head().await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn material_change_produces_attributable_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(dir.path()).unwrap());

    let source = StubSource::default();
    source.set_items(&[("v1", "Video", "take one")]);
    let driver = driver_for(source.clone(), store.clone(), PartialFailurePolicy::AbortRun);

    driver.execute(&Run::begin(TriggerReason::Schedule)).await.unwrap();

    // Upstream re-edits the transcript and adds a video
    source.set_items(&[("v1", "Video", "take two"), ("v2", "New video", "fresh")]);
    let run = Run::begin(TriggerReason::Schedule);
    let outcome = driver.execute(&run).await.unwrap();

    let PublishOutcome::Published { head, commit } = outcome else {
        panic!("expected changed data to publish");
    };
    assert_eq!(head.version, 2);
    assert_eq!(commit.message, "sync: +1 ~1 -0 records");
    assert_eq!(commit.run_id, run.id);
}

#[tokio::test]
async fn abort_whole_run_leaves_published_snapshot_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(dir.path()).unwrap());

    let source = StubSource::default();
    source.set_items(&[("v1", "A", "one"), ("v2", "B", "two"), ("v3", "C", "three")]);
    let driver = driver_for(source.clone(), store.clone(), PartialFailurePolicy::AbortRun);

    driver.execute(&Run::begin(TriggerReason::Schedule)).await.unwrap();
    let head_before = store.head().await.unwrap().unwrap();

    // One of three items now fails to fetch
    source.set_items(&[("v1", "A", "one changed"), ("v2", "B", "two")]);
    source.fail_item("v3");

    let result = driver.execute(&Run::begin(TriggerReason::Schedule)).await;
    assert!(result.is_err(), "abort_run must fail the whole run");

    assert_eq!(store.head().await.unwrap().unwrap(), head_before);
    assert_eq!(store.commits().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_runs_racing_to_publish_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(dir.path()).unwrap());

    let source_a = StubSource::default();
    source_a.set_items(&[("v1", "A", "seen by run a")]);
    let source_b = StubSource::default();
    source_b.set_items(&[("v1", "A", "seen by run b")]);

    let make_executor = |source: StubSource| {
        EtlExecutor::new(
            Arc::new(source),
            None,
            PartialFailurePolicy::AbortRun,
            4,
            Arc::new(FixedDelay::new(Duration::from_millis(1), 2)),
        )
    };

    // Both Runs capture the empty baseline before either publishes
    let run_a = Run::begin(TriggerReason::Schedule);
    let run_b = Run::begin(TriggerReason::Push);
    let candidate_a = make_executor(source_a).produce_snapshot(run_a.id).await.unwrap();
    let candidate_b = make_executor(source_b).produce_snapshot(run_b.id).await.unwrap();

    let publisher_a = ChangeGatedPublisher::new(store.clone());
    let publisher_b = ChangeGatedPublisher::new(store.clone());
    let (ra, rb) = tokio::join!(
        publisher_a.publish(&run_a, None, candidate_a),
        publisher_b.publish(&run_b, None, candidate_b),
    );

    let published = [&ra, &rb]
        .iter()
        .filter(|r| matches!(r, Ok(PublishOutcome::Published { .. })))
        .count();
    assert_eq!(published, 1, "exactly one publish must win");
    assert!(
        ra.is_err() || rb.is_err(),
        "the loser must fail safely, not silently merge"
    );

    // No corrupted merged state: head at version 1, single commit, one record
    let head = store.head().await.unwrap().unwrap();
    assert_eq!(head.version, 1);
    assert_eq!(store.commits().await.unwrap().len(), 1);
    let snapshot = store.load(1).await.unwrap();
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn loser_of_race_reports_conflict_or_divergence() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(dir.path()).unwrap());

    let source = StubSource::default();
    source.set_items(&[("v1", "A", "first")]);
    let driver = driver_for(source.clone(), store.clone(), PartialFailurePolicy::AbortRun);

    // Capture the empty baseline, then let someone else publish
    let stale_base = store.head().await.unwrap();
    driver.execute(&Run::begin(TriggerReason::Schedule)).await.unwrap();

    let executor = EtlExecutor::new(
        Arc::new(source),
        None,
        PartialFailurePolicy::AbortRun,
        4,
        Arc::new(FixedDelay::new(Duration::from_millis(1), 2)),
    );
    let publisher = ChangeGatedPublisher::new(store.clone());
    let run = Run::begin(TriggerReason::Manual);
    let candidate = executor.produce_snapshot(run.id).await.unwrap();
    let result = publisher.publish(&run, stale_base, candidate).await;
    assert!(matches!(result, Err(PublishError::Diverged { .. })));
}

#[tokio::test]
async fn executor_reruns_are_idempotent() {
    let source = StubSource::default();
    source.set_items(&[("v1", "A", "stable"), ("v2", "B", "content")]);

    let executor = EtlExecutor::new(
        Arc::new(source),
        None,
        PartialFailurePolicy::AbortRun,
        2,
        Arc::new(FixedDelay::new(Duration::from_millis(1), 2)),
    );

    let s1 = executor.produce_snapshot(Uuid::new_v4()).await.unwrap();
    let s2 = executor.produce_snapshot(Uuid::new_v4()).await.unwrap();
    assert_eq!(s1.content_hash().unwrap(), s2.content_hash().unwrap());
}

#[tokio::test]
async fn malformed_schedule_is_rejected_at_configuration_load() {
    let mut settings = Settings::default();
    settings.job.schedule = "once in a blue moon".to_string();
    assert!(settings.validate().is_err());

    // And a valid one passes, so it is the expression that failed
    settings.job.schedule = "0 0 2 * * * *".to_string();
    assert!(settings.validate().is_ok());
}

#[tokio::test]
async fn controller_runs_full_pipeline_on_manual_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FsSnapshotStore::new(dir.path()).unwrap());

    let source = StubSource::default();
    source.set_items(&[("v1", "A", "payload")]);
    let driver: Arc<dyn RunDriver> = Arc::new(driver_for(
        source,
        store.clone(),
        PartialFailurePolicy::AbortRun,
    ));

    let controller = TriggerController::new(
        ControllerConfig {
            job_name: "it-sync".to_string(),
            max_run_seconds: 30,
            push_enabled: true,
            manual_enabled: true,
        },
        JobSchedule::parse("0 0 2 * * * *", "UTC", false).unwrap(),
        Arc::new(LocalRunLock::new()),
        driver,
    );

    let outcome = controller.run_now(TriggerReason::Manual).await.unwrap();
    assert_eq!(outcome, RunOutcome::Published { version: 1 });

    let again = controller.run_now(TriggerReason::Manual).await.unwrap();
    assert_eq!(again, RunOutcome::NoOp);
}
