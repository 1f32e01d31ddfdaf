// Change-gated publisher: diff the candidate Snapshot against the last
// published one and commit only on material difference.
//
// The gate is structural content comparison, never a timestamp check. The
// publisher captures nothing itself; the Run's base head comes in from the
// driver, and staleness or a lost compare-and-publish race aborts the
// publish step with prior state intact.

use crate::controller::RunDriver;
use crate::errors::{PublishError, RunError, StoreError};
use crate::executor::EtlExecutor;
use crate::models::{Commit, Head, Run};
use crate::snapshot::{Snapshot, SnapshotDiff};
use crate::store::SnapshotStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Derived publish decision for one Run
#[derive(Debug, Clone, PartialEq)]
pub enum PublishDecision {
    Publish { diff: SnapshotDiff },
    NoChange,
}

/// Result of the publish step
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published { head: Head, commit: Commit },
    NoOp,
}

pub struct ChangeGatedPublisher {
    store: Arc<dyn SnapshotStore>,
}

impl ChangeGatedPublisher {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Pure decision: does the candidate materially differ from the last
    /// published Snapshot?
    pub fn decide(candidate: &Snapshot, last: Option<&Snapshot>) -> PublishDecision {
        let diff = SnapshotDiff::between(candidate, last);
        if diff.is_material() {
            PublishDecision::Publish { diff }
        } else {
            PublishDecision::NoChange
        }
    }

    /// Publish `candidate` if it differs from the head Snapshot.
    ///
    /// `base` is the head the Run observed when it started. If the store
    /// head has moved since, the Run is stale and must fail safely rather
    /// than overwrite.
    #[instrument(skip(self, candidate), fields(run_id = %run.id, reason = %run.reason))]
    pub async fn publish(
        &self,
        run: &Run,
        base: Option<Head>,
        candidate: Snapshot,
    ) -> Result<PublishOutcome, PublishError> {
        let head = self.store.head().await?;

        if head != base {
            return Err(PublishError::Diverged {
                base: base.map(|h| h.version),
                head: head.map(|h| h.version),
            });
        }

        // Cheapest gate first: identical content hashes identically.
        let candidate_hash = candidate.content_hash().map_err(StoreError::from)?;
        if let Some(h) = &head {
            if h.content_hash == candidate_hash {
                debug!("Candidate identical to head, no-op");
                return Ok(PublishOutcome::NoOp);
            }
        }

        let last = match &head {
            Some(h) => Some(self.store.load(h.version).await.map_err(PublishError::from)?),
            None => None,
        };
        let diff = SnapshotDiff::between(&candidate, last.as_ref());
        if !diff.is_material() {
            debug!("No material difference, no-op");
            return Ok(PublishOutcome::NoOp);
        }

        let message = diff.commit_message(head.is_none());
        let (new_head, commit) = self
            .store
            .compare_and_publish(base.as_ref(), &candidate, &message, run.id)
            .await?;

        info!(
            version = new_head.version,
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            message = %commit.message,
            "Snapshot published"
        );
        Ok(PublishOutcome::Published {
            head: new_head,
            commit,
        })
    }
}

/// The full Run body: capture the base head, execute the ETL pipeline,
/// hand the candidate to the change gate.
pub struct SyncDriver {
    executor: EtlExecutor,
    publisher: ChangeGatedPublisher,
}

impl SyncDriver {
    pub fn new(executor: EtlExecutor, publisher: ChangeGatedPublisher) -> Self {
        Self {
            executor,
            publisher,
        }
    }
}

#[async_trait]
impl RunDriver for SyncDriver {
    async fn execute(&self, run: &Run) -> Result<PublishOutcome, RunError> {
        let base = self
            .publisher
            .store()
            .head()
            .await
            .map_err(PublishError::from)?;
        let candidate = self.executor.produce_snapshot(run.id).await?;
        let outcome = self.publisher.publish(run, base, candidate).await?;
        Ok(outcome)
    }
}
