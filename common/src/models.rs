use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Run Models
// ============================================================================

/// TriggerReason identifies the event class that started a Run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Schedule,
    Push,
    Manual,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerReason::Schedule => write!(f, "schedule"),
            TriggerReason::Push => write!(f, "push"),
            TriggerReason::Manual => write!(f, "manual"),
        }
    }
}

/// Terminal outcome of a Run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A new Snapshot was committed at this version
    Published { version: u64 },
    /// Candidate was identical to the last published Snapshot; nothing written
    NoOp,
    /// The Run failed; the last published Snapshot is untouched
    Failed { reason: String },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

/// One execution instance of the sync job.
/// Created at trigger fire, terminated at publish decision or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub reason: TriggerReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<RunOutcome>,
}

impl Run {
    pub fn begin(reason: TriggerReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }
}

// ============================================================================
// Publish Models
// ============================================================================

/// Attributable record of one publish: which Run produced which version,
/// with a human-readable summary of what changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub version: u64,
    pub content_hash: String,
    pub message: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Head of the snapshot store: the optimistic-concurrency token checked
/// by compare-and-publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub version: u64,
    pub content_hash: String,
}


/// Policy applied when ingestion of one external item keeps failing after
/// retries. Constant across Runs (it comes from configuration) so Snapshots
/// stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailurePolicy {
    /// Fail the whole Run; nothing is published
    #[default]
    AbortRun,
    /// Omit the failing item and continue with a partial Snapshot
    SkipItem,
}
