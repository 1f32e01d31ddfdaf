// Snapshot model: the immutable dataset output of one Run.
//
// Content identity is a SHA-256 over the canonical JSON of the records
// alone. Run metadata (run id, produced_at) is deliberately excluded so two
// Runs over identical external data hash identically, and the change gate
// compares content, never timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One dataset item after cleaning and enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// The dataset state produced by one Run. Immutable once produced;
/// superseded, never mutated, by the next published Snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// BTreeMap keeps serialization order deterministic
    pub records: BTreeMap<String, Record>,
    pub produced_at: DateTime<Utc>,
    pub run_id: Uuid,
}

impl Snapshot {
    pub fn new(records: BTreeMap<String, Record>, run_id: Uuid) -> Self {
        Self {
            records,
            produced_at: Utc::now(),
            run_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Hex SHA-256 over the canonical JSON of the records.
    ///
    /// A string-keyed map of plain structs does not fail to serialize
    /// (non-finite floats encode as null), but a failure surfaces to the
    /// caller rather than degrading into a shared hash value.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(&self.records)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Structural difference between a candidate Snapshot and the last
/// published one. Drives the publish decision and the commit message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl SnapshotDiff {
    /// Compare record content key by key. `None` for `last` means there is
    /// no published baseline yet.
    pub fn between(candidate: &Snapshot, last: Option<&Snapshot>) -> Self {
        let mut diff = SnapshotDiff::default();

        let empty = BTreeMap::new();
        let last_records = last.map(|s| &s.records).unwrap_or(&empty);

        for (id, record) in &candidate.records {
            match last_records.get(id) {
                None => diff.added.push(id.clone()),
                Some(prior) if prior != record => diff.changed.push(id.clone()),
                Some(_) => {}
            }
        }
        for id in last_records.keys() {
            if !candidate.records.contains_key(id) {
                diff.removed.push(id.clone());
            }
        }

        diff
    }

    /// Whether the difference warrants a publish
    pub fn is_material(&self) -> bool {
        !(self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty())
    }

    /// Attributable commit message: what changed, not when
    pub fn commit_message(&self, is_first_publish: bool) -> String {
        if is_first_publish {
            return "initial snapshot".to_string();
        }
        format!(
            "sync: +{} ~{} -{} records",
            self.added.len(),
            self.changed.len(),
            self.removed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, body: &str) -> Record {
        Record {
            id: id.to_string(),
            title: format!("title {}", id),
            body: body.to_string(),
            embedding: None,
        }
    }

    fn snapshot(items: &[(&str, &str)]) -> Snapshot {
        let records = items
            .iter()
            .map(|(id, body)| (id.to_string(), record(id, body)))
            .collect();
        Snapshot::new(records, Uuid::new_v4())
    }

    #[test]
    fn test_content_hash_ignores_run_metadata() {
        let a = snapshot(&[("1", "alpha"), ("2", "beta")]);
        let mut b = snapshot(&[("1", "alpha"), ("2", "beta")]);
        b.produced_at = a.produced_at + chrono::Duration::hours(5);

        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_detects_content_change() {
        let a = snapshot(&[("1", "alpha")]);
        let b = snapshot(&[("1", "alpha changed")]);
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        // BTreeMap ordering makes insertion order irrelevant
        let mut records_a = BTreeMap::new();
        records_a.insert("b".to_string(), record("b", "two"));
        records_a.insert("a".to_string(), record("a", "one"));
        let mut records_b = BTreeMap::new();
        records_b.insert("a".to_string(), record("a", "one"));
        records_b.insert("b".to_string(), record("b", "two"));

        let a = Snapshot::new(records_a, Uuid::new_v4());
        let b = Snapshot::new(records_b, Uuid::new_v4());
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_diff_against_empty_baseline() {
        let candidate = snapshot(&[("1", "alpha"), ("2", "beta")]);
        let diff = SnapshotDiff::between(&candidate, None);

        assert_eq!(diff.added.len(), 2);
        assert!(diff.changed.is_empty());
        assert!(diff.removed.is_empty());
        assert!(diff.is_material());
    }

    #[test]
    fn test_diff_identical_snapshots_not_material() {
        let a = snapshot(&[("1", "alpha")]);
        let b = snapshot(&[("1", "alpha")]);
        let diff = SnapshotDiff::between(&b, Some(&a));
        assert!(!diff.is_material());
    }

    #[test]
    fn test_diff_classifies_changes() {
        let last = snapshot(&[("1", "alpha"), ("2", "beta"), ("3", "gamma")]);
        let candidate = snapshot(&[("1", "alpha"), ("2", "beta v2"), ("4", "delta")]);
        let diff = SnapshotDiff::between(&candidate, Some(&last));

        assert_eq!(diff.added, vec!["4".to_string()]);
        assert_eq!(diff.changed, vec!["2".to_string()]);
        assert_eq!(diff.removed, vec!["3".to_string()]);
    }

    #[test]
    fn test_commit_message_first_publish() {
        let candidate = snapshot(&[("1", "alpha")]);
        let diff = SnapshotDiff::between(&candidate, None);
        assert_eq!(diff.commit_message(true), "initial snapshot");
    }

    #[test]
    fn test_commit_message_summarizes_change() {
        let last = snapshot(&[("1", "alpha"), ("2", "beta")]);
        let candidate = snapshot(&[("1", "alpha v2"), ("3", "gamma")]);
        let diff = SnapshotDiff::between(&candidate, Some(&last));
        assert_eq!(diff.commit_message(false), "sync: +1 ~1 -1 records");
    }
}
