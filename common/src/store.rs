// Snapshot store: the only shared mutable resource in the system.
//
// The head is a versioned record (version counter + content hash) and moves
// only through compare-and-publish. Writers holding a stale expected head
// lose the race and nothing of theirs is persisted. On the filesystem
// backend every file lands via write-temp-then-rename; the head swap is
// the point of durability, so a crash before it leaves the prior head
// intact. The commit log is appended after the swap and so never records
// a version that did not become head.

use crate::errors::{PublishError, StoreError};
use crate::models::{Commit, Head};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Persistence seam for published Snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Current head, or None before the first publish
    async fn head(&self) -> Result<Option<Head>, StoreError>;

    /// Load a published Snapshot by version
    async fn load(&self, version: u64) -> Result<Snapshot, StoreError>;

    /// Atomically publish `snapshot` as the new head, but only if the
    /// current head still matches `expected`. Returns the new head and the
    /// commit recorded for it.
    async fn compare_and_publish(
        &self,
        expected: Option<&Head>,
        snapshot: &Snapshot,
        message: &str,
        run_id: Uuid,
    ) -> Result<(Head, Commit), PublishError>;

    /// Full commit history, oldest first
    async fn commits(&self) -> Result<Vec<Commit>, StoreError>;
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Filesystem-backed store: `snapshots/<version>.json`, a `HEAD` record and
/// an append-only `commits.log` of JSON lines.
pub struct FsSnapshotStore {
    root: PathBuf,
    // Single-writer lock for the publish critical section
    write_lock: tokio::sync::Mutex<()>,
}

impl FsSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let snapshots_dir = root.join("snapshots");
        std::fs::create_dir_all(&snapshots_dir).map_err(|e| io_err(&snapshots_dir, e))?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn head_path(&self) -> PathBuf {
        self.root.join("HEAD")
    }

    fn snapshot_path(&self, version: u64) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.json", version))
    }

    fn commits_path(&self) -> PathBuf {
        self.root.join("commits.log")
    }

    /// Write bytes to `path` atomically via a temp file in the same
    /// directory and a rename.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_err(path, e))?;
        Ok(())
    }

    async fn append_commit(&self, commit: &Commit) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(commit)?;
        line.push(b'\n');
        let path = self.commits_path();
        let mut log = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_err(&path, e)),
        };
        log.extend_from_slice(&line);
        self.write_atomic(&path, &log).await
    }

    async fn read_head(&self) -> Result<Option<Head>, StoreError> {
        let path = self.head_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let head: Head = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::CorruptHead(e.to_string()))?;
                Ok(Some(head))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn head(&self) -> Result<Option<Head>, StoreError> {
        self.read_head().await
    }

    async fn load(&self, version: u64) -> Result<Snapshot, StoreError> {
        let path = self.snapshot_path(version);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(version))
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }

    #[instrument(skip(self, snapshot), fields(message = %message, run_id = %run_id))]
    async fn compare_and_publish(
        &self,
        expected: Option<&Head>,
        snapshot: &Snapshot,
        message: &str,
        run_id: Uuid,
    ) -> Result<(Head, Commit), PublishError> {
        let _guard = self.write_lock.lock().await;

        let current = self.read_head().await?;
        if current.as_ref() != expected {
            debug!("Compare-and-publish lost the race");
            return Err(PublishError::Conflict {
                expected: expected.map(|h| h.version),
                found: current.map(|h| h.version),
            });
        }

        let version = expected.map(|h| h.version + 1).unwrap_or(1);
        let commit = Commit {
            version,
            content_hash: snapshot.content_hash().map_err(StoreError::from)?,
            message: message.to_string(),
            run_id,
            created_at: Utc::now(),
        };
        let head = Head {
            version,
            content_hash: commit.content_hash.clone(),
        };

        // Snapshot body first; the head swap is what makes the publish
        // durable. A crash or cancellation before the swap leaves the prior
        // head in place with no trace in the commit log.
        let snapshot_bytes = serde_json::to_vec_pretty(snapshot).map_err(StoreError::from)?;
        self.write_atomic(&self.snapshot_path(version), &snapshot_bytes)
            .await?;

        let head_bytes = serde_json::to_vec(&head).map_err(StoreError::from)?;
        self.write_atomic(&self.head_path(), &head_bytes).await?;

        // The publish is complete once the head landed; a log append
        // failure must not report it as unpublished.
        if let Err(e) = self.append_commit(&commit).await {
            warn!(version, error = %e, "Commit log append failed after head swap");
        }

        info!(version, records = snapshot.len(), "Snapshot published");
        Ok((head, commit))
    }

    async fn commits(&self) -> Result<Vec<Commit>, StoreError> {
        let path = self.commits_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path, e)),
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut commits = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            commits.push(serde_json::from_str(line)?);
        }
        Ok(commits)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    head: Option<Head>,
    snapshots: HashMap<u64, Snapshot>,
    commits: Vec<Commit>,
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: tokio::sync::Mutex<MemoryInner>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn head(&self) -> Result<Option<Head>, StoreError> {
        Ok(self.inner.lock().await.head.clone())
    }

    async fn load(&self, version: u64) -> Result<Snapshot, StoreError> {
        self.inner
            .lock()
            .await
            .snapshots
            .get(&version)
            .cloned()
            .ok_or(StoreError::NotFound(version))
    }

    async fn compare_and_publish(
        &self,
        expected: Option<&Head>,
        snapshot: &Snapshot,
        message: &str,
        run_id: Uuid,
    ) -> Result<(Head, Commit), PublishError> {
        let mut inner = self.inner.lock().await;

        if inner.head.as_ref() != expected {
            return Err(PublishError::Conflict {
                expected: expected.map(|h| h.version),
                found: inner.head.as_ref().map(|h| h.version),
            });
        }

        let version = expected.map(|h| h.version + 1).unwrap_or(1);
        let commit = Commit {
            version,
            content_hash: snapshot.content_hash().map_err(StoreError::from)?,
            message: message.to_string(),
            run_id,
            created_at: Utc::now(),
        };
        let head = Head {
            version,
            content_hash: commit.content_hash.clone(),
        };

        inner.snapshots.insert(version, snapshot.clone());
        inner.head = Some(head.clone());
        inner.commits.push(commit.clone());
        Ok((head, commit))
    }

    async fn commits(&self) -> Result<Vec<Commit>, StoreError> {
        Ok(self.inner.lock().await.commits.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Record;
    use std::collections::BTreeMap;

    fn sample_snapshot(body: &str) -> Snapshot {
        let mut records = BTreeMap::new();
        records.insert(
            "1".to_string(),
            Record {
                id: "1".to_string(),
                title: "one".to_string(),
                body: body.to_string(),
                embedding: None,
            },
        );
        Snapshot::new(records, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_fs_store_first_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path()).unwrap();

        assert!(store.head().await.unwrap().is_none());

        let snapshot = sample_snapshot("alpha");
        let (head, commit) = store
            .compare_and_publish(None, &snapshot, "initial snapshot", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(head.version, 1);
        assert_eq!(commit.message, "initial snapshot");
        assert_eq!(store.head().await.unwrap(), Some(head));

        let loaded = store.load(1).await.unwrap();
        assert_eq!(loaded.content_hash().unwrap(), snapshot.content_hash().unwrap());
    }

    #[tokio::test]
    async fn test_fs_store_stale_expected_head_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path()).unwrap();

        let first = sample_snapshot("alpha");
        store
            .compare_and_publish(None, &first, "initial snapshot", Uuid::new_v4())
            .await
            .unwrap();

        // A second writer still holding the empty baseline must lose
        let second = sample_snapshot("beta");
        let result = store
            .compare_and_publish(None, &second, "sync", Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(PublishError::Conflict { .. })));

        // Prior state intact
        let head = store.head().await.unwrap().unwrap();
        assert_eq!(head.version, 1);
        assert_eq!(head.content_hash, first.content_hash().unwrap());
        assert_eq!(store.commits().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fs_store_version_sequence_and_commit_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path()).unwrap();

        let first = sample_snapshot("alpha");
        let (head1, _) = store
            .compare_and_publish(None, &first, "initial snapshot", Uuid::new_v4())
            .await
            .unwrap();

        let second = sample_snapshot("beta");
        let (head2, _) = store
            .compare_and_publish(Some(&head1), &second, "sync: +0 ~1 -0 records", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(head2.version, 2);

        let commits = store.commits().await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].version, 1);
        assert_eq!(commits[1].version, 2);
        assert_eq!(commits[1].message, "sync: +0 ~1 -0 records");
    }

    #[tokio::test]
    async fn test_fs_store_commit_log_never_leads_head() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path()).unwrap();

        // Block the log path so the append after the head swap fails
        let log_path = dir.path().join("commits.log");
        tokio::fs::create_dir(&log_path).await.unwrap();

        let first = sample_snapshot("alpha");
        let (head1, _) = store
            .compare_and_publish(None, &first, "initial snapshot", Uuid::new_v4())
            .await
            .unwrap();

        // The publish is durable despite the failed log append
        assert_eq!(head1.version, 1);
        assert_eq!(store.head().await.unwrap(), Some(head1.clone()));
        assert!(store.load(1).await.is_ok());

        // The log may lag behind the head but never record a version the
        // head did not reach; the next publish does not reuse a number.
        tokio::fs::remove_dir(&log_path).await.unwrap();
        assert!(store.commits().await.unwrap().is_empty());

        let second = sample_snapshot("beta");
        let (head2, _) = store
            .compare_and_publish(Some(&head1), &second, "sync: +0 ~1 -0 records", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(head2.version, 2);

        let commits = store.commits().await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].version, 2);
    }

    #[tokio::test]
    async fn test_fs_store_missing_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load(42).await,
            Err(StoreError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_fs_store_corrupt_head_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(dir.path()).unwrap();
        tokio::fs::write(dir.path().join("HEAD"), b"not json")
            .await
            .unwrap();
        assert!(matches!(
            store.head().await,
            Err(StoreError::CorruptHead(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_race_has_single_winner() {
        let store = std::sync::Arc::new(MemorySnapshotStore::new());

        let a = sample_snapshot("from run a");
        let b = sample_snapshot("from run b");

        // Both runs captured the empty baseline
        let (ra, rb) = tokio::join!(
            store.compare_and_publish(None, &a, "initial snapshot", Uuid::new_v4()),
            store.compare_and_publish(None, &b, "initial snapshot", Uuid::new_v4()),
        );

        assert!(ra.is_ok() != rb.is_ok(), "exactly one publish must win");
        let head = store.head().await.unwrap().unwrap();
        assert_eq!(head.version, 1);
        assert_eq!(store.commits().await.unwrap().len(), 1);
    }
}
