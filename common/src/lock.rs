// Run locking keyed by job identity
//
// The trigger controller must never start overlapping Runs for the same
// logical job. Acquisition is try-only: a trigger that finds the lock held
// is skipped, not queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lock seam for run serialization
pub trait RunLock: Send + Sync {
    /// Try to acquire the lock for a resource; `None` means it is held
    fn try_acquire(&self, resource: &str) -> Option<RunGuard>;

    /// Whether the lock is currently held
    fn is_held(&self, resource: &str) -> bool;
}

/// Guard that releases the lock when dropped
pub struct RunGuard {
    resource: String,
    held: Arc<Mutex<HashSet<String>>>,
    acquired_at: Instant,
}

impl RunGuard {
    /// Get the resource name this lock guards
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Get the time elapsed since lock acquisition
    pub fn elapsed(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        match self.held.lock() {
            Ok(mut held) => {
                held.remove(&self.resource);
                debug!(resource = %self.resource, "Run lock released");
            }
            Err(_) => {
                warn!(resource = %self.resource, "Run lock set poisoned on release");
            }
        }
    }
}

/// In-process run lock for a single-node runner
#[derive(Clone, Default)]
pub struct LocalRunLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunLock for LocalRunLock {
    fn try_acquire(&self, resource: &str) -> Option<RunGuard> {
        let mut held = self.held.lock().ok()?;
        if !held.insert(resource.to_string()) {
            debug!(resource = %resource, "Run lock already held, skipping");
            return None;
        }
        debug!(resource = %resource, "Run lock acquired");
        Some(RunGuard {
            resource: resource.to_string(),
            held: self.held.clone(),
            acquired_at: Instant::now(),
        })
    }

    fn is_held(&self, resource: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(resource))
            .unwrap_or(true)
    }
}
