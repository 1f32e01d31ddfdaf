// Trigger controller: decides when a Run starts.
//
// Owns nothing but the next-fire time. Time-based firing comes from the
// cron schedule; push and manual triggers arrive on a bounded channel from
// the HTTP surface. Overlap is prevented with the run lock: a trigger that
// finds a Run in flight is skipped, never queued behind it. Each Run
// executes under the configured max duration and is cancelled past it,
// which can never corrupt the published Snapshot because publishing is a
// single compare-and-publish at the very end of a Run.

use crate::config::Settings;
use crate::errors::{RunError, TriggerError};
use crate::lock::RunLock;
use crate::models::{Run, RunOutcome, TriggerReason};
use crate::publisher::PublishOutcome;
use crate::schedule::JobSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};

/// The body of one Run, from base-head capture to publish decision
#[async_trait]
pub trait RunDriver: Send + Sync {
    async fn execute(&self, run: &Run) -> Result<PublishOutcome, RunError>;
}

/// Controller configuration derived from Settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub job_name: String,
    pub max_run_seconds: u64,
    pub push_enabled: bool,
    pub manual_enabled: bool,
}

impl ControllerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            job_name: settings.job.name.clone(),
            max_run_seconds: settings.job.max_run_seconds,
            push_enabled: settings.triggers.push,
            manual_enabled: settings.triggers.manual,
        }
    }
}

/// Handle given to the HTTP surface for push/manual dispatch
#[derive(Clone)]
pub struct TriggerHandle {
    job_name: String,
    tx: mpsc::Sender<TriggerReason>,
    lock: Arc<dyn RunLock>,
    push_enabled: bool,
    manual_enabled: bool,
}

impl TriggerHandle {
    /// Queue a push or manual trigger. Skips (with an error the caller can
    /// surface) when the trigger kind is disabled or a Run is in flight.
    pub fn dispatch(&self, reason: TriggerReason) -> Result<(), TriggerError> {
        match reason {
            TriggerReason::Push if !self.push_enabled => {
                return Err(TriggerError::Disabled("push".to_string()))
            }
            TriggerReason::Manual if !self.manual_enabled => {
                return Err(TriggerError::Disabled("manual".to_string()))
            }
            TriggerReason::Schedule => {
                return Err(TriggerError::Disabled(
                    "schedule triggers fire internally".to_string(),
                ))
            }
            _ => {}
        }

        if self.lock.is_held(&self.job_name) {
            return Err(TriggerError::RunInFlight(self.job_name.clone()));
        }

        match self.tx.try_send(reason) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(TriggerError::RunInFlight(self.job_name.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TriggerError::Disabled("controller stopped".to_string()))
            }
        }
    }
}

/// The trigger controller for one job
pub struct TriggerController {
    config: ControllerConfig,
    schedule: JobSchedule,
    lock: Arc<dyn RunLock>,
    driver: Arc<dyn RunDriver>,
    trigger_tx: mpsc::Sender<TriggerReason>,
    trigger_rx: tokio::sync::Mutex<Option<mpsc::Receiver<TriggerReason>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TriggerController {
    pub fn new(
        config: ControllerConfig,
        schedule: JobSchedule,
        lock: Arc<dyn RunLock>,
        driver: Arc<dyn RunDriver>,
    ) -> Self {
        // Capacity 1: while a Run is in flight at most one trigger can sit
        // queued; further dispatches are skipped at the handle.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            schedule,
            lock,
            driver,
            trigger_tx,
            trigger_rx: tokio::sync::Mutex::new(Some(trigger_rx)),
            shutdown_tx,
        }
    }

    pub fn handle(&self) -> TriggerHandle {
        TriggerHandle {
            job_name: self.config.job_name.clone(),
            tx: self.trigger_tx.clone(),
            lock: self.lock.clone(),
            push_enabled: self.config.push_enabled,
            manual_enabled: self.config.manual_enabled,
        }
    }

    /// Signal the controller loop to stop after the current Run
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Execute one Run now for the given reason. Returns None if a Run is
    /// already in flight (the trigger is skipped, not queued).
    #[instrument(skip(self), fields(job = %self.config.job_name))]
    pub async fn run_now(&self, reason: TriggerReason) -> Option<RunOutcome> {
        let Some(guard) = self.lock.try_acquire(&self.config.job_name) else {
            warn!(reason = %reason, "Run in flight, trigger skipped");
            return None;
        };

        let mut run = Run::begin(reason);
        info!(run_id = %run.id, reason = %reason, "Run started");

        let max_duration = Duration::from_secs(self.config.max_run_seconds);
        let outcome = match tokio::time::timeout(max_duration, self.driver.execute(&run)).await {
            Ok(Ok(PublishOutcome::Published { head, .. })) => RunOutcome::Published {
                version: head.version,
            },
            Ok(Ok(PublishOutcome::NoOp)) => RunOutcome::NoOp,
            Ok(Err(e)) => RunOutcome::Failed {
                reason: e.to_string(),
            },
            Err(_) => RunOutcome::Failed {
                reason: format!("run exceeded {} seconds and was cancelled", max_duration.as_secs()),
            },
        };

        run.finish(outcome.clone());
        match &outcome {
            RunOutcome::Published { version } => {
                info!(run_id = %run.id, version, elapsed_ms = guard.elapsed().as_millis() as u64, "Run published")
            }
            RunOutcome::NoOp => {
                info!(run_id = %run.id, elapsed_ms = guard.elapsed().as_millis() as u64, "Run no-op, nothing to publish")
            }
            RunOutcome::Failed { reason } => {
                error!(run_id = %run.id, reason = %reason, "Run failed")
            }
        }

        drop(guard);
        Some(outcome)
    }

    /// Run the controller loop until shutdown
    #[instrument(skip(self), fields(job = %self.config.job_name))]
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("controller already started"))?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            scheduled = self.schedule.enabled,
            push = self.config.push_enabled,
            manual = self.config.manual_enabled,
            "Trigger controller started"
        );

        loop {
            let next_fire = if self.schedule.enabled {
                self.schedule.next_fire(Utc::now())
            } else {
                None
            };
            if let Some(at) = next_fire {
                debug!(next_fire = %at, "Next scheduled fire computed");
            }

            tokio::select! {
                _ = wait_until(next_fire) => {
                    self.run_now(TriggerReason::Schedule).await;
                }
                Some(reason) = trigger_rx.recv() => {
                    self.run_now(reason).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping trigger controller");
                    break;
                }
            }
        }

        info!("Trigger controller stopped");
        Ok(())
    }
}

/// Sleep until the given instant; pending forever when there is none
/// (push/manual triggers and shutdown still wake the select).
async fn wait_until(at: Option<DateTime<Utc>>) {
    match at {
        Some(at) => {
            let now = Utc::now();
            let delta = (at - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delta).await;
        }
        None => std::future::pending::<()>().await,
    }
}
