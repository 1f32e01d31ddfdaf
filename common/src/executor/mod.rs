// ETL executor: fetch -> clean -> enrich -> Snapshot.
//
// The executor owns no shared mutable state and is safe to re-run: given
// identical external data it produces an identical Snapshot, regardless of
// fetch completion order. External collaborators (source API, enrichment
// API) sit behind traits with their own timeout configuration.

pub mod http;

use crate::errors::ExecutionError;
use crate::models::PartialFailurePolicy;
use crate::retry::RetryStrategy;
use crate::snapshot::{Record, Snapshot};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// One raw item as fetched from the external source, before cleaning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// External source of dataset items
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Enumerate the ids of all items currently available
    async fn list_items(&self) -> Result<Vec<String>, ExecutionError>;

    /// Fetch one item by id
    async fn fetch_item(&self, id: &str) -> Result<SourceItem, ExecutionError>;
}

/// External enrichment collaborator (e.g. an embedding API)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, text: &str) -> Result<Vec<f32>, ExecutionError>;
}

/// Collapse all whitespace runs to single spaces and trim the ends.
/// Keeps cleaning deterministic across sources that differ only in layout.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The ETL executor for one job. Runs the whole pipeline and hands back a
/// candidate Snapshot; it never touches the published state.
pub struct EtlExecutor {
    source: Arc<dyn SourceClient>,
    enricher: Option<Arc<dyn Enricher>>,
    policy: PartialFailurePolicy,
    fetch_concurrency: usize,
    retry: Arc<dyn RetryStrategy>,
}

impl EtlExecutor {
    pub fn new(
        source: Arc<dyn SourceClient>,
        enricher: Option<Arc<dyn Enricher>>,
        policy: PartialFailurePolicy,
        fetch_concurrency: usize,
        retry: Arc<dyn RetryStrategy>,
    ) -> Self {
        Self {
            source,
            enricher,
            policy,
            fetch_concurrency: fetch_concurrency.max(1),
            retry,
        }
    }

    pub fn policy(&self) -> PartialFailurePolicy {
        self.policy
    }

    /// Produce a candidate Snapshot for one Run.
    ///
    /// Item fetches run concurrently up to `fetch_concurrency` and are all
    /// joined before the Snapshot is assembled. Transient per-item failures
    /// are retried with backoff; exhausted items fall under the configured
    /// partial-failure policy.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn produce_snapshot(&self, run_id: Uuid) -> Result<Snapshot, ExecutionError> {
        let ids = self.list_with_retry().await?;
        let total = ids.len();
        info!(items = total, "Source listing complete");

        let results: Vec<Result<Option<Record>, String>> = stream::iter(ids)
            .map(|id| self.process_item(id))
            .buffer_unordered(self.fetch_concurrency)
            .collect()
            .await;

        let mut records = BTreeMap::new();
        let mut failed: Vec<String> = Vec::new();
        for result in results {
            match result {
                Ok(Some(record)) => {
                    records.insert(record.id.clone(), record);
                }
                Ok(None) => {}
                Err(id) => failed.push(id),
            }
        }

        if !failed.is_empty() {
            match self.policy {
                PartialFailurePolicy::AbortRun => {
                    warn!(failed = failed.len(), total, "Aborting run on item failures");
                    return Err(ExecutionError::RunAborted {
                        failed: failed.len(),
                        total,
                    });
                }
                PartialFailurePolicy::SkipItem => {
                    warn!(
                        skipped = failed.len(),
                        skipped_ids = ?failed,
                        "Continuing with partial snapshot"
                    );
                }
            }
        }

        info!(records = records.len(), "Candidate snapshot assembled");
        Ok(Snapshot::new(records, run_id))
    }

    async fn list_with_retry(&self) -> Result<Vec<String>, ExecutionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.source.list_items().await {
                Ok(ids) => return Ok(ids),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            debug!(attempt, error = %e, "Retrying source listing");
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch, clean and enrich one item. `Ok(None)` means the item cleaned
    /// down to nothing and is dropped. `Err(id)` marks the item failed after
    /// retries.
    async fn process_item(&self, id: String) -> Result<Option<Record>, String> {
        let item = match self.fetch_with_retry(&id).await {
            Ok(item) => item,
            Err(e) => {
                warn!(id = %id, error = %e, "Item fetch exhausted");
                return Err(id);
            }
        };

        let title = clean_text(&item.title);
        let body = clean_text(&item.body);
        if body.is_empty() {
            debug!(id = %id, "Dropping item with empty body after cleaning");
            return Ok(None);
        }

        let embedding = match &self.enricher {
            Some(enricher) => match self.enrich_with_retry(enricher.as_ref(), &body).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!(id = %id, error = %e, "Item enrichment exhausted");
                    return Err(id);
                }
            },
            None => None,
        };

        Ok(Some(Record {
            id: item.id,
            title,
            body,
            embedding,
        }))
    }

    async fn fetch_with_retry(&self, id: &str) -> Result<SourceItem, ExecutionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.source.fetch_item(id).await {
                Ok(item) => return Ok(item),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            debug!(id = %id, attempt, error = %e, "Retrying item fetch");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(ExecutionError::ItemExhausted {
                                id: id.to_string(),
                                attempts: attempt + 1,
                                reason: e.to_string(),
                            })
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn enrich_with_retry(
        &self,
        enricher: &dyn Enricher,
        text: &str,
    ) -> Result<Vec<f32>, ExecutionError> {
        let mut attempt: u32 = 0;
        loop {
            match enricher.enrich(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
