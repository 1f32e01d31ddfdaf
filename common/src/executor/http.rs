// HTTP implementations of the source and enrichment collaborators.
//
// Credentials are named in configuration as environment variables and
// resolved when a request is built, so secret values never sit in the
// Settings struct and never reach logs or snapshots.

use crate::config::{EnricherSettings, SourceSettings};
use crate::errors::ExecutionError;
use crate::executor::{Enricher, SourceClient, SourceItem};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

fn build_client(timeout_seconds: u64) -> Result<Client, ExecutionError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| {
            ExecutionError::SourceRequestFailed(format!("Failed to create HTTP client: {}", e))
        })
}

fn apply_bearer(
    request: RequestBuilder,
    token_env: &Option<String>,
) -> Result<RequestBuilder, ExecutionError> {
    match token_env {
        Some(var) => {
            let token = std::env::var(var)
                .map_err(|_| ExecutionError::MissingSecret(var.clone()))?;
            Ok(request.bearer_auth(token))
        }
        None => Ok(request),
    }
}

/// HTTP source: `GET {base}/items` lists ids, `GET {base}/items/{id}`
/// fetches one item.
pub struct HttpSourceClient {
    client: Client,
    base_url: String,
    auth_token_env: Option<String>,
}

impl HttpSourceClient {
    pub fn new(settings: &SourceSettings) -> Result<Self, ExecutionError> {
        Ok(Self {
            client: build_client(settings.timeout_seconds)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth_token_env: settings.auth_token_env.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ExecutionError> {
        let request = apply_bearer(self.client.get(url), &self.auth_token_env)?;
        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::SourceRequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionError::SourceRequestFailed(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ExecutionError::SourceRequestFailed(e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| ExecutionError::InvalidPayload(format!("GET {}: {}", url, e)))
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn list_items(&self) -> Result<Vec<String>, ExecutionError> {
        let url = format!("{}/items", self.base_url);
        debug!(url = %url, "Listing source items");
        self.get_json(&url).await
    }

    async fn fetch_item(&self, id: &str) -> Result<SourceItem, ExecutionError> {
        let url = format!("{}/items/{}", self.base_url, id);
        debug!(url = %url, "Fetching source item");
        self.get_json(&url).await
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// HTTP enricher: `POST {endpoint}` with `{"input": text}` returns
/// `{"embedding": [...]}`.
pub struct HttpEnricher {
    client: Client,
    endpoint: String,
    auth_token_env: Option<String>,
}

impl HttpEnricher {
    pub fn new(settings: &EnricherSettings) -> Result<Self, ExecutionError> {
        Ok(Self {
            client: build_client(settings.timeout_seconds)?,
            endpoint: settings.endpoint.clone(),
            auth_token_env: settings.auth_token_env.clone(),
        })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, text: &str) -> Result<Vec<f32>, ExecutionError> {
        let request = apply_bearer(self.client.post(&self.endpoint), &self.auth_token_env)?
            .json(&serde_json::json!({ "input": text }));

        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::EnrichmentFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionError::EnrichmentFailed(format!(
                "POST {} returned {}",
                self.endpoint, status
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::InvalidPayload(format!("{}: {}", self.endpoint, e)))?;
        Ok(parsed.embedding)
    }
}
