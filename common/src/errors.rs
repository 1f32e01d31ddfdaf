// Error handling framework

use thiserror::Error;

/// Configuration errors, fatal at load time
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing secret environment variable: {0}")]
    MissingSecret(String),

    #[error("Configuration load failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// ETL executor errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Source request failed: {0}")]
    SourceRequestFailed(String),

    #[error("Enrichment request failed: {0}")]
    EnrichmentFailed(String),

    #[error("Invalid source payload: {0}")]
    InvalidPayload(String),

    #[error("Item '{id}' failed after {attempts} attempts: {reason}")]
    ItemExhausted {
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Run aborted: {failed} of {total} items failed")]
    RunAborted { failed: usize, total: usize },

    #[error("Missing secret environment variable: {0}")]
    MissingSecret(String),

    #[error("Run timed out after {0} seconds")]
    Timeout(u64),
}

impl ExecutionError {
    /// Transient errors are retried within a Run; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::SourceRequestFailed(_) | ExecutionError::EnrichmentFailed(_)
        )
    }
}

/// Snapshot store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt head record: {0}")]
    CorruptHead(String),

    #[error("Snapshot not found: version {0}")]
    NotFound(u64),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publish step errors; both variants abort without touching prior state
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Base snapshot diverged: run started at version {base:?}, head is now {head:?}")]
    Diverged {
        base: Option<u64>,
        head: Option<u64>,
    },

    #[error("Publish conflict: expected head version {expected:?}, found {found:?}")]
    Conflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Trigger dispatch errors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("A run is already in flight for job '{0}'")]
    RunInFlight(String),

    #[error("Trigger kind disabled: {0}")]
    Disabled(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Missing secret environment variable: {0}")]
    MissingSecret(String),
}

/// One full Run, from trigger fire to publish decision
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        let code = match err {
            TriggerError::InvalidSignature => "UNAUTHORIZED",
            TriggerError::RunInFlight(_) => "RUN_IN_FLIGHT",
            TriggerError::Disabled(_) => "FORBIDDEN",
            _ => "TRIGGER_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::new("STORE_ERROR", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_execution_error_transient_classification() {
        assert!(ExecutionError::SourceRequestFailed("timeout".into()).is_transient());
        assert!(ExecutionError::EnrichmentFailed("503".into()).is_transient());
        assert!(!ExecutionError::MissingSecret("API_TOKEN".into()).is_transient());
        assert!(!ExecutionError::RunAborted {
            failed: 1,
            total: 3
        }
        .is_transient());
    }

    #[test]
    fn test_trigger_error_to_api_error() {
        let err = TriggerError::InvalidSignature;
        let api_err: ApiError = err.into();
        assert_eq!(api_err.code, "UNAUTHORIZED");

        let err = TriggerError::RunInFlight("daily-sync".to_string());
        let api_err: ApiError = err.into();
        assert_eq!(api_err.code, "RUN_IN_FLIGHT");
    }

    #[test]
    fn test_api_error_with_details() {
        let err = ApiError::new("TEST_ERROR", "Test message")
            .with_details(serde_json::json!({"field": "value"}));
        assert!(err.details.is_some());
    }
}
