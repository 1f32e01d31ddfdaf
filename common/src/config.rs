// Configuration management with layered configuration (file, env)
//
// Settings are deserialized once at startup and validated before anything
// else runs. Validation parses the cron expression, so a malformed schedule
// is a startup failure, never a fire-time one. Secret values never live in
// configuration files; the files carry the *names* of environment variables
// holding them.

use crate::errors::ConfigError;
use crate::models::PartialFailurePolicy;
use crate::schedule::JobSchedule;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub job: JobSettings,
    pub triggers: TriggerSettings,
    pub source: SourceSettings,
    pub enricher: EnricherSettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub retry: RetrySettings,
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Job identity; also keys the run lock
    pub name: String,
    /// Cron expression with second precision
    pub schedule: String,
    pub timezone: String,
    pub enabled: bool,
    /// Runs exceeding this are cancelled and count as failures
    pub max_run_seconds: u64,
    #[serde(default)]
    pub partial_failure: PartialFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub scheduled: bool,
    pub push: bool,
    pub manual: bool,
    /// Name of the env var holding the push-webhook HMAC secret
    pub push_secret_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Upper bound on concurrent item fetches within one Run
    pub fetch_concurrency: usize,
    /// Name of the env var holding the bearer token, if the source needs one
    pub auth_token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub auth_token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory holding snapshots, the head record, and the commit log
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    pub log_level: String,
}

impl Settings {
    /// Load configuration with layered precedence: defaults file → local
    /// overrides → `APP__`-prefixed environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings; called as part of `load`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job.name.is_empty() {
            return Err(ConfigError::Invalid("Job name cannot be empty".into()));
        }

        // Parsing is the validation: this rejects malformed expressions and
        // unknown timezones before any trigger can fire.
        JobSchedule::parse(&self.job.schedule, &self.job.timezone, self.job.enabled)?;

        if self.job.max_run_seconds == 0 {
            return Err(ConfigError::Invalid(
                "Job max_run_seconds must be greater than 0".into(),
            ));
        }

        if !self.triggers.scheduled && !self.triggers.push && !self.triggers.manual {
            return Err(ConfigError::Invalid(
                "At least one trigger kind must be enabled".into(),
            ));
        }
        if self.triggers.push && self.triggers.push_secret_env.is_none() {
            return Err(ConfigError::Invalid(
                "Push trigger requires push_secret_env to be set".into(),
            ));
        }

        if self.source.base_url.is_empty() {
            return Err(ConfigError::Invalid("Source base_url cannot be empty".into()));
        }
        if self.source.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "Source fetch_concurrency must be greater than 0".into(),
            ));
        }
        if self.source.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "Source timeout_seconds must be greater than 0".into(),
            ));
        }

        if self.enricher.enabled && self.enricher.endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "Enricher endpoint cannot be empty when enricher is enabled".into(),
            ));
        }

        if self.store.data_dir.is_empty() {
            return Err(ConfigError::Invalid("Store data_dir cannot be empty".into()));
        }

        if self.server.port == 0 {
            return Err(ConfigError::Invalid(
                "Server port must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "Retry max_attempts must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Invalid(
                "Retry jitter_factor must be between 0.0 and 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Build the validated schedule from the raw settings
    pub fn job_schedule(&self) -> Result<JobSchedule, ConfigError> {
        JobSchedule::parse(
            &self.job.schedule,
            &self.job.timezone,
            self.job.enabled && self.triggers.scheduled,
        )
    }
}

/// Resolve a named secret from the process environment at Run start.
/// The value is returned as-is and must never be logged or persisted.
pub fn secret_from_env(var_name: &str) -> Result<String, ConfigError> {
    std::env::var(var_name).map_err(|_| ConfigError::MissingSecret(var_name.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            job: JobSettings {
                name: "changegate-sync".to_string(),
                schedule: "0 0 2 * * * *".to_string(),
                timezone: "UTC".to_string(),
                enabled: true,
                max_run_seconds: 1800,
                partial_failure: PartialFailurePolicy::AbortRun,
            },
            triggers: TriggerSettings {
                scheduled: true,
                push: false,
                manual: true,
                push_secret_env: None,
            },
            source: SourceSettings {
                base_url: "http://localhost:9100".to_string(),
                timeout_seconds: 30,
                fetch_concurrency: 8,
                auth_token_env: None,
            },
            enricher: EnricherSettings {
                enabled: false,
                endpoint: String::new(),
                timeout_seconds: 30,
                auth_token_env: None,
            },
            store: StoreSettings {
                data_dir: "./data".to_string(),
            },
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            retry: RetrySettings {
                max_attempts: 3,
                base_delay_secs: 5,
                max_delay_secs: 300,
                jitter_factor: 0.1,
            },
            observability: ObservabilitySettings {
                log_level: "info".to_string(),
            },
        }
    }
}
