//! # Configuration
//!
//! Layered configuration for the orchestration system: compiled-in defaults,
//! an optional `config/eventflow.toml`, then `EVENTFLOW__`-prefixed
//! environment variables (double underscore as the section separator, e.g.
//! `EVENTFLOW__DATABASE__URL`). Loaded values are range-checked with
//! `validator` before use.

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{EventFlowError, EventFlowResult};

const ENV_PREFIX: &str = "EVENTFLOW";
const ENV_SEPARATOR: &str = "__";

/// Default queue every orchestrator task is dispatched to
pub const DEFAULT_QUEUE_NAME: &str = "evaluation_queue";

/// Top-level configuration for orchestration, store, and worker components
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EventFlowConfig {
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub messaging: MessagingConfig,
    #[validate(nested)]
    pub worker: WorkerConfig,
    #[validate(nested)]
    pub retry: RetryConfig,
}

impl Default for EventFlowConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            messaging: MessagingConfig::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub url: String,
    #[validate(range(min = 1, max = 200))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/eventflow".to_string()),
            max_connections: 10,
        }
    }
}

/// Task-queue settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MessagingConfig {
    #[validate(length(min = 1))]
    pub queue_name: String,
    /// How long a received message stays invisible to other workers
    #[validate(range(min = 1))]
    pub visibility_timeout_secs: u64,
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: u32,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            visibility_timeout_secs: 30,
            batch_size: 10,
        }
    }
}

/// Worker loop and flow-hydration settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    /// Attempts to resolve a flow record that is not yet visible to this worker
    #[validate(range(min = 1, max = 10))]
    pub flow_lookup_max_retries: u32,
    /// Base delay for the flow-lookup backoff; doubles per attempt
    pub flow_lookup_base_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            flow_lookup_max_retries: 3,
            flow_lookup_base_delay_ms: 1000,
        }
    }
}

/// Redelivery policy for rate-limited processor failures
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryConfig {
    /// Base redelivery delay; doubles per attempt
    pub base_delay_secs: u64,
    /// Redelivery delay cap
    pub max_delay_secs: u64,
    /// Total execution attempts before the failure turns fatal
    #[validate(range(min = 1, max = 50))]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 10,
            max_delay_secs: 600,
            max_attempts: 5,
        }
    }
}

impl EventFlowConfig {
    /// Load configuration from defaults, `config/eventflow.toml` (optional),
    /// and `EVENTFLOW__*` environment variables.
    pub fn load() -> EventFlowResult<Self> {
        dotenvy::dotenv().ok();
        Self::build(config::File::with_name("config/eventflow").required(false))
    }

    /// Load configuration with an explicit file path instead of the default
    /// lookup. The file must exist.
    pub fn load_from(path: &Path) -> EventFlowResult<Self> {
        dotenvy::dotenv().ok();
        Self::build(config::File::from(path))
    }

    fn build(file: config::File<config::FileSourceFile, config::FileFormat>) -> EventFlowResult<Self> {
        let defaults = config::Config::try_from(&EventFlowConfig::default())
            .map_err(|e| EventFlowError::Configuration(e.to_string()))?;

        let merged = config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()
            .map_err(|e| EventFlowError::Configuration(e.to_string()))?;

        let loaded: EventFlowConfig = merged
            .try_deserialize()
            .map_err(|e| EventFlowError::Configuration(e.to_string()))?;

        loaded
            .validate()
            .map_err(|e| EventFlowError::Configuration(e.to_string()))?;

        Ok(loaded)
    }

    /// Configuration tuned for hermetic tests: in-memory friendly timings,
    /// no redelivery delay.
    pub fn for_testing() -> Self {
        Self {
            database: DatabaseConfig::default(),
            messaging: MessagingConfig {
                queue_name: DEFAULT_QUEUE_NAME.to_string(),
                visibility_timeout_secs: 30,
                batch_size: 10,
            },
            worker: WorkerConfig {
                poll_interval_ms: 1,
                flow_lookup_max_retries: 3,
                flow_lookup_base_delay_ms: 1,
            },
            retry: RetryConfig {
                base_delay_secs: 0,
                max_delay_secs: 0,
                max_attempts: 5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EventFlowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.messaging.queue_name, "evaluation_queue");
        assert_eq!(config.retry.base_delay_secs, 10);
        assert_eq!(config.retry.max_delay_secs, 600);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.worker.flow_lookup_max_retries, 3);
    }

    #[test]
    #[serial]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            r#"
[messaging]
queue_name = "scoring_queue"
batch_size = 25

[retry]
max_attempts = 7
"#
        )
        .expect("write config");

        let config = EventFlowConfig::load_from(file.path()).expect("load");
        assert_eq!(config.messaging.queue_name, "scoring_queue");
        assert_eq!(config.messaging.batch_size, 25);
        assert_eq!(config.retry.max_attempts, 7);
        // Untouched sections keep their defaults
        assert_eq!(config.worker.poll_interval_ms, 500);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        std::env::set_var("EVENTFLOW__MESSAGING__QUEUE_NAME", "env_queue");

        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "[messaging]\nqueue_name = \"file_queue\"").expect("write config");

        let config = EventFlowConfig::load_from(file.path()).expect("load");
        std::env::remove_var("EVENTFLOW__MESSAGING__QUEUE_NAME");

        assert_eq!(config.messaging.queue_name, "env_queue");
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(file, "[messaging]\nbatch_size = 0").expect("write config");

        let err = EventFlowConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, EventFlowError::Configuration(_)));
    }

    #[test]
    fn test_testing_profile_has_no_redelivery_delay() {
        let config = EventFlowConfig::for_testing();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.base_delay_secs, 0);
        assert_eq!(config.worker.flow_lookup_base_delay_ms, 1);
    }
}
