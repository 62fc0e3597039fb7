//! Configuration management for TenderWatch services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Batch ingestion configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Watchlist matching configuration
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Document pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// AI collaborator configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// Outbound signal queues (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply pending migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Items of one batch merged concurrently
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Fresh-read retries after losing an identity race
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    #[serde(default = "default_base_score")]
    pub base_score: i32,

    /// Added per matching keyword beyond the first
    #[serde(default = "default_extra_keyword_bonus")]
    pub extra_keyword_bonus: i32,

    #[serde(default = "default_title_bonus")]
    pub title_bonus: i32,

    /// Added when a CPV prefix of 4+ digits matched
    #[serde(default = "default_cpv_precision_bonus")]
    pub cpv_precision_bonus: i32,

    #[serde(default = "default_max_score")]
    pub max_score: i32,

    /// Timeout for one external translation call
    #[serde(default = "default_translation_timeout_ms")]
    pub translation_timeout_ms: u64,

    /// Total attempts per cache miss, including the first
    #[serde(default = "default_translation_attempts")]
    pub translation_attempts: u32,

    /// Languages kept in the translation cache
    #[serde(default = "default_translation_languages")]
    pub translation_languages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_secs: u64,

    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_secs: u64,

    /// Attempts per stage before the document is left in its failed state
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Downloads larger than this are rejected
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,

    /// Documents picked up per polling round
    #[serde(default = "default_pipeline_batch_size")]
    pub batch_size: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Documents processed concurrently
    #[serde(default = "default_pipeline_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    /// AI provider: openai, mock
    #[serde(default = "default_ai_provider")]
    pub provider: String,

    /// API key for the AI service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,

    /// Input truncation for summaries and analyses
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS queue consumed by the search indexer
    pub reindex_queue_url: Option<String>,

    /// SQS queue consumed by the notification digester
    pub match_queue_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_run_migrations() -> bool { true }
fn default_worker_pool_size() -> usize { 8 }
fn default_conflict_retries() -> u32 { 1 }
fn default_base_score() -> i32 { 100 }
fn default_extra_keyword_bonus() -> i32 { 20 }
fn default_title_bonus() -> i32 { 10 }
fn default_cpv_precision_bonus() -> i32 { 5 }
fn default_max_score() -> i32 { 200 }
fn default_translation_timeout_ms() -> u64 { 3_000 }
fn default_translation_attempts() -> u32 { 2 }
fn default_translation_languages() -> Vec<String> {
    vec!["fr".to_string(), "nl".to_string(), "en".to_string()]
}
fn default_download_timeout() -> u64 { 60 }
fn default_extraction_timeout() -> u64 { 30 }
fn default_analysis_timeout() -> u64 { 120 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 30_000 }
fn default_max_document_bytes() -> u64 { 50 * 1024 * 1024 }
fn default_pipeline_batch_size() -> u64 { 25 }
fn default_poll_interval() -> u64 { 30 }
fn default_pipeline_concurrency() -> usize { 4 }
fn default_ai_provider() -> String { "openai".to_string() }
fn default_ai_model() -> String { "gpt-4o-mini".to_string() }
fn default_ai_timeout() -> u64 { 60 }
fn default_max_input_chars() -> usize { 24_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "tenderwatch".to_string() }

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            base_score: default_base_score(),
            extra_keyword_bonus: default_extra_keyword_bonus(),
            title_bonus: default_title_bonus(),
            cpv_precision_bonus: default_cpv_precision_bonus(),
            max_score: default_max_score(),
            translation_timeout_ms: default_translation_timeout_ms(),
            translation_attempts: default_translation_attempts(),
            translation_languages: default_translation_languages(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: default_download_timeout(),
            extraction_timeout_secs: default_extraction_timeout(),
            analysis_timeout_secs: default_analysis_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_document_bytes: default_max_document_bytes(),
            batch_size: default_pipeline_batch_size(),
            poll_interval_secs: default_poll_interval(),
            concurrency: default_pipeline_concurrency(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_ai_provider(),
            api_key: None,
            api_base: None,
            model: default_ai_model(),
            timeout_secs: default_ai_timeout(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "postgres://localhost/tenderwatch")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_millis(self.matching.translation_timeout_ms)
    }
}

impl MatchingConfig {
    pub fn translation_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.translation_attempts.max(1),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(self.translation_timeout_ms.max(100)),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/tenderwatch".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: default_run_migrations(),
            },
            ingestion: IngestionConfig::default(),
            matching: MatchingConfig::default(),
            pipeline: PipelineConfig::default(),
            ai: AiConfig::default(),
            queue: QueueConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
