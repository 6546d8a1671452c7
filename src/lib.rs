//! Sumi-Relay: a proxy-rotating crawl orchestrator
//!
//! This crate fetches batches of URLs through a rotating pool of egress
//! proxies, adapting its request rate, retrying stalled fetches with longer
//! timeouts and detecting soft blocks by content fingerprint.

pub mod config;
pub mod crawler;
pub mod output;
pub mod proxy;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Sumi-Relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Render error: {0}")]
    Render(#[from] crawler::RenderError),

    #[error("Proxy provider error: {0}")]
    Provider(#[from] proxy::ProviderError),

    #[error("State error: {0}")]
    State(#[from] state::StateError),

    #[error("Job {job_id} is {status}; cannot {action}")]
    InvalidJobTransition {
        job_id: i64,
        status: state::JobStatus,
        action: &'static str,
    },

    #[error("Invalid job submission: {0}")]
    InvalidSubmission(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Sumi-Relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{JobHandle, JobSubmission, RelayEngine};
pub use state::{JobStatus, RetryStatus};
pub use storage::{JobStore, SharedStore, SqliteJobStore};
