//! Error types for sbdk-core

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems. Surfaced immediately, never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file missing
    #[error("Config file not found: {0}. Run 'sbdk init' to create a new project")]
    NotFound(PathBuf),

    /// Config file unreadable or not valid JSON
    #[error("Invalid config file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    /// A path that must be watched does not exist or cannot be watched
    #[error("Cannot watch path {path}: {reason}")]
    Unwatchable { path: PathBuf, reason: String },

    /// Webhook signature validation needs a shared secret
    #[error("Webhook secret is not configured (set SBDK_WEBHOOK_SECRET)")]
    MissingSecret,

    /// Ignore pattern failed to compile
    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Any other invalid setting
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
