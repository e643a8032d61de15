//! Error types for change detection.

use sbdk_core::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal change-detector errors. After yielding one of these the detector
/// produces nothing more.
#[derive(Error, Debug)]
pub enum WatchError {
    /// A configured root did not exist when watching started
    #[error("watch root {0} does not exist")]
    RootMissing(PathBuf),

    /// A configured root disappeared while being watched
    #[error("watch root {0} disappeared")]
    RootVanished(PathBuf),

    /// An ignore pattern is not a valid glob
    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The OS watcher failed
    #[error("filesystem watcher error: {0}")]
    Backend(String),
}

impl From<notify::Error> for WatchError {
    fn from(err: notify::Error) -> Self {
        WatchError::Backend(err.to_string())
    }
}

/// Every watch failure is a configuration problem at the CLI boundary.
impl From<WatchError> for ConfigError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::RootMissing(path) => ConfigError::Unwatchable {
                path,
                reason: "does not exist".to_string(),
            },
            WatchError::RootVanished(path) => ConfigError::Unwatchable {
                path,
                reason: "disappeared while watching".to_string(),
            },
            WatchError::InvalidPattern { pattern, reason } => {
                ConfigError::InvalidPattern { pattern, reason }
            }
            WatchError::Backend(reason) => ConfigError::Unwatchable {
                path: PathBuf::new(),
                reason,
            },
        }
    }
}

/// Result type for change detection
pub type Result<T> = std::result::Result<T, WatchError>;
