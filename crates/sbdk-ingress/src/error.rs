//! Error types for the webhook listener.

use sbdk_core::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngressError {
    /// Missing secret or other unusable settings
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Host and port do not form a socket address
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    /// The listener could not bind or the server stopped with an error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the webhook listener
pub type Result<T> = std::result::Result<T, IngressError>;
