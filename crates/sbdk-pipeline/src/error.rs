//! Error types for collaborator calls.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while invoking an external collaborator.
///
/// The stage runner converts every one of these into a stage outcome; none
/// of them escapes a build.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    /// Command line was empty
    #[error("{0} has an empty command")]
    EmptyCommand(String),

    /// The program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The collaborator did not finish within its stage budget
    #[error("{name} timed out after {}s", .limit.as_secs())]
    TimedOut { name: String, limit: Duration },

    /// The collaborator ran but could not do its job at all
    #[error("{name} failed (exit code {exit_code}): {detail}")]
    Failed {
        name: String,
        exit_code: i32,
        detail: String,
    },

    /// IO error while talking to the child process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CollaboratorError::TimedOut { .. })
    }
}

/// Result type for collaborator calls
pub type Result<T> = std::result::Result<T, CollaboratorError>;
