//! Subprocess execution for collaborator commands.

use crate::error::{CollaboratorError, Result};
use crate::stage::CommandSpec;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Lines of output kept for log excerpts.
const EXCERPT_LINES: usize = 20;

/// Result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Command name.
    pub name: String,

    /// Exit code (0 = success, -1 = killed by signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the process exited successfully.
    pub success: bool,
}

impl CommandOutput {
    /// Whether this command passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last lines of stderr, falling back to stdout when stderr is empty.
    pub fn tail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail_lines(source, EXCERPT_LINES)
    }
}

pub(crate) fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Runs collaborator commands.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a command and capture its output.
    ///
    /// The child is killed if the returned future is dropped, so a caller's
    /// `tokio::time::timeout` also stops the process.
    pub async fn execute(spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();

        let (exe, args) = spec
            .command
            .split_first()
            .ok_or_else(|| CollaboratorError::EmptyCommand(spec.name.clone()))?;

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        debug!(name = %spec.name, command = %spec.display(), "spawning collaborator");
        let child = command.spawn().map_err(|source| CollaboratorError::Spawn {
            program: exe.clone(),
            source,
        })?;
        let output = child.wait_with_output().await?;

        Ok(CommandOutput {
            name: spec.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }
}
