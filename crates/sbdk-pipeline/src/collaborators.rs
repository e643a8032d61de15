//! Collaborator interfaces for the stage runner, with subprocess implementations
//! for producers and loaders.
//!
//! Stage semantics live in [`crate::pipeline::StageRunner`]; collaborators only
//! report what happened. Timeouts are enforced by the runner.

use async_trait::async_trait;
use sbdk_core::CheckResult;
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::Result;
use crate::runner::CommandRunner;
use crate::stage::{CommandSpec, EngineMode};

/// Outcome of one producer pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerReport {
    pub success: bool,
    pub record_count: u64,
    pub error: Option<String>,
}

/// Outcome of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub success: bool,
    pub message: String,
    pub log: Option<String>,
}

/// Outcome of one transformation-engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineReport {
    pub success: bool,
    pub checks: Vec<CheckResult>,
    pub log: Option<String>,
}

impl EngineReport {
    pub fn failed_checks(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

/// A data producer (one dlt pipeline).
#[async_trait]
pub trait ProducerPipeline: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<ProducerReport>;
}

/// Moves produced data into the database.
#[async_trait]
pub trait DataLoader: Send + Sync {
    async fn load(&self) -> Result<LoadReport>;
}

/// Builds and checks derived models (dbt).
#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// Whether [`EngineMode::DryRun`] is available.
    fn supports_dry_run(&self) -> bool {
        false
    }

    async fn invoke(&self, mode: EngineMode) -> Result<EngineReport>;
}

/// Producer that runs a command and reads its record count from stdout.
pub struct CommandProducer {
    spec: CommandSpec,
}

#[derive(Deserialize)]
struct RecordCountLine {
    record_count: u64,
}

impl CommandProducer {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

/// Last `{"record_count": N}` line in `stdout`, or 0.
pub fn parse_record_count(stdout: &str) -> u64 {
    stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<RecordCountLine>(line.trim()).ok())
        .map(|line| line.record_count)
        .unwrap_or(0)
}

#[async_trait]
impl ProducerPipeline for CommandProducer {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn run(&self) -> Result<ProducerReport> {
        let output = CommandRunner::execute(&self.spec).await?;
        if output.passed() {
            Ok(ProducerReport {
                success: true,
                record_count: parse_record_count(&output.stdout),
                error: None,
            })
        } else {
            Ok(ProducerReport {
                success: false,
                record_count: 0,
                error: Some(format!("exit code {}: {}", output.exit_code, output.tail())),
            })
        }
    }
}

/// Loader that runs an explicit load command.
pub struct CommandLoader {
    spec: CommandSpec,
}

impl CommandLoader {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl DataLoader for CommandLoader {
    async fn load(&self) -> Result<LoadReport> {
        let output = CommandRunner::execute(&self.spec).await?;
        let message = if output.passed() {
            format!("{} completed", self.spec.name)
        } else {
            format!("{} exited with code {}", self.spec.name, output.exit_code)
        };
        Ok(LoadReport {
            success: output.passed(),
            message,
            log: Some(output.tail()),
        })
    }
}

/// Loader for producers that write the database themselves: Load verifies
/// that the database file exists.
pub struct DatabaseProbeLoader {
    path: PathBuf,
}

impl DatabaseProbeLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataLoader for DatabaseProbeLoader {
    async fn load(&self) -> Result<LoadReport> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(LoadReport {
                success: true,
                message: format!("database ready at {} ({} bytes)", self.path.display(), meta.len()),
                log: None,
            }),
            Ok(_) => Ok(LoadReport {
                success: false,
                message: format!("{} is not a file", self.path.display()),
                log: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LoadReport {
                success: false,
                message: format!("database not found at {}", self.path.display()),
                log: None,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
