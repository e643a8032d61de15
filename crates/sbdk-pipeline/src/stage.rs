//! Command definitions for subprocess collaborators.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Operating mode for the transformation engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Build models (`dbt run`).
    Run,

    /// Run data-quality checks (`dbt test`).
    Test,

    /// Validate models without writing (`dbt compile`).
    DryRun,
}

impl EngineMode {
    pub fn name(&self) -> &'static str {
        match self {
            EngineMode::Run => "run",
            EngineMode::Test => "test",
            EngineMode::DryRun => "dry_run",
        }
    }

    /// dbt subcommand implementing this mode.
    pub fn dbt_subcommand(&self) -> &'static str {
        match self {
            EngineMode::Run => "run",
            EngineMode::Test => "test",
            EngineMode::DryRun => "compile",
        }
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A command to run as one collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Human-readable name used in logs and errors.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory. Inherits the current one when unset.
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
        }
    }

    /// Run the command inside `dir`.
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// The command line as a single display string.
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_mode_subcommands() {
        assert_eq!(EngineMode::Run.dbt_subcommand(), "run");
        assert_eq!(EngineMode::Test.dbt_subcommand(), "test");
        assert_eq!(EngineMode::DryRun.dbt_subcommand(), "compile");
    }

    #[test]
    fn test_command_spec_in_dir() {
        let spec = CommandSpec::new("users", vec!["echo".to_string(), "hi".to_string()])
            .in_dir("/tmp/project");
        assert_eq!(spec.name, "users");
        assert_eq!(spec.working_dir, Some(PathBuf::from("/tmp/project")));
        assert_eq!(spec.display(), "echo hi");
    }
}
