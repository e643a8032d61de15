//! dbt as the transformation engine.
//!
//! dbt is invoked with `--log-format json`; per-test results are read from
//! `LogTestResult` log lines. dbt exit codes: 0 success, 1 model or test
//! failures, 2 the invocation itself failed. Building models (run or
//! compile) first runs `dbt deps` when the project declares packages.

use async_trait::async_trait;
use sbdk_core::CheckResult;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use crate::collaborators::{EngineReport, TransformEngine};
use crate::error::{CollaboratorError, Result};
use crate::runner::CommandRunner;
use crate::stage::{CommandSpec, EngineMode};

const EXIT_HANDLED_FAILURE: i32 = 1;

/// Files declaring dbt packages.
const PACKAGE_FILES: [&str; 2] = ["packages.yml", "dependencies.yml"];

#[derive(Debug, Clone)]
pub struct DbtEngine {
    executable: String,
    project_dir: PathBuf,
    profiles_dir: PathBuf,
    target: Option<String>,
}

impl DbtEngine {
    pub fn new(
        executable: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        profiles_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable: executable.into(),
            project_dir: absolute(project_dir.into()),
            profiles_dir: absolute(profiles_dir.into()),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Command line for one mode.
    pub fn command(&self, mode: EngineMode) -> CommandSpec {
        self.invocation(mode.dbt_subcommand(), true)
    }

    /// Whether the project declares packages that `dbt deps` must install.
    pub fn needs_deps(&self) -> bool {
        PACKAGE_FILES
            .iter()
            .any(|file| self.project_dir.join(file).is_file())
    }

    /// Install declared packages. Any nonzero exit is an error.
    pub async fn install_deps(&self) -> Result<()> {
        let spec = self.invocation("deps", false);
        let output = CommandRunner::execute(&spec).await?;
        debug!(exit_code = output.exit_code, "dbt deps finished");
        if output.passed() {
            return Ok(());
        }
        Err(CollaboratorError::Failed {
            name: spec.name,
            exit_code: output.exit_code,
            detail: output.tail(),
        })
    }

    fn invocation(&self, subcommand: &str, with_target: bool) -> CommandSpec {
        let mut command = vec![
            self.executable.clone(),
            subcommand.to_string(),
            "--project-dir".to_string(),
            self.project_dir.display().to_string(),
            "--profiles-dir".to_string(),
            self.profiles_dir.display().to_string(),
            "--log-format".to_string(),
            "json".to_string(),
        ];
        if let (true, Some(target)) = (with_target, &self.target) {
            command.push("--target".to_string());
            command.push(target.clone());
        }
        CommandSpec::new(format!("dbt {}", subcommand), command).in_dir(&self.project_dir)
    }
}

/// dbt runs inside its project directory, so relative paths would be
/// resolved twice.
fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

#[derive(Deserialize)]
struct LogLine {
    info: LogInfo,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct LogInfo {
    name: String,
    #[serde(default)]
    msg: String,
}

/// Extract per-test results from dbt's JSON log output.
///
/// `pass`, `warn` and `skipped` count as passing; `fail` and `error` do not.
pub fn parse_test_results(log: &str) -> Vec<CheckResult> {
    log.lines()
        .filter_map(|line| serde_json::from_str::<LogLine>(line.trim()).ok())
        .filter(|line| line.info.name == "LogTestResult")
        .filter_map(|line| {
            let name = line.data.get("name")?.as_str()?.to_string();
            let status = line.data.get("status")?.as_str()?.to_ascii_lowercase();
            let passed = !matches!(status.as_str(), "fail" | "error");
            let message = if passed {
                None
            } else {
                Some(if line.info.msg.is_empty() {
                    status
                } else {
                    line.info.msg
                })
            };
            Some(CheckResult {
                name,
                passed,
                message,
            })
        })
        .collect()
}

#[async_trait]
impl TransformEngine for DbtEngine {
    fn supports_dry_run(&self) -> bool {
        true
    }

    async fn invoke(&self, mode: EngineMode) -> Result<EngineReport> {
        if mode != EngineMode::Test && self.needs_deps() {
            self.install_deps().await?;
        }
        let spec = self.command(mode);
        let output = CommandRunner::execute(&spec).await?;
        let checks = if mode == EngineMode::Test {
            parse_test_results(&output.stdout)
        } else {
            Vec::new()
        };
        debug!(
            mode = %mode,
            exit_code = output.exit_code,
            checks = checks.len(),
            "dbt finished"
        );

        if output.passed() {
            return Ok(EngineReport {
                success: true,
                checks,
                log: None,
            });
        }
        if output.exit_code == EXIT_HANDLED_FAILURE {
            return Ok(EngineReport {
                success: false,
                checks,
                log: Some(output.tail()),
            });
        }
        Err(CollaboratorError::Failed {
            name: spec.name,
            exit_code: output.exit_code,
            detail: output.tail(),
        })
    }
}
