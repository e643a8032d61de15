//! Stage outcomes and build results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::trigger::TriggerRequest;

/// The fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Load,
    Transform,
    Test,
}

impl Stage {
    /// Every stage, in the only order they ever run.
    pub const ORDER: [Stage; 4] = [Stage::Generate, Stage::Load, Stage::Transform, Stage::Test];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Load => "load",
            Stage::Transform => "transform",
            Stage::Test => "test",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result classification for one stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    /// Reported, but the pipeline continues.
    SoftFailure,
    /// Aborts every later stage.
    HardFailure,
}

/// Result of a single data-quality check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

/// Per-producer summary recorded by the Generate stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProducerSummary {
    pub name: String,
    pub success: bool,
    pub record_count: u64,
    pub error: Option<String>,
}

/// Structured details attached to a stage outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StageDetails {
    /// One-line summary.
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub producers: Vec<ProducerSummary>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<CheckResult>,

    /// Tail of collaborator output, if any was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_excerpt: Option<String>,
}

impl StageDetails {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_producers(mut self, producers: Vec<ProducerSummary>) -> Self {
        self.producers = producers;
        self
    }

    pub fn with_checks(mut self, checks: Vec<CheckResult>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_log_excerpt(mut self, excerpt: Option<String>) -> Self {
        self.log_excerpt = excerpt.filter(|s| !s.trim().is_empty());
        self
    }

    /// Names of the checks that did not pass.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Outcome of one attempted stage. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
    pub details: StageDetails,
}

impl StageOutcome {
    pub fn new(stage: Stage, status: StageStatus, duration_ms: u64, details: StageDetails) -> Self {
        Self {
            stage,
            status,
            duration_ms,
            details,
        }
    }

    pub fn is_hard_failure(&self) -> bool {
        self.status == StageStatus::HardFailure
    }
}

/// Overall classification of a build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    /// Usable, but at least one stage soft-failed.
    Degraded,
    Failed,
}

impl OverallStatus {
    /// Pure function of the outcome sequence.
    ///
    /// `Failed` if any outcome is a hard failure, else `Degraded` if any is a
    /// soft failure, else `Success`.
    pub fn from_outcomes(outcomes: &[StageOutcome]) -> Self {
        if outcomes.iter().any(|o| o.status == StageStatus::HardFailure) {
            OverallStatus::Failed
        } else if outcomes.iter().any(|o| o.status == StageStatus::SoftFailure) {
            OverallStatus::Degraded
        } else {
            OverallStatus::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Success => "success",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one build. Owned by whoever requested it; immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildResult {
    pub trigger: TriggerRequest,
    pub outcomes: Vec<StageOutcome>,
    pub overall_status: OverallStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildResult {
    /// Assemble a result, deriving the overall status from `outcomes`.
    pub fn new(
        trigger: TriggerRequest,
        outcomes: Vec<StageOutcome>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let overall_status = OverallStatus::from_outcomes(&outcomes);
        Self {
            trigger,
            outcomes,
            overall_status,
            started_at,
            finished_at,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    /// Stage statuses in order, for comparing builds independent of timing.
    pub fn statuses(&self) -> Vec<(Stage, StageStatus)> {
        self.outcomes.iter().map(|o| (o.stage, o.status)).collect()
    }

    /// Check the structural invariants: outcomes follow the fixed stage
    /// order without gaps, and a hard failure can only be the last entry.
    pub fn is_well_formed(&self) -> bool {
        if self.outcomes.len() > Stage::ORDER.len() {
            return false;
        }
        let ordered = self
            .outcomes
            .iter()
            .zip(Stage::ORDER.iter())
            .all(|(o, expected)| o.stage == *expected);
        let hard_last = self
            .outcomes
            .iter()
            .position(StageOutcome::is_hard_failure)
            .map_or(true, |i| i == self.outcomes.len() - 1);
        ordered && hard_last && self.overall_status == OverallStatus::from_outcomes(&self.outcomes)
    }
}
