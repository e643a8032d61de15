//! Stage runner: executes Generate, Load, Transform and Test for one trigger.
//!
//! Failure policy:
//! - Generate, Load, Transform: any failure, error or timeout is a hard failure.
//! - Test: failing checks or a timeout are a soft failure; a harness error
//!   (tests could not run, or failed without reporting any check) is hard.
//!
//! The runner stops at the first hard failure, so the outcome list is always
//! a prefix of the stage order.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use sbdk_core::config::{ProjectConfig, StageTimeouts, TestOnlyPolicy};
use sbdk_core::obs;
use sbdk_core::{
    BuildExecutor, BuildResult, BuildScope, ProducerSummary, Stage, StageDetails, StageOutcome,
    StageStatus, TriggerRequest,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Instrument};

use crate::collaborators::{
    CommandLoader, CommandProducer, DataLoader, DatabaseProbeLoader, EngineReport,
    ProducerPipeline, ProducerReport, TransformEngine,
};
use crate::dbt::DbtEngine;
use crate::error::{CollaboratorError, Result};
use crate::stage::{CommandSpec, EngineMode};

/// Runs one build against a fixed set of collaborators.
pub struct StageRunner {
    producers: Vec<Arc<dyn ProducerPipeline>>,
    loader: Arc<dyn DataLoader>,
    engine: Arc<dyn TransformEngine>,
    timeouts: StageTimeouts,
    test_only_policy: TestOnlyPolicy,
}

impl StageRunner {
    pub fn new(
        producers: Vec<Arc<dyn ProducerPipeline>>,
        loader: Arc<dyn DataLoader>,
        engine: Arc<dyn TransformEngine>,
    ) -> Self {
        Self {
            producers,
            loader,
            engine,
            timeouts: StageTimeouts::default(),
            test_only_policy: TestOnlyPolicy::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_test_only_policy(mut self, policy: TestOnlyPolicy) -> Self {
        self.test_only_policy = policy;
        self
    }

    /// Wire subprocess collaborators from the project configuration.
    ///
    /// Producers run in the project root, dbt in the dbt project directory.
    pub fn from_config(config: &ProjectConfig) -> Self {
        let settings = &config.pipelines;

        let producers = settings
            .producers
            .iter()
            .map(|name| {
                let spec = CommandSpec::new(name.clone(), settings.producer_command(name))
                    .in_dir(&config.root);
                Arc::new(CommandProducer::new(spec)) as Arc<dyn ProducerPipeline>
            })
            .collect();

        let loader: Arc<dyn DataLoader> = match &settings.load_command {
            Some(command) => Arc::new(CommandLoader::new(
                CommandSpec::new("load", command.clone()).in_dir(&config.root),
            )),
            None => Arc::new(DatabaseProbeLoader::new(config.duckdb_path())),
        };

        let engine = DbtEngine::new(
            settings.dbt_executable.clone(),
            config.dbt_path(),
            config.profiles_dir(),
        )
        .with_target(config.target.clone());

        Self::new(producers, loader, Arc::new(engine))
            .with_timeouts(config.timeouts)
            .with_test_only_policy(config.webhook.test_only_policy)
    }

    /// Run every stage in the trigger's scope. Never fails: collaborator
    /// errors become outcomes.
    pub async fn run(&self, trigger: TriggerRequest) -> BuildResult {
        let span = obs::build_span(&trigger);
        self.run_stages(trigger).instrument(span).await
    }

    async fn run_stages(&self, trigger: TriggerRequest) -> BuildResult {
        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(Stage::ORDER.len());
        let scope = trigger.scope();

        for stage in Stage::ORDER {
            if !scope.includes(stage) {
                info!(stage = %stage, scope = scope.as_str(), "outside build scope, stopping");
                break;
            }
            let clock = Instant::now();
            let (status, details) = match stage {
                Stage::Generate => self.generate().await,
                Stage::Load => self.load().await,
                Stage::Transform => self.transform(scope).await,
                Stage::Test => self.test().await,
            };
            let outcome = StageOutcome::new(stage, status, clock.elapsed().as_millis() as u64, details);
            obs::emit_stage_finished(&outcome);

            let stop = outcome.is_hard_failure();
            outcomes.push(outcome);
            if stop {
                info!(stage = %stage, "hard failure, skipping remaining stages");
                break;
            }
        }

        BuildResult::new(trigger, outcomes, started_at, Utc::now())
    }

    async fn generate(&self) -> (StageStatus, StageDetails) {
        if self.producers.is_empty() {
            return (
                StageStatus::Success,
                StageDetails::message("no producers configured"),
            );
        }

        let limit = self.timeouts.generate();
        let runs = self.producers.iter().map(|producer| {
            let name = producer.name().to_string();
            let producer = Arc::clone(producer);
            async move {
                let report = bounded(&name, limit, producer.run()).await;
                summarize_producer(name, report)
            }
        });
        let producers: Vec<ProducerSummary> = join_all(runs).await;

        let failed: Vec<&str> = producers
            .iter()
            .filter(|p| !p.success)
            .map(|p| p.name.as_str())
            .collect();
        let records: u64 = producers.iter().map(|p| p.record_count).sum();

        let (status, message) = if failed.is_empty() {
            (
                StageStatus::Success,
                format!("{} producers, {} records", producers.len(), records),
            )
        } else {
            (
                StageStatus::HardFailure,
                format!("producer(s) failed: {}", failed.join(", ")),
            )
        };
        let excerpt = producers
            .iter()
            .filter_map(|p| p.error.as_ref().map(|e| format!("{}: {}", p.name, e)))
            .collect::<Vec<_>>()
            .join("\n");

        (
            status,
            StageDetails::message(message)
                .with_producers(producers)
                .with_log_excerpt(Some(excerpt)),
        )
    }

    async fn load(&self) -> (StageStatus, StageDetails) {
        match bounded("load", self.timeouts.load(), self.loader.load()).await {
            Ok(report) if report.success => (
                StageStatus::Success,
                StageDetails::message(report.message),
            ),
            Ok(report) => (
                StageStatus::HardFailure,
                StageDetails::message(report.message).with_log_excerpt(report.log),
            ),
            Err(e) => (StageStatus::HardFailure, StageDetails::message(e.to_string())),
        }
    }

    /// Engine mode for the Transform stage.
    pub fn transform_mode(&self, scope: BuildScope) -> EngineMode {
        match (scope, self.test_only_policy) {
            (BuildScope::TestOnly, TestOnlyPolicy::DryRunTransform)
                if self.engine.supports_dry_run() =>
            {
                EngineMode::DryRun
            }
            _ => EngineMode::Run,
        }
    }

    async fn transform(&self, scope: BuildScope) -> (StageStatus, StageDetails) {
        let mode = self.transform_mode(scope);
        let limit = self.timeouts.transform();
        match bounded("transform", limit, self.engine.invoke(mode)).await {
            Ok(report) if report.success => (
                StageStatus::Success,
                StageDetails::message(format!("models built ({})", mode)),
            ),
            Ok(report) => (
                StageStatus::HardFailure,
                StageDetails::message(format!("transform failed ({})", mode))
                    .with_log_excerpt(report.log),
            ),
            Err(e) => (StageStatus::HardFailure, StageDetails::message(e.to_string())),
        }
    }

    async fn test(&self) -> (StageStatus, StageDetails) {
        let limit = self.timeouts.test();
        match bounded("test", limit, self.engine.invoke(EngineMode::Test)).await {
            Ok(report) => classify_test_report(report),
            Err(e) if e.is_timeout() => (StageStatus::SoftFailure, StageDetails::message(e.to_string())),
            Err(e) => (
                StageStatus::HardFailure,
                StageDetails::message(format!("could not run tests: {}", e)),
            ),
        }
    }
}

fn classify_test_report(report: EngineReport) -> (StageStatus, StageDetails) {
    let total = report.checks.len();
    let failed = report.failed_checks();

    if report.success && failed == 0 {
        return (
            StageStatus::Success,
            StageDetails::message(format!("{} checks passed", total)).with_checks(report.checks),
        );
    }
    if failed > 0 {
        return (
            StageStatus::SoftFailure,
            StageDetails::message(format!("{} of {} checks failed", failed, total))
                .with_checks(report.checks)
                .with_log_excerpt(report.log),
        );
    }
    (
        StageStatus::HardFailure,
        StageDetails::message("tests failed without reporting any check results")
            .with_checks(report.checks)
            .with_log_excerpt(report.log),
    )
}

fn summarize_producer(name: String, report: Result<ProducerReport>) -> ProducerSummary {
    match report {
        Ok(report) => ProducerSummary {
            name,
            success: report.success,
            record_count: report.record_count,
            error: report.error,
        },
        Err(e) => ProducerSummary {
            name,
            success: false,
            record_count: 0,
            error: Some(e.to_string()),
        },
    }
}

/// Await `fut`, turning an overrun of `limit` into [`CollaboratorError::TimedOut`].
async fn bounded<T, F>(name: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::TimedOut {
            name: name.to_string(),
            limit,
        }),
    }
}

#[async_trait]
impl BuildExecutor for StageRunner {
    async fn execute(&self, trigger: TriggerRequest) -> BuildResult {
        self.run(trigger).await
    }
}
