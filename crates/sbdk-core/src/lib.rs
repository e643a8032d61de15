//! SBDK Core Library
//!
//! Domain model, project configuration, the build coordinator and result
//! reporting shared by the watcher, the webhook listener and the CLI.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod obs;
pub mod reporter;
pub mod telemetry;

pub use config::{
    PipelineSettings, ProjectConfig, StageTimeouts, TestOnlyPolicy, WatchSettings,
    WebhookSettings, CONFIG_FILE_NAME,
};

pub use coordinator::{
    BuildCoordinator, BuildEvent, BuildExecutor, BuildState, CoordinatorError, ResultSink,
    SubmitDisposition, SubmitReceipt,
};

pub use domain::{
    BuildResult, BuildScope, CheckResult, IngressDisposition, OverallStatus, ProducerSummary,
    RejectReason, Stage, StageDetails, StageOutcome, StageStatus, TriggerPayload,
    TriggerRequest, TriggerSource,
};

pub use error::{ConfigError, Result};

pub use reporter::{exit_code, render_console, webhook_ack, ReportSink, Reporter, WebhookAck};

pub use telemetry::init_tracing;
