//! Domain model for the SBDK orchestrator.
//!
//! - `TriggerRequest`: a request to rebuild, from any source
//! - `StageOutcome` / `BuildResult`: what one build produced
//! - `IngressDisposition`: the webhook ingress verdict on one delivery

pub mod build;
pub mod ingress;
pub mod trigger;

pub use build::{
    BuildResult, CheckResult, OverallStatus, ProducerSummary, Stage, StageDetails, StageOutcome,
    StageStatus,
};
pub use ingress::{IngressDisposition, RejectReason};
pub use trigger::{BuildScope, TriggerPayload, TriggerRequest, TriggerSource};
