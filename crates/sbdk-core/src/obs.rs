//! Structured observability hooks for the build lifecycle.
//!
//! Every event carries a stable `event` field so JSON log consumers can
//! filter on it (`sbdk --json ...`).

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{BuildResult, StageOutcome, TriggerRequest};

/// Build-scoped span. Attach it with `tracing::Instrument` so it follows
/// the build across await points.
pub fn build_span(trigger: &TriggerRequest) -> tracing::Span {
    tracing::info_span!(
        "sbdk.build",
        trigger_id = %trigger.id,
        source = %trigger.source,
        scope = ?trigger.scope(),
    )
}

/// A trigger was handed to the coordinator.
pub fn emit_trigger_submitted(trigger: &TriggerRequest, disposition: &str) {
    info!(
        event = "trigger.submitted",
        trigger_id = %trigger.id,
        source = %trigger.source,
        disposition = disposition,
    );
}

/// A queued trigger was replaced by a newer one before it ran.
pub fn emit_trigger_superseded(superseded: Uuid, by: Uuid) {
    info!(event = "trigger.superseded", superseded = %superseded, by = %by);
}

pub fn emit_build_started(trigger: &TriggerRequest) {
    info!(
        event = "build.started",
        trigger_id = %trigger.id,
        source = %trigger.source,
        reason = %trigger.describe(),
    );
}

pub fn emit_stage_finished(outcome: &StageOutcome) {
    info!(
        event = "stage.finished",
        stage = %outcome.stage,
        status = ?outcome.status,
        duration_ms = outcome.duration_ms,
        message = %outcome.details.message,
    );
}

pub fn emit_build_finished(result: &BuildResult) {
    info!(
        event = "build.finished",
        trigger_id = %result.trigger.id,
        status = %result.overall_status,
        stages = result.outcomes.len(),
        duration_ms = result.duration_ms(),
    );
}

/// The build task panicked; the coordinator recovered and moved on.
pub fn emit_build_aborted(trigger: &TriggerRequest, error: &dyn std::fmt::Display) {
    warn!(event = "build.aborted", trigger_id = %trigger.id, error = %error);
}

/// The change detector closed a debounce window.
pub fn emit_watch_trigger(trigger: &TriggerRequest, path_count: usize) {
    info!(
        event = "watch.trigger",
        trigger_id = %trigger.id,
        paths = path_count,
    );
}

/// A webhook delivery was classified.
pub fn emit_webhook_received(event_kind: &str, delivery_id: Option<&str>, verdict: &str) {
    info!(
        event = "webhook.received",
        event_kind = event_kind,
        delivery_id = delivery_id.unwrap_or("-"),
        verdict = verdict,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_span_enter() {
        let span = build_span(&TriggerRequest::manual());
        let _guard = span.enter();
    }
}
