//! Result reporting for each kind of caller.
//!
//! - Console (manual and file-triggered builds): per-stage lines, summary,
//!   process exit code.
//! - HTTP (webhook-triggered builds): the sender was acknowledged before the
//!   build ran, so the outcome goes out-of-band as a structured log line.
//!   [`webhook_ack`] builds the acknowledgment itself.

use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::coordinator::ResultSink;
use crate::domain::{
    BuildResult, IngressDisposition, OverallStatus, RejectReason, StageStatus, TriggerSource,
};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_BUILD_FAILED: i32 = 1;

/// Where a result is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSink {
    Console,
    HttpResponse,
}

impl ReportSink {
    /// Webhook-triggered builds report over HTTP; everything else to the console.
    pub fn for_source(source: TriggerSource) -> Self {
        match source {
            TriggerSource::Webhook => ReportSink::HttpResponse,
            TriggerSource::Manual | TriggerSource::FileChange => ReportSink::Console,
        }
    }
}

/// Process exit code for a build: nonzero only when it failed.
///
/// Degraded builds exit 0 so automation does not treat data-quality
/// findings as build breakage.
pub fn exit_code(result: &BuildResult) -> i32 {
    match result.overall_status {
        OverallStatus::Success | OverallStatus::Degraded => EXIT_SUCCESS,
        OverallStatus::Failed => EXIT_BUILD_FAILED,
    }
}

/// One stage in machine-readable form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageSummary {
    pub stage: String,
    pub status: StageStatus,
    pub duration_ms: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_checks: Vec<String>,
}

/// A build in machine-readable form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BuildSummary {
    pub trigger_id: String,
    pub source: TriggerSource,
    pub reason: String,
    pub status: OverallStatus,
    pub duration_ms: u64,
    pub stages: Vec<StageSummary>,
}

pub fn summary(result: &BuildResult) -> BuildSummary {
    BuildSummary {
        trigger_id: result.trigger.id.to_string(),
        source: result.trigger.source,
        reason: result.trigger.describe(),
        status: result.overall_status,
        duration_ms: result.duration_ms(),
        stages: result
            .outcomes
            .iter()
            .map(|o| StageSummary {
                stage: o.stage.name().to_string(),
                status: o.status,
                duration_ms: o.duration_ms,
                message: o.details.message.clone(),
                failed_checks: o
                    .details
                    .failed_checks()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })
            .collect(),
    }
}

fn status_marker(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "✓",
        StageStatus::SoftFailure => "!",
        StageStatus::HardFailure => "✗",
    }
}

/// Render the console form: one line per attempted stage plus a summary.
pub fn render_console(result: &BuildResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Build triggered by {}\n", result.trigger.describe()));

    for outcome in &result.outcomes {
        out.push_str(&format!(
            "  {} {:<10} {:>7}ms  {}\n",
            status_marker(outcome.status),
            outcome.stage.name(),
            outcome.duration_ms,
            outcome.details.message
        ));
        for check in outcome.details.checks.iter().filter(|c| !c.passed) {
            match &check.message {
                Some(msg) => out.push_str(&format!("      failed check {}: {}\n", check.name, msg)),
                None => out.push_str(&format!("      failed check {}\n", check.name)),
            }
        }
        if outcome.status == StageStatus::HardFailure {
            if let Some(excerpt) = &outcome.details.log_excerpt {
                for line in excerpt.lines() {
                    out.push_str(&format!("      | {}\n", line));
                }
            }
        }
    }

    let line = match result.overall_status {
        OverallStatus::Success => format!("Build succeeded in {}ms", result.duration_ms()),
        OverallStatus::Degraded => format!(
            "Build completed with warnings in {}ms (data-quality checks failed)",
            result.duration_ms()
        ),
        OverallStatus::Failed => {
            let failed_at = result
                .outcomes
                .last()
                .map(|o| o.stage.name())
                .unwrap_or("unknown");
            format!(
                "Build FAILED at {} after {}ms",
                failed_at,
                result.duration_ms()
            )
        }
    };
    out.push_str(&line);
    out.push('\n');
    out
}

/// HTTP acknowledgment for a webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookAck {
    pub status: u16,
    pub body: Value,
}

/// Acknowledge a delivery. The status reflects acceptance of the event,
/// never the eventual build outcome.
pub fn webhook_ack(disposition: &IngressDisposition) -> WebhookAck {
    match disposition {
        IngressDisposition::Accepted(trigger) => {
            let (event_kind, scope) = match &trigger.payload {
                crate::domain::TriggerPayload::Webhook {
                    event_kind, scope, ..
                } => (event_kind.clone(), *scope),
                _ => (String::new(), trigger.scope()),
            };
            WebhookAck {
                status: 202,
                body: json!({
                    "status": "accepted",
                    "event_type": event_kind,
                    "trigger_id": trigger.id.to_string(),
                    "scope": scope,
                }),
            }
        }
        IngressDisposition::Ignored { event_kind, note } => WebhookAck {
            status: 200,
            body: json!({
                "status": "ignored",
                "event_type": event_kind,
                "message": note,
            }),
        },
        IngressDisposition::Rejected(RejectReason::Unauthorized) => WebhookAck {
            status: 401,
            body: json!({ "status": "rejected", "error": "invalid signature" }),
        },
        IngressDisposition::Rejected(RejectReason::MalformedPayload { detail }) => WebhookAck {
            status: 400,
            body: json!({
                "status": "rejected",
                "error": format!("Invalid webhook payload: {}", detail),
            }),
        },
    }
}

/// Routes each finished build to its caller's sink.
pub struct Reporter {
    console: Mutex<Box<dyn Write + Send>>,
}

impl Reporter {
    pub fn new(console: Box<dyn Write + Send>) -> Self {
        Self {
            console: Mutex::new(console),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn report(&self, result: &BuildResult, sink: ReportSink) {
        match sink {
            ReportSink::Console => {
                let rendered = render_console(result);
                let mut console = self
                    .console
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Err(e) = console
                    .write_all(rendered.as_bytes())
                    .and_then(|_| console.flush())
                {
                    warn!(error = %e, "failed to write build report");
                }
            }
            ReportSink::HttpResponse => {
                let summary = serde_json::to_string(&summary(result))
                    .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e));
                info!(
                    event = "webhook.build_outcome",
                    trigger_id = %result.trigger.id,
                    status = %result.overall_status,
                    summary = %summary,
                );
            }
        }
    }
}

impl ResultSink for Reporter {
    fn deliver(&self, result: &BuildResult) {
        self.report(result, ReportSink::for_source(result.trigger.source));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BuildScope, CheckResult, Stage, StageDetails, StageOutcome, TriggerRequest,
    };
    use chrono::Utc;
    use std::sync::Arc;

    fn build(statuses: &[StageStatus]) -> BuildResult {
        let now = Utc::now();
        let outcomes = statuses
            .iter()
            .zip(Stage::ORDER.iter())
            .map(|(status, stage)| {
                let mut details = StageDetails::message(format!("{} done", stage));
                if *status == StageStatus::SoftFailure {
                    details = details.with_checks(vec![CheckResult {
                        name: "unique_users_email".into(),
                        passed: false,
                        message: Some("2 duplicate rows".into()),
                    }]);
                }
                StageOutcome::new(*stage, *status, 5, details)
            })
            .collect();
        BuildResult::new(TriggerRequest::manual(), outcomes, now, now)
    }

    #[test]
    fn test_exit_codes() {
        use StageStatus::*;
        assert_eq!(exit_code(&build(&[Success, Success, Success, Success])), 0);
        assert_eq!(exit_code(&build(&[Success, Success, Success, SoftFailure])), 0);
        assert_eq!(exit_code(&build(&[Success, Success, HardFailure])), 1);
    }

    #[test]
    fn test_console_lists_each_attempted_stage() {
        use StageStatus::*;
        let text = render_console(&build(&[Success, Success, HardFailure]));
        assert!(text.contains("generate"));
        assert!(text.contains("load"));
        assert!(text.contains("transform"));
        assert!(!text.contains("test "));
        assert!(text.contains("Build FAILED at transform"));
    }

    #[test]
    fn test_console_degraded_mentions_warnings_and_check() {
        use StageStatus::*;
        let text = render_console(&build(&[Success, Success, Success, SoftFailure]));
        assert!(text.contains("completed with warnings"));
        assert!(text.contains("failed check unique_users_email: 2 duplicate rows"));
    }

    #[test]
    fn test_summary_serializes() {
        use StageStatus::*;
        let s = summary(&build(&[Success, Success, Success, SoftFailure]));
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["status"], "degraded");
        assert_eq!(v["stages"][3]["stage"], "test");
        assert_eq!(v["stages"][3]["status"], "soft_failure");
        assert_eq!(v["stages"][3]["failed_checks"][0], "unique_users_email");
    }

    #[test]
    fn test_webhook_ack_statuses() {
        let accepted = IngressDisposition::Accepted(TriggerRequest::webhook(
            "push",
            None,
            Some("refs/heads/main".into()),
            BuildScope::Full,
        ));
        assert_eq!(webhook_ack(&accepted).status, 202);
        assert_eq!(webhook_ack(&accepted).body["event_type"], "push");

        let ignored = IngressDisposition::Ignored {
            event_kind: "issues".into(),
            note: "unhandled event kind".into(),
        };
        assert_eq!(webhook_ack(&ignored).status, 200);

        let unauthorized = IngressDisposition::Rejected(RejectReason::Unauthorized);
        assert_eq!(webhook_ack(&unauthorized).status, 401);

        let malformed = IngressDisposition::Rejected(RejectReason::MalformedPayload {
            detail: "expected value".into(),
        });
        assert_eq!(webhook_ack(&malformed).status, 400);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reporter_routes_by_source() {
        let buf = SharedBuf::default();
        let reporter = Reporter::new(Box::new(buf.clone()));

        let now = Utc::now();
        let webhook = BuildResult::new(
            TriggerRequest::webhook("push", None, None, BuildScope::Full),
            vec![],
            now,
            now,
        );
        reporter.deliver(&webhook);
        assert!(buf.0.lock().unwrap().is_empty(), "webhook builds stay off the console");

        reporter.deliver(&build(&[StageStatus::Success]));
        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("Build succeeded"));
    }
}
