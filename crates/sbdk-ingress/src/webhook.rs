//! Webhook verification and classification.
//!
//! | declared kind  | condition                                   | verdict              |
//! |----------------|---------------------------------------------|----------------------|
//! | `push`         | `ref` is `refs/heads/<branch>`              | full rebuild         |
//! | `pull_request` | action `opened`, `synchronize`, `reopened`  | test-only rebuild    |
//! | anything else  |                                             | ignored              |
//!
//! Authentication always comes first, so an unauthenticated delivery is
//! rejected whatever it claims to be.

use sbdk_core::{
    obs, BuildScope, ConfigError, IngressDisposition, ProjectConfig, RejectReason, TriggerRequest,
};
use serde::Deserialize;

use crate::signature;

const DEFAULT_BRANCH: &str = "main";
const REBUILD_PR_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];

/// Verifies and classifies webhook deliveries. Holds no build state.
#[derive(Clone)]
pub struct WebhookIngress {
    secret: Vec<u8>,
    branch: String,
}

impl std::fmt::Debug for WebhookIngress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookIngress")
            .field("secret", &"<redacted>")
            .field("branch", &self.branch)
            .finish()
    }
}

#[derive(Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Deserialize)]
struct PullRequestEvent {
    action: String,
    #[serde(default)]
    number: Option<u64>,
}

impl WebhookIngress {
    /// Create an ingress. A missing or empty secret is a configuration error.
    pub fn new(secret: Option<String>, branch: Option<String>) -> Result<Self, ConfigError> {
        let secret = secret
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;
        Ok(Self {
            secret: secret.into_bytes(),
            branch: branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        })
    }

    pub fn from_config(config: &ProjectConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.webhook.secret.clone(),
            Some(config.webhook.branch().to_string()),
        )
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Classify one delivery.
    pub fn receive(
        &self,
        raw: &[u8],
        signature: Option<&str>,
        declared_kind: Option<&str>,
    ) -> IngressDisposition {
        self.receive_delivery(raw, signature, declared_kind, None)
    }

    /// [`receive`](Self::receive), recording the sender's delivery id on the trigger.
    pub fn receive_delivery(
        &self,
        raw: &[u8],
        signature: Option<&str>,
        declared_kind: Option<&str>,
        delivery_id: Option<&str>,
    ) -> IngressDisposition {
        let kind = declared_kind.unwrap_or("").trim();
        let disposition = if signature::verify(&self.secret, raw, signature) {
            self.classify(raw, kind, delivery_id)
        } else {
            IngressDisposition::Rejected(RejectReason::Unauthorized)
        };

        let verdict = match &disposition {
            IngressDisposition::Accepted(_) => "accepted",
            IngressDisposition::Ignored { .. } => "ignored",
            IngressDisposition::Rejected(RejectReason::Unauthorized) => "unauthorized",
            IngressDisposition::Rejected(RejectReason::MalformedPayload { .. }) => "malformed",
        };
        obs::emit_webhook_received(kind, delivery_id, verdict);
        disposition
    }

    fn classify(&self, raw: &[u8], kind: &str, delivery_id: Option<&str>) -> IngressDisposition {
        let delivery_id = delivery_id.map(str::to_string);
        match kind {
            "push" => {
                let event: PushEvent = match parse(raw) {
                    Ok(event) => event,
                    Err(rejected) => return rejected,
                };
                let wanted = format!("refs/heads/{}", self.branch);
                if event.reference == wanted {
                    IngressDisposition::Accepted(TriggerRequest::webhook(
                        kind,
                        delivery_id,
                        Some(event.reference),
                        BuildScope::Full,
                    ))
                } else {
                    ignored(kind, format!("push to {} does not affect {}", event.reference, wanted))
                }
            }
            "pull_request" => {
                let event: PullRequestEvent = match parse(raw) {
                    Ok(event) => event,
                    Err(rejected) => return rejected,
                };
                if REBUILD_PR_ACTIONS.contains(&event.action.as_str()) {
                    IngressDisposition::Accepted(TriggerRequest::webhook(
                        kind,
                        delivery_id,
                        event.number.map(|n| format!("#{}", n)),
                        BuildScope::TestOnly,
                    ))
                } else {
                    ignored(kind, format!("pull request action '{}' ignored", event.action))
                }
            }
            "ping" => ignored(kind, "pong"),
            "" => ignored("unknown", "no event kind declared"),
            other => ignored(other, "unhandled event kind"),
        }
    }
}

fn ignored(kind: &str, note: impl Into<String>) -> IngressDisposition {
    IngressDisposition::Ignored {
        event_kind: kind.to_string(),
        note: note.into(),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> Result<T, IngressDisposition> {
    serde_json::from_slice(raw).map_err(|e| {
        IngressDisposition::Rejected(RejectReason::MalformedPayload {
            detail: e.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign;
    use sbdk_core::TriggerPayload;

    const SECRET: &str = "s3cret";

    fn ingress() -> WebhookIngress {
        WebhookIngress::new(Some(SECRET.to_string()), None).unwrap()
    }

    fn deliver(kind: &str, body: &str) -> IngressDisposition {
        let sig = sign(SECRET.as_bytes(), body.as_bytes());
        ingress().receive(body.as_bytes(), Some(&sig), Some(kind))
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        assert!(matches!(
            WebhookIngress::new(None, None),
            Err(ConfigError::MissingSecret)
        ));
        assert!(matches!(
            WebhookIngress::new(Some(String::new()), None),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn test_push_to_branch_accepted() {
        let disposition = deliver("push", r#"{"ref": "refs/heads/main", "after": "abc"}"#);
        let trigger = disposition.trigger().expect("accepted");
        assert_eq!(trigger.scope(), BuildScope::Full);
        match &trigger.payload {
            TriggerPayload::Webhook {
                event_kind,
                reference,
                ..
            } => {
                assert_eq!(event_kind, "push");
                assert_eq!(reference.as_deref(), Some("refs/heads/main"));
            }
            other => panic!("expected Webhook payload, got {:?}", other),
        }
    }

    #[test]
    fn test_push_to_other_branch_ignored() {
        let disposition = deliver("push", r#"{"ref": "refs/heads/feature"}"#);
        assert!(matches!(disposition, IngressDisposition::Ignored { .. }));
    }

    #[test]
    fn test_configured_branch() {
        let ingress = WebhookIngress::new(Some(SECRET.into()), Some("develop".into())).unwrap();
        let body = r#"{"ref": "refs/heads/develop"}"#;
        let sig = sign(SECRET.as_bytes(), body.as_bytes());
        assert!(ingress
            .receive(body.as_bytes(), Some(&sig), Some("push"))
            .trigger()
            .is_some());
    }

    #[test]
    fn test_pull_request_actions() {
        for action in ["opened", "synchronize", "reopened"] {
            let body = format!(r#"{{"action": "{}", "number": 7}}"#, action);
            let disposition = deliver("pull_request", &body);
            let trigger = disposition.trigger().expect("accepted");
            assert_eq!(trigger.scope(), BuildScope::TestOnly);
            assert_eq!(trigger.describe(), "webhook pull_request (#7)");
        }
        let closed = deliver("pull_request", r#"{"action": "closed", "number": 7}"#);
        assert!(matches!(closed, IngressDisposition::Ignored { .. }));
    }

    #[test]
    fn test_ping_and_unknown_kinds_ignored() {
        assert!(matches!(deliver("ping", "{}"), IngressDisposition::Ignored { .. }));
        match deliver("issues", "{}") {
            IngressDisposition::Ignored { event_kind, .. } => assert_eq!(event_kind, "issues"),
            other => panic!("expected Ignored, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let disposition = deliver("push", "not json");
        assert!(matches!(
            disposition,
            IngressDisposition::Rejected(RejectReason::MalformedPayload { .. })
        ));
        let missing_ref = deliver("push", r#"{"after": "abc"}"#);
        assert!(missing_ref.is_rejected());
    }

    #[test]
    fn test_bad_signature_rejected_before_parsing() {
        let body = br#"{"ref": "refs/heads/main"}"#;
        let wrong = sign(b"wrong", body);
        for sig in [None, Some("garbage"), Some(wrong.as_str())] {
            assert_eq!(
                ingress().receive(body, sig, Some("push")),
                IngressDisposition::Rejected(RejectReason::Unauthorized)
            );
        }
        assert_eq!(
            ingress().receive(b"not json", None, Some("push")),
            IngressDisposition::Rejected(RejectReason::Unauthorized)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(!format!("{:?}", ingress()).contains(SECRET));
    }
}
