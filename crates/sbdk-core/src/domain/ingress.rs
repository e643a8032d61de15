//! Dispositions produced by the webhook ingress.

use serde::{Deserialize, Serialize};

use super::trigger::TriggerRequest;

/// Why a delivery was refused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Missing, malformed or wrong signature.
    Unauthorized,

    /// Authenticated, but the body could not be parsed for its declared kind.
    MalformedPayload { detail: String },
}

/// What the ingress decided about one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressDisposition {
    /// Authenticated and classified as a rebuild request.
    Accepted(TriggerRequest),

    /// Authenticated, but no rebuild is warranted (unknown kind, other branch, ping).
    Ignored { event_kind: String, note: String },

    Rejected(RejectReason),
}

impl IngressDisposition {
    pub fn trigger(&self) -> Option<&TriggerRequest> {
        match self {
            IngressDisposition::Accepted(req) => Some(req),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, IngressDisposition::Rejected(_))
    }
}
