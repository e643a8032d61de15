//! Trigger requests: the single currency every producer hands to the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::build::Stage;

/// Where a trigger came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Direct CLI invocation.
    Manual,

    /// Debounced filesystem change.
    FileChange,

    /// Authenticated webhook delivery.
    Webhook,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::FileChange => "file_change",
            TriggerSource::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the pipeline a trigger asks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildScope {
    /// Regenerate, reload, transform and test.
    #[default]
    Full,

    /// Validate only: Transform avoids write-side effects when the engine allows it.
    TestOnly,

    /// Regenerate and reload; Transform and Test are skipped.
    PipelinesOnly,
}

impl BuildScope {
    /// Smallest scope covering both `self` and `other`.
    pub fn widen(self, other: BuildScope) -> BuildScope {
        if self == other {
            self
        } else {
            BuildScope::Full
        }
    }

    /// Whether `stage` runs under this scope. Excluded stages only ever
    /// form a suffix of [`Stage::ORDER`].
    pub fn includes(&self, stage: Stage) -> bool {
        match self {
            BuildScope::PipelinesOnly => matches!(stage, Stage::Generate | Stage::Load),
            BuildScope::Full | BuildScope::TestOnly => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildScope::Full => "full",
            BuildScope::TestOnly => "test_only",
            BuildScope::PipelinesOnly => "pipelines_only",
        }
    }
}

/// Source-specific metadata carried by a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerPayload {
    Manual {
        #[serde(default)]
        scope: BuildScope,
    },

    FileChange {
        /// Union of all paths touched during the debounce window, sorted.
        paths: Vec<PathBuf>,
    },

    Webhook {
        /// Declared event kind (e.g. `push`, `pull_request`).
        event_kind: String,
        /// Sender-assigned delivery identifier, if any.
        delivery_id: Option<String>,
        /// Git ref or pull request label the event refers to.
        reference: Option<String>,
        scope: BuildScope,
    },
}

/// A request to rebuild. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerRequest {
    pub id: Uuid,
    pub source: TriggerSource,
    pub received_at: DateTime<Utc>,
    pub payload: TriggerPayload,
}

impl TriggerRequest {
    fn new(source: TriggerSource, payload: TriggerPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            received_at: Utc::now(),
            payload,
        }
    }

    /// A trigger issued from the command line.
    pub fn manual() -> Self {
        Self::manual_scoped(BuildScope::Full)
    }

    /// A command-line trigger restricted to `scope`.
    pub fn manual_scoped(scope: BuildScope) -> Self {
        Self::new(TriggerSource::Manual, TriggerPayload::Manual { scope })
    }

    /// A trigger summarising one debounce window.
    pub fn file_change(mut paths: Vec<PathBuf>) -> Self {
        paths.sort();
        paths.dedup();
        Self::new(TriggerSource::FileChange, TriggerPayload::FileChange { paths })
    }

    /// A trigger derived from an authenticated webhook delivery.
    pub fn webhook(
        event_kind: impl Into<String>,
        delivery_id: Option<String>,
        reference: Option<String>,
        scope: BuildScope,
    ) -> Self {
        Self::new(
            TriggerSource::Webhook,
            TriggerPayload::Webhook {
                event_kind: event_kind.into(),
                delivery_id,
                reference,
                scope,
            },
        )
    }

    /// Scope requested by this trigger. File changes are always full.
    pub fn scope(&self) -> BuildScope {
        match &self.payload {
            TriggerPayload::Manual { scope } | TriggerPayload::Webhook { scope, .. } => *scope,
            TriggerPayload::FileChange { .. } => BuildScope::Full,
        }
    }

    /// The same request (same id) with its scope replaced. File changes
    /// stay full.
    pub fn with_scope(mut self, new_scope: BuildScope) -> Self {
        match &mut self.payload {
            TriggerPayload::Manual { scope } | TriggerPayload::Webhook { scope, .. } => {
                *scope = new_scope;
            }
            TriggerPayload::FileChange { .. } => {}
        }
        self
    }

    /// Short human description used in console and log output.
    pub fn describe(&self) -> String {
        match &self.payload {
            TriggerPayload::Manual { scope } => match scope {
                BuildScope::Full => "manual run".to_string(),
                other => format!("manual run ({})", other.as_str()),
            },
            TriggerPayload::FileChange { paths } => match paths.as_slice() {
                [] => "file change".to_string(),
                [one] => format!("change to {}", one.display()),
                [first, rest @ ..] => {
                    format!("change to {} (+{} more)", first.display(), rest.len())
                }
            },
            TriggerPayload::Webhook {
                event_kind,
                reference,
                ..
            } => match reference {
                Some(r) => format!("webhook {} ({})", event_kind, r),
                None => format!("webhook {}", event_kind),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_change_paths_sorted_and_deduped() {
        let req = TriggerRequest::file_change(vec![
            PathBuf::from("pipelines/users.py"),
            PathBuf::from("dbt/models/a.sql"),
            PathBuf::from("pipelines/users.py"),
        ]);

        match req.payload {
            TriggerPayload::FileChange { paths } => {
                assert_eq!(
                    paths,
                    vec![
                        PathBuf::from("dbt/models/a.sql"),
                        PathBuf::from("pipelines/users.py")
                    ]
                );
            }
            other => panic!("expected FileChange payload, got {:?}", other),
        }
        assert_eq!(req.source, TriggerSource::FileChange);
    }

    #[test]
    fn test_scope_defaults_to_full() {
        assert_eq!(TriggerRequest::manual().scope(), BuildScope::Full);
        let pr = TriggerRequest::webhook("pull_request", None, None, BuildScope::TestOnly);
        assert_eq!(pr.scope(), BuildScope::TestOnly);
    }

    #[test]
    fn test_widen_scope() {
        use BuildScope::*;
        assert_eq!(TestOnly.widen(TestOnly), TestOnly);
        assert_eq!(TestOnly.widen(Full), Full);
        assert_eq!(Full.widen(PipelinesOnly), Full);
        assert_eq!(PipelinesOnly.widen(TestOnly), Full);
    }

    #[test]
    fn test_pipelines_only_excludes_a_suffix() {
        let included: Vec<Stage> = Stage::ORDER
            .into_iter()
            .filter(|s| BuildScope::PipelinesOnly.includes(*s))
            .collect();
        assert_eq!(included, vec![Stage::Generate, Stage::Load]);
        assert!(Stage::ORDER.iter().all(|s| BuildScope::TestOnly.includes(*s)));
    }

    #[test]
    fn test_with_scope_keeps_identity() {
        let pr = TriggerRequest::webhook("pull_request", None, None, BuildScope::TestOnly);
        let widened = pr.clone().with_scope(BuildScope::Full);
        assert_eq!(widened.id, pr.id);
        assert_eq!(widened.source, TriggerSource::Webhook);
        assert_eq!(widened.scope(), BuildScope::Full);

        let change = TriggerRequest::file_change(vec![PathBuf::from("a.sql")]);
        assert_eq!(change.with_scope(BuildScope::TestOnly).scope(), BuildScope::Full);
    }

    #[test]
    fn test_manual_scoped() {
        let req = TriggerRequest::manual_scoped(BuildScope::PipelinesOnly);
        assert_eq!(req.scope(), BuildScope::PipelinesOnly);
        assert_eq!(req.describe(), "manual run (pipelines_only)");

        let v = serde_json::to_value(&req).expect("serialize");
        assert_eq!(v["payload"]["scope"], "pipelines_only");
        let legacy: TriggerPayload = serde_json::from_str(r#"{"type": "manual"}"#).unwrap();
        assert_eq!(legacy, TriggerPayload::Manual { scope: BuildScope::Full });
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TriggerRequest::manual().id, TriggerRequest::manual().id);
    }

    #[test]
    fn test_describe() {
        let req = TriggerRequest::file_change(vec![PathBuf::from("a.sql"), PathBuf::from("b.sql")]);
        assert_eq!(req.describe(), "change to a.sql (+1 more)");

        let hook = TriggerRequest::webhook("push", None, Some("refs/heads/main".into()), BuildScope::Full);
        assert_eq!(hook.describe(), "webhook push (refs/heads/main)");
    }

    #[test]
    fn test_payload_serde_tagged() {
        let req = TriggerRequest::manual();
        let v = serde_json::to_value(&req).expect("serialize");
        assert_eq!(v["source"], "manual");
        assert_eq!(v["payload"]["type"], "manual");
    }
}
