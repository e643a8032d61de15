//! Build coordinator: the single serialization point for rebuilds.
//!
//! Producers (CLI, change detector, webhook handlers) call [`BuildCoordinator::submit`],
//! which never blocks. The coordinator owns the only [`BuildState`] and
//! guarantees:
//!
//! - at most one build runs at a time (the database allows a single writer)
//! - triggers arriving during a build collapse into one pending rerun, and
//!   the rerun serves the most recent of them, widened to cover the scope
//!   of every trigger it replaced
//! - intake and the `Running -> Idle` transition share one critical section,
//!   so no trigger is lost or counted twice at that boundary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{BuildResult, TriggerRequest};
use crate::obs;

const EVENT_CAPACITY: usize = 256;

/// Runs one build to completion. Implemented by the stage runner.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Must always return a result; collaborator failures belong in the outcomes.
    async fn execute(&self, trigger: TriggerRequest) -> BuildResult;
}

/// Receives every finished build, in completion order.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, result: &BuildResult);
}

impl<F> ResultSink for F
where
    F: Fn(&BuildResult) + Send + Sync,
{
    fn deliver(&self, result: &BuildResult) {
        self(result)
    }
}

/// The coordinator's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Idle,

    Running {
        started_at: DateTime<Utc>,
        trigger: TriggerRequest,
    },

    /// A build is running and exactly one rerun is queued behind it.
    PendingRerun {
        started_at: DateTime<Utc>,
        running: TriggerRequest,
        queued: TriggerRequest,
    },
}

impl BuildState {
    pub fn is_idle(&self) -> bool {
        matches!(self, BuildState::Idle)
    }

    /// Trigger of the build currently executing, if any.
    pub fn running(&self) -> Option<&TriggerRequest> {
        match self {
            BuildState::Idle => None,
            BuildState::Running { trigger, .. } => Some(trigger),
            BuildState::PendingRerun { running, .. } => Some(running),
        }
    }

    pub fn queued(&self) -> Option<&TriggerRequest> {
        match self {
            BuildState::PendingRerun { queued, .. } => Some(queued),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuildState::Idle => "idle",
            BuildState::Running { .. } => "running",
            BuildState::PendingRerun { .. } => "pending_rerun",
        }
    }
}

/// What `submit` did with a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDisposition {
    /// The coordinator was idle; a build started for this trigger.
    Started,

    /// A build is running; this trigger is queued as the rerun.
    Queued,

    /// A build is running; this trigger replaced the previously queued one.
    Replaced { superseded: Uuid },
}

impl SubmitDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitDisposition::Started => "started",
            SubmitDisposition::Queued => "queued",
            SubmitDisposition::Replaced { .. } => "replaced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub trigger_id: Uuid,
    pub disposition: SubmitDisposition,
}

/// Lifecycle notifications published to subscribers.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Started(TriggerRequest),
    Superseded { superseded: Uuid, by: Uuid },
    Finished(Arc<BuildResult>),
    /// The executor panicked. The coordinator moved on without a result.
    Aborted { trigger_id: Uuid, error: String },
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("build for trigger {trigger_id} aborted: {error}")]
    Aborted { trigger_id: Uuid, error: String },

    #[error("missed {0} build event(s) while waiting for a result")]
    Lagged(u64),

    #[error("coordinator shut down")]
    Closed,
}

struct Inner {
    state: Mutex<BuildState>,
    executor: Arc<dyn BuildExecutor>,
    sinks: Vec<Arc<dyn ResultSink>>,
    events: broadcast::Sender<BuildEvent>,
    idle: watch::Sender<bool>,
    builds_started: AtomicU64,
    runtime: tokio::runtime::Handle,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, BuildState> {
        // Critical sections never panic midway, so a poisoned guard still
        // holds a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: BuildEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Cheap to clone; all clones share one state machine.
#[derive(Clone)]
pub struct BuildCoordinator {
    inner: Arc<Inner>,
}

impl BuildCoordinator {
    /// Create a coordinator on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(executor: Arc<dyn BuildExecutor>) -> Self {
        Self::with_sinks(executor, Vec::new())
    }

    /// Create a coordinator that hands every finished build to `sinks`.
    pub fn with_sinks(executor: Arc<dyn BuildExecutor>, sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BuildState::Idle),
                executor,
                sinks,
                events,
                idle,
                builds_started: AtomicU64::new(0),
                runtime: tokio::runtime::Handle::current(),
            }),
        }
    }

    /// Hand a trigger to the coordinator. Returns immediately.
    pub fn submit(&self, trigger: TriggerRequest) -> SubmitReceipt {
        let trigger_id = trigger.id;
        let mut state = self.inner.lock_state();

        let current = std::mem::replace(&mut *state, BuildState::Idle);
        let trigger = match &current {
            BuildState::PendingRerun { queued, .. } => covering(trigger, queued),
            _ => trigger,
        };
        let (next, disposition) = match current {
            BuildState::Idle => (
                BuildState::Running {
                    started_at: Utc::now(),
                    trigger: trigger.clone(),
                },
                SubmitDisposition::Started,
            ),
            BuildState::Running {
                started_at,
                trigger: running,
            } => (
                BuildState::PendingRerun {
                    started_at,
                    running,
                    queued: trigger.clone(),
                },
                SubmitDisposition::Queued,
            ),
            BuildState::PendingRerun {
                started_at,
                running,
                queued,
            } => (
                BuildState::PendingRerun {
                    started_at,
                    running,
                    queued: trigger.clone(),
                },
                SubmitDisposition::Replaced {
                    superseded: queued.id,
                },
            ),
        };
        *state = next;

        obs::emit_trigger_submitted(&trigger, disposition.as_str());
        match disposition {
            SubmitDisposition::Started => {
                self.inner.idle.send_replace(false);
                self.inner.builds_started.fetch_add(1, Ordering::SeqCst);
                self.inner.publish(BuildEvent::Started(trigger.clone()));
                let inner = Arc::clone(&self.inner);
                self.inner.runtime.spawn(drive(inner, trigger));
            }
            SubmitDisposition::Replaced { superseded } => {
                obs::emit_trigger_superseded(superseded, trigger_id);
                self.inner.publish(BuildEvent::Superseded {
                    superseded,
                    by: trigger_id,
                });
            }
            SubmitDisposition::Queued => {}
        }
        drop(state);

        SubmitReceipt {
            trigger_id,
            disposition,
        }
    }

    /// Submit `trigger` and wait for the build that ends up serving it.
    ///
    /// If the trigger is superseded while queued, this follows the chain and
    /// returns the result of the newer trigger that replaced it.
    pub async fn run_to_completion(
        &self,
        trigger: TriggerRequest,
    ) -> Result<Arc<BuildResult>, CoordinatorError> {
        let mut events = self.subscribe();
        let mut waiting_for = self.submit(trigger).trigger_id;

        loop {
            match events.recv().await {
                Ok(BuildEvent::Finished(result)) if result.trigger.id == waiting_for => {
                    return Ok(result)
                }
                Ok(BuildEvent::Superseded { superseded, by }) if superseded == waiting_for => {
                    waiting_for = by;
                }
                Ok(BuildEvent::Aborted { trigger_id, error }) if trigger_id == waiting_for => {
                    return Err(CoordinatorError::Aborted { trigger_id, error });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Err(CoordinatorError::Lagged(n))
                }
                Err(broadcast::error::RecvError::Closed) => return Err(CoordinatorError::Closed),
            }
        }
    }

    /// Subscribe to lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> BuildState {
        self.inner.lock_state().clone()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock_state().is_idle()
    }

    /// Total builds started since creation.
    pub fn builds_started(&self) -> u64 {
        self.inner.builds_started.load(Ordering::SeqCst)
    }

    /// Resolve once no build is running and none is queued.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = idle.wait_for(|is_idle| *is_idle).await;
    }
}

/// Owns the `Running` slot: runs builds back to back until nothing is queued.
async fn drive(inner: Arc<Inner>, first: TriggerRequest) {
    let mut trigger = first;

    loop {
        obs::emit_build_started(&trigger);
        let executor = Arc::clone(&inner.executor);
        let job = trigger.clone();
        let outcome = tokio::spawn(async move { executor.execute(job).await }).await;

        let finished = match outcome {
            Ok(result) => {
                obs::emit_build_finished(&result);
                for sink in &inner.sinks {
                    sink.deliver(&result);
                }
                BuildEvent::Finished(Arc::new(result))
            }
            Err(join_error) => {
                obs::emit_build_aborted(&trigger, &join_error);
                BuildEvent::Aborted {
                    trigger_id: trigger.id,
                    error: join_error.to_string(),
                }
            }
        };

        let next = {
            let mut state = inner.lock_state();
            inner.publish(finished);
            match std::mem::replace(&mut *state, BuildState::Idle) {
                BuildState::PendingRerun { queued, .. } => {
                    *state = BuildState::Running {
                        started_at: Utc::now(),
                        trigger: queued.clone(),
                    };
                    inner.builds_started.fetch_add(1, Ordering::SeqCst);
                    inner.publish(BuildEvent::Started(queued.clone()));
                    Some(queued)
                }
                _ => {
                    inner.idle.send_replace(true);
                    None
                }
            }
        };

        match next {
            Some(queued) => trigger = queued,
            None => break,
        }
    }
}

/// `replacement`, widened so it asks for at least what `queued` did.
fn covering(replacement: TriggerRequest, queued: &TriggerRequest) -> TriggerRequest {
    let requested = replacement.scope();
    let scope = requested.widen(queued.scope());
    if scope == requested {
        return replacement;
    }
    debug!(
        trigger_id = %replacement.id,
        from = requested.as_str(),
        to = scope.as_str(),
        "replacement widened to cover superseded trigger"
    );
    replacement.with_scope(scope)
}
