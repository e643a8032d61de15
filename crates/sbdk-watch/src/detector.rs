//! Change detector backed by the platform's native watcher.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sbdk_core::{BuildCoordinator, ProjectConfig, TriggerRequest};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::debounce::{run_debounce_loop, WatchSignal};
use crate::error::{Result, WatchError};
use crate::filter::IgnoreFilter;

/// Closed windows waiting for a consumer.
const TRIGGER_BUFFER: usize = 16;

/// Watches a set of roots and turns bursts of changes into triggers.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    roots: Vec<PathBuf>,
    debounce: Duration,
    filter: IgnoreFilter,
}

impl ChangeDetector {
    pub fn new(roots: Vec<PathBuf>, debounce: Duration, filter: IgnoreFilter) -> Self {
        Self {
            roots,
            debounce,
            filter,
        }
    }

    /// Roots, debounce and filters from the project configuration. The
    /// database file is always ignored.
    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        let filter = IgnoreFilter::new(
            config.watch_ignore_patterns(),
            config.watch.extensions.clone(),
        )?;
        Ok(Self::new(config.watch_roots(), config.debounce(), filter))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Start watching. Fails if any root is missing.
    ///
    /// Must be called inside a tokio runtime.
    pub fn watch(self) -> Result<TriggerStream> {
        let mut roots = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            if !root.exists() {
                return Err(WatchError::RootMissing(root.clone()));
            }
            roots.push(std::fs::canonicalize(root).unwrap_or_else(|_| root.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let signal = match res {
                Ok(event) if event.need_rescan() => WatchSignal::Rescan,
                Ok(event) if matches!(event.kind, EventKind::Access(_)) => return,
                Ok(event) => WatchSignal::Changed(event.paths),
                Err(e) => WatchSignal::Fatal(e.into()),
            };
            // The loop has stopped if this fails; nothing left to notify.
            let _ = tx.send(signal);
        })?;

        for root in &roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!(root = %root.display(), "watching");
        }

        let detector = Self { roots, ..self };
        Ok(detector.spawn(rx, Some(watcher)))
    }

    /// Debounce an externally supplied signal stream instead of the OS
    /// watcher. Roots are still re-checked on every signal.
    pub fn watch_signals(self, signals: mpsc::UnboundedReceiver<WatchSignal>) -> TriggerStream {
        self.spawn(signals, None)
    }

    fn spawn(
        self,
        signals: mpsc::UnboundedReceiver<WatchSignal>,
        watcher: Option<RecommendedWatcher>,
    ) -> TriggerStream {
        let (output, triggers) = mpsc::channel(TRIGGER_BUFFER);
        let task = tokio::spawn(run_debounce_loop(
            signals,
            output,
            self.filter,
            self.roots,
            self.debounce,
        ));
        TriggerStream {
            triggers,
            task,
            _watcher: watcher,
        }
    }
}

/// Watch `roots`, emitting one trigger per burst of relevant changes.
pub fn watch(roots: Vec<PathBuf>, debounce: Duration, filter: IgnoreFilter) -> Result<TriggerStream> {
    ChangeDetector::new(roots, debounce, filter).watch()
}

/// Lazy, non-restartable sequence of file-change triggers.
///
/// Yields `Err` at most once; after that the stream is exhausted. Dropping
/// it stops the OS watcher and the debounce task.
pub struct TriggerStream {
    triggers: mpsc::Receiver<std::result::Result<TriggerRequest, WatchError>>,
    task: JoinHandle<()>,
    _watcher: Option<RecommendedWatcher>,
}

impl TriggerStream {
    /// Next trigger, a fatal error, or `None` once the detector has stopped.
    pub async fn next(&mut self) -> Option<std::result::Result<TriggerRequest, WatchError>> {
        self.triggers.recv().await
    }

    /// Submit every trigger to `coordinator` until the detector stops.
    ///
    /// Returns the fatal error that stopped it, if any.
    pub async fn forward_to(mut self, coordinator: &BuildCoordinator) -> Result<()> {
        while let Some(item) = self.next().await {
            match item {
                Ok(trigger) => {
                    coordinator.submit(trigger);
                }
                Err(e) => {
                    warn!(error = %e, "change detector failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl Drop for TriggerStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
