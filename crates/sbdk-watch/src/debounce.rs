//! Debounce windows over raw filesystem signals.
//!
//! A window opens on the first relevant change after idle, extends on every
//! further relevant change, and closes `quiet` after the last one. Closing
//! emits one trigger carrying the union of all touched paths.

use sbdk_core::{obs, TriggerRequest};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::error::WatchError;
use crate::filter::IgnoreFilter;

/// Raw input to the debounce loop.
#[derive(Debug)]
pub enum WatchSignal {
    /// Paths touched by one OS event.
    Changed(Vec<PathBuf>),

    /// The OS watcher dropped events; anything under the roots may have
    /// changed.
    Rescan,

    /// The OS watcher failed.
    Fatal(WatchError),
}

/// An open (or idle) debounce window.
#[derive(Debug)]
pub struct DebounceWindow {
    quiet: Duration,
    paths: BTreeSet<PathBuf>,
    deadline: Option<Instant>,
}

impl DebounceWindow {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            paths: BTreeSet::new(),
            deadline: None,
        }
    }

    /// Record relevant paths seen at `now`. An empty batch changes nothing.
    pub fn observe<I>(&mut self, paths: I, now: Instant)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let before = self.paths.len();
        let mut touched = false;
        for path in paths {
            self.paths.insert(path);
            touched = true;
        }
        if touched {
            self.deadline = Some(now + self.quiet);
            debug!(
                new_paths = self.paths.len() - before,
                pending = self.paths.len(),
                "debounce window extended"
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the window closes, if it is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Close the window, returning the collected paths.
    pub fn take(&mut self) -> Option<Vec<PathBuf>> {
        self.deadline.take()?;
        Some(std::mem::take(&mut self.paths).into_iter().collect())
    }
}

/// Drive one window over `signals` until the input ends, a fatal error
/// occurs or the consumer goes away.
///
/// Every signal re-checks that the roots still exist.
pub(crate) async fn run_debounce_loop(
    mut signals: mpsc::UnboundedReceiver<WatchSignal>,
    output: mpsc::Sender<Result<TriggerRequest, WatchError>>,
    filter: IgnoreFilter,
    roots: Vec<PathBuf>,
    quiet: Duration,
) {
    let mut window = DebounceWindow::new(quiet);

    loop {
        let deadline = window.deadline();
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(WatchSignal::Changed(paths)) => {
                    if let Some(root) = vanished_root(&roots) {
                        let _ = output.send(Err(WatchError::RootVanished(root))).await;
                        return;
                    }
                    let relevant = paths.into_iter().filter(|p| filter.is_relevant(p));
                    window.observe(relevant, Instant::now());
                }
                Some(WatchSignal::Rescan) => {
                    if let Some(root) = vanished_root(&roots) {
                        let _ = output.send(Err(WatchError::RootVanished(root))).await;
                        return;
                    }
                    // Lost events cannot be filtered; treat every root as touched.
                    warn!(roots = roots.len(), "watcher overflowed, scheduling a full rebuild");
                    window.observe(roots.iter().cloned(), Instant::now());
                }
                Some(WatchSignal::Fatal(err)) => {
                    warn!(error = %err, "change detector stopping");
                    let _ = output.send(Err(err)).await;
                    return;
                }
                None => return,
            },
            _ = sleep_until(deadline.unwrap_or_else(|| Instant::now() + quiet)), if deadline.is_some() => {
                if let Some(paths) = window.take() {
                    let count = paths.len();
                    let trigger = TriggerRequest::file_change(paths);
                    obs::emit_watch_trigger(&trigger, count);
                    if output.send(Ok(trigger)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn vanished_root(roots: &[PathBuf]) -> Option<PathBuf> {
    let root = roots.iter().find(|r| !r.exists())?;
    warn!(root = %root.display(), "watch root disappeared");
    Some(root.clone())
}
