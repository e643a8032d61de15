//! SBDK Watch - debounced change detection
//!
//! Turns filesystem activity under the project's watch roots into
//! `FileChange` triggers:
//! - ignore globs and an extension allow-list decide which paths count
//! - bursts within the debounce window collapse into one trigger
//! - a missing or vanished root is fatal; there is no polling fallback

pub mod debounce;
pub mod detector;
pub mod error;
pub mod filter;

pub use debounce::{DebounceWindow, WatchSignal};
pub use detector::{watch, ChangeDetector, TriggerStream};
pub use error::{Result, WatchError};
pub use filter::IgnoreFilter;
