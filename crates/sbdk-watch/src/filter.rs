//! Relevance filtering for filesystem changes.
//!
//! A path is relevant when it matches no ignore glob and, if an extension
//! allow-list is configured, carries one of the allowed extensions.
//! Irrelevant paths never open or extend a debounce window.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

use crate::error::{Result, WatchError};

#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    ignore: GlobSet,
    patterns: Vec<String>,
    extensions: Vec<String>,
}

impl IgnoreFilter {
    /// Build a filter. An empty `extensions` list allows every extension.
    pub fn new<P, E>(patterns: P, extensions: E) -> Result<Self>
    where
        P: IntoIterator,
        P::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| WatchError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.kind().to_string(),
            })?;
            builder.add(glob);
        }
        let ignore = builder.build().map_err(|e| WatchError::InvalidPattern {
            pattern: e.glob().unwrap_or_default().to_string(),
            reason: e.kind().to_string(),
        })?;

        let extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Ok(Self {
            ignore,
            patterns,
            extensions,
        })
    }

    /// Filter that lets every change through.
    pub fn allow_all() -> Self {
        Self {
            ignore: GlobSet::empty(),
            patterns: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.is_match(path)
    }

    pub fn has_allowed_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        !self.is_ignored(path) && self.has_allowed_extension(path)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
