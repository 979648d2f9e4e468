//! Protected-path policy evaluation.
//!
//! Certain repository paths may never be modified by the pipeline without
//! explicit human approval, regardless of the plan's risk level. The guard
//! is a pure prefix check over the plan's declared change set; it never
//! touches the filesystem.

use super::PipelineDomainError;
use serde::{Deserialize, Serialize};

/// Validated, ordered set of protected path prefixes.
///
/// Entries are repository-relative. An entry with a trailing `/` protects a
/// directory subtree; an entry without one protects a single file and any
/// path nested under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPaths {
    entries: Vec<String>,
}

impl Default for ProtectedPaths {
    /// Returns the standard protected set: CI workflows, operational
    /// scripts, and configuration.
    fn default() -> Self {
        Self {
            entries: vec![
                ".github/workflows/".to_owned(),
                "scripts/".to_owned(),
                "config/".to_owned(),
            ],
        }
    }
}

impl ProtectedPaths {
    /// Creates a validated protected-path set.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidProtectedPath`] when an entry
    /// is empty after normalization, is absolute, or contains a parent
    /// traversal segment.
    pub fn new(
        entries: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, PipelineDomainError> {
        let mut normalized = Vec::new();
        for entry in entries {
            let raw = entry.into();
            normalized.push(normalize_entry(&raw)?);
        }
        Ok(Self {
            entries: normalized,
        })
    }

    /// Creates an empty set that blocks nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the normalized entries.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Checks a plan's declared change set against the protected set.
    ///
    /// A changed path is blocked when it equals a protected entry or is
    /// nested under one.
    #[must_use]
    pub fn evaluate(&self, changed_paths: &[String]) -> PathCheck {
        let mut matched = Vec::new();
        for changed in changed_paths {
            let path = normalize_path(changed);
            for rule in &self.entries {
                if covers(rule, &path) {
                    matched.push(PathMatch {
                        changed: changed.clone(),
                        rule: rule.clone(),
                    });
                }
            }
        }

        if matched.is_empty() {
            PathCheck::Allowed
        } else {
            PathCheck::Blocked { matched }
        }
    }
}

/// Result of a protected-path check over a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCheck {
    /// No changed path touches a protected entry.
    Allowed,
    /// One or more changed paths touch protected entries.
    Blocked {
        /// Every offending path paired with the entry it violates.
        matched: Vec<PathMatch>,
    },
}

impl PathCheck {
    /// Returns whether the change set is blocked.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// A changed path caught by a protected entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    changed: String,
    rule: String,
}

impl PathMatch {
    /// Returns the offending changed path as declared by the plan.
    #[must_use]
    pub fn changed(&self) -> &str {
        &self.changed
    }

    /// Returns the protected entry the path violates.
    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }
}

fn normalize_entry(raw: &str) -> Result<String, PipelineDomainError> {
    let trimmed = raw.trim();
    let relative = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let invalid = relative.is_empty()
        || relative.starts_with('/')
        || relative.split('/').any(|segment| segment == "..");
    if invalid {
        return Err(PipelineDomainError::InvalidProtectedPath(raw.to_owned()));
    }
    Ok(relative.to_owned())
}

fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_owned()
}

/// Returns whether `rule` protects `path` (equality or subtree nesting).
fn covers(rule: &str, path: &str) -> bool {
    let prefix = rule.trim_end_matches('/');
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
