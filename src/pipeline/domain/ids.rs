//! Identifier types for the pipeline domain.
//!
//! Task and attempt identifiers are ULIDs: 26-character Crockford base32
//! strings whose lexicographic order is creation order, which keeps ledger
//! listings sorted without a separate sequence column.

use super::PipelineDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique identifier for a pipeline task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    /// Creates a new time-ordered task identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a task identifier from an existing ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the wrapped ULID.
    #[must_use]
    pub const fn into_inner(self) -> Ulid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for TaskId {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ulid::from_string(value.trim())
            .map(Self)
            .map_err(|_| PipelineDomainError::InvalidId(value.to_owned()))
    }
}

/// Unique identifier for a single stage attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StageAttemptId(Ulid);

impl StageAttemptId {
    /// Creates a new time-ordered attempt identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates an attempt identifier from an existing ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the wrapped ULID.
    #[must_use]
    pub const fn into_inner(self) -> Ulid {
        self.0
    }
}

impl Default for StageAttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StageAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for StageAttemptId {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ulid::from_string(value.trim())
            .map(Self)
            .map_err(|_| PipelineDomainError::InvalidId(value.to_owned()))
    }
}

/// Identity of the logical worker holding an exclusive task claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a validated worker identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::EmptyWorkerId`] when the value is
    /// empty after trimming.
    pub fn new(value: impl Into<String>) -> Result<Self, PipelineDomainError> {
        let raw = value.into();
        let normalized = raw.trim();
        if normalized.is_empty() {
            return Err(PipelineDomainError::EmptyWorkerId);
        }
        Ok(Self(normalized.to_owned()))
    }

    /// Returns the worker identity as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
