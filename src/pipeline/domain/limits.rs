//! Retry budgets for the development and CI remediation loops.

use super::Task;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counter governed by an iteration ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// Development attempts: patch generation, test-failure fixes, and
    /// staging deploy retries.
    DevIterations,
    /// CI remediation pushes against the open pull request.
    CiRetries,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DevIterations => write!(f, "development iteration"),
            Self::CiRetries => write!(f, "CI retry"),
        }
    }
}

/// Ceilings applied to the pipeline's two retry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationLimits {
    max_dev_iterations: u32,
    max_ci_retries: u32,
}

impl IterationLimits {
    /// Creates a limit set with the given ceilings.
    #[must_use]
    pub const fn new(max_dev_iterations: u32, max_ci_retries: u32) -> Self {
        Self {
            max_dev_iterations,
            max_ci_retries,
        }
    }

    /// Returns the development iteration ceiling.
    #[must_use]
    pub const fn max_dev_iterations(self) -> u32 {
        self.max_dev_iterations
    }

    /// Returns the CI retry ceiling.
    #[must_use]
    pub const fn max_ci_retries(self) -> u32 {
        self.max_ci_retries
    }

    /// Returns whether the task has development budget remaining.
    #[must_use]
    pub fn can_retry_dev(self, task: &Task) -> bool {
        task.dev_iterations() < self.max_dev_iterations
    }

    /// Returns whether the task has CI remediation budget remaining.
    #[must_use]
    pub fn can_retry_ci(self, task: &Task) -> bool {
        task.ci_retries() < self.max_ci_retries
    }
}
