//! Ports for the external collaborators a task consults as it advances.
//!
//! Each contract covers one capability: code generation, test and CI
//! verdicts, version control, deployment, metrics, and human approval.
//! Calls are long-running relative to the task; the orchestrator suspends
//! the task until the collaborator returns.

use crate::pipeline::domain::{
    DeployStrategy, Environment, PathCheck, Plan, Task,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Findings gathered before planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchNotes {
    /// Condensed findings handed to planning.
    pub summary: String,
}

/// A generated or revised change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Unified diff of the change.
    pub diff: String,
    /// Human-readable summary of the change.
    pub summary: String,
    /// Files the patch touches.
    pub files_changed: Vec<String>,
}

/// Verdict from a test suite or CI run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Whether every check passed.
    pub passed: bool,
    /// Failure diagnostics, empty on a pass.
    pub diagnostics: String,
}

/// Commit identifier reported by the version-control collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitId(String);

impl CommitId {
    /// Creates a commit identifier.
    #[must_use]
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    /// Returns the commit SHA.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pull request opened for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    /// Pull request number.
    pub number: u32,
    /// Pull request URL.
    pub url: String,
}

/// Human verdict on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// The change was approved for merge.
    Approved {
        /// Identity of the approving reviewer.
        reviewer: String,
    },
    /// The change was rejected.
    Rejected {
        /// Identity of the rejecting reviewer.
        reviewer: String,
        /// Stated reason for the rejection.
        reason: String,
    },
}

/// Receipt for a completed release action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReceipt {
    /// Host or image the release landed on.
    pub target: String,
}

/// Receipt for a completed compensating rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReceipt {
    /// Whether database migrations were reverted with the code.
    pub migrations_reverted: bool,
}

/// Human decision on a gated task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Proceed as planned.
    Approved {
        /// Identity that approved.
        by: String,
    },
    /// Abandon the task.
    Rejected {
        /// Identity that rejected.
        by: String,
        /// Stated reason for the rejection.
        reason: String,
    },
    /// Proceed despite a protected-path block.
    Overridden {
        /// Identity that overrode the block.
        by: String,
        /// Justification recorded with the override.
        note: String,
    },
}

/// Produces research notes, plans, and patches for a task.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Gathers context for the task's intent.
    async fn research(&self, task: &Task) -> CollaboratorResult<ResearchNotes>;

    /// Drafts a structured plan from the research findings.
    async fn draft_plan(&self, task: &Task, notes: &ResearchNotes) -> CollaboratorResult<Plan>;

    /// Generates a patch for the task, revising after a failure when
    /// `prior_failure` carries the last diagnostics.
    async fn generate_patch(
        &self,
        task: &Task,
        prior_failure: Option<&str>,
    ) -> CollaboratorResult<Patch>;
}

/// Runs the local suite and reports CI verdicts for a task's branch.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs the local test suite against the task's branch head.
    async fn run_suite(&self, task: &Task) -> CollaboratorResult<CheckReport>;

    /// Waits for CI to settle on the task's branch head and reports the
    /// verdict.
    async fn await_ci_verdict(&self, task: &Task) -> CollaboratorResult<CheckReport>;
}

/// Version-control operations for a task's branch and pull request.
#[async_trait]
pub trait VersionControlClient: Send + Sync {
    /// Creates `name` from `base`.
    async fn create_branch(&self, name: &str, base: &str) -> CollaboratorResult<()>;

    /// Pushes the patch to `branch` and reports the new head commit.
    async fn push_patch(&self, branch: &str, patch: &Patch) -> CollaboratorResult<CommitId>;

    /// Opens a pull request from `branch` into `base`.
    async fn open_pull_request(
        &self,
        task: &Task,
        branch: &str,
        base: &str,
    ) -> CollaboratorResult<PullRequestRef>;

    /// Waits for a human review verdict on the task's pull request.
    async fn await_review(&self, task: &Task) -> CollaboratorResult<ReviewDecision>;

    /// Merges the task's pull request and reports the merge commit.
    async fn merge_pull_request(&self, task: &Task) -> CollaboratorResult<CommitId>;

    /// Fast-forwards `to` with the contents of `from` and reports the
    /// resulting head commit.
    async fn promote(&self, from: &str, to: &str) -> CollaboratorResult<CommitId>;
}

/// Releases and reverts task artifacts in an environment.
#[async_trait]
pub trait DeployClient: Send + Sync {
    /// Releases `commit` to `environment` using `strategy`.
    async fn deploy(
        &self,
        environment: Environment,
        strategy: DeployStrategy,
        commit: &str,
    ) -> CollaboratorResult<DeployReceipt>;

    /// Reverts `environment` to its prior known-good state.
    async fn rollback(
        &self,
        environment: Environment,
        revert_migrations: bool,
    ) -> CollaboratorResult<RollbackReceipt>;
}

/// Reads live error-rate telemetry for an environment.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Returns the error rate for `environment` over the traffic observed
    /// since `since`, in percent.
    async fn error_rate_percent(
        &self,
        environment: Environment,
        since: DateTime<Utc>,
    ) -> CollaboratorResult<f64>;
}

/// Obtains a human decision on a gated task.
#[async_trait]
pub trait ApprovalClient: Send + Sync {
    /// Waits for a human to decide on the task, given the path-guard
    /// verdict that gated it.
    async fn await_decision(
        &self,
        task: &Task,
        path_check: &PathCheck,
    ) -> CollaboratorResult<ApprovalDecision>;
}

/// Capability a collaborator failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorKind {
    /// Research, planning, or patch generation.
    CodeGeneration,
    /// Local suite or CI verdict.
    Checks,
    /// Branch, push, pull request, or merge operations.
    VersionControl,
    /// Release or rollback actions.
    Deploy,
    /// Error-rate telemetry.
    Metrics,
    /// Human approval decisions.
    Approval,
}

impl CollaboratorKind {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::Checks => "checks",
            Self::VersionControl => "version_control",
            Self::Deploy => "deploy",
            Self::Metrics => "metrics",
            Self::Approval => "approval",
        }
    }
}

impl fmt::Display for CollaboratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{collaborator} collaborator failed: {message}")]
pub struct CollaboratorError {
    collaborator: CollaboratorKind,
    message: String,
}

impl CollaboratorError {
    /// Creates a collaborator failure.
    #[must_use]
    pub fn new(collaborator: CollaboratorKind, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }

    /// Returns the capability the failure originated from.
    #[must_use]
    pub const fn collaborator(&self) -> CollaboratorKind {
        self.collaborator
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
