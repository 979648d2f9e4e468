//! Error types for pipeline domain validation and parsing.

use super::{LimitKind, TaskId, TaskStatus};
use thiserror::Error;

/// Errors returned while constructing or mutating domain pipeline values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineDomainError {
    /// The change intent is empty after trimming.
    #[error("change intent must not be empty")]
    EmptyIntent,

    /// The requester identity is empty after trimming.
    #[error("requester must not be empty")]
    EmptyRequester,

    /// The worker identifier is empty after trimming.
    #[error("worker identifier must not be empty")]
    EmptyWorkerId,

    /// The requester is not permitted to trigger the pipeline.
    #[error("requester '{requested_by}' is not permitted to trigger changes")]
    TriggerNotAuthorized {
        /// Identity that attempted the trigger.
        requested_by: String,
    },

    /// The requested status transition is not an edge of the lifecycle graph.
    #[error("invalid status transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidStatusTransition {
        /// Task being transitioned.
        task_id: TaskId,
        /// Status before the attempted transition.
        from: TaskStatus,
        /// Rejected target status.
        to: TaskStatus,
    },

    /// A plan (and with it the risk level) is already assigned.
    #[error("plan and risk level already assigned for task {0}")]
    PlanAlreadyAssigned(TaskId),

    /// A branch name is already associated.
    #[error("branch already associated with task {0}")]
    BranchAlreadyAssociated(TaskId),

    /// A pull request is already associated.
    #[error("pull request already associated with task {0}")]
    PullRequestAlreadyAssociated(TaskId),

    /// A deployment timestamp is already recorded.
    #[error("task {0} is already marked deployed")]
    AlreadyDeployed(TaskId),

    /// A rollback timestamp is already recorded.
    #[error("task {0} is already marked rolled back")]
    AlreadyRolledBack(TaskId),

    /// Rollback was recorded against a task that never deployed to
    /// production.
    #[error("task {0} has no production deployment to roll back")]
    RolledBackWithoutDeployment(TaskId),

    /// Rollback was recorded at or before the production deployment
    /// instant.
    #[error("task {0} rollback must postdate its production deployment")]
    RollbackNotAfterDeployment(TaskId),

    /// An iteration counter reached its configured ceiling.
    #[error("{kind} limit of {limit} exceeded")]
    IterationLimitExceeded {
        /// Counter that hit the ceiling.
        kind: LimitKind,
        /// Configured ceiling.
        limit: u32,
    },

    /// A protected path entry is empty or escapes the repository root.
    #[error("invalid protected path entry '{0}'")]
    InvalidProtectedPath(String),

    /// The attempt is already sealed and cannot change.
    #[error("stage attempt is already completed")]
    AttemptAlreadyCompleted,

    /// An attempt can only complete to a settled status.
    #[error("attempt completion requires succeeded or failed")]
    AttemptCompletionNotSettled,

    /// The identifier is not a valid 26-character sortable identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The persisted status string is not a known lifecycle status.
    #[error("unknown task status: {0}")]
    UnknownStatus(String),

    /// The persisted stage string is not a known pipeline stage.
    #[error("unknown pipeline stage: {0}")]
    UnknownStage(String),

    /// The persisted attempt status string is not a known value.
    #[error("unknown attempt status: {0}")]
    UnknownAttemptStatus(String),

    /// The persisted risk string is not a known risk level.
    #[error("unknown risk level: {0}")]
    UnknownRiskLevel(String),

    /// The persisted risk ceiling string is not a known value.
    #[error("unknown risk ceiling: {0}")]
    UnknownRiskCeiling(String),

    /// The change kind string is not a known value.
    #[error("unknown change kind: {0}")]
    UnknownChangeKind(String),

    /// The persisted plan payload carries an unsupported schema version.
    #[error("unsupported plan schema version {0}")]
    UnsupportedPlanVersion(u64),

    /// The persisted plan payload does not match the plan schema.
    #[error("malformed plan payload: {0}")]
    MalformedPlan(String),

    /// The persisted attempt output carries an unsupported schema version.
    #[error("unsupported stage output schema version {0}")]
    UnsupportedOutputVersion(u64),

    /// The persisted attempt output does not match any known output kind.
    #[error("malformed stage output payload: {0}")]
    MalformedOutput(String),
}
