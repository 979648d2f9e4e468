//! Repository port for task and stage-attempt persistence.
//!
//! Tasks and their attempt ledger form one aggregate, so a single port
//! owns both: sealing an attempt and advancing the task status commit
//! atomically through [`PipelineRepository::commit_transition`], and
//! purging a task cascades over its attempts.

use crate::pipeline::domain::{
    Stage, StageAttempt, StageAttemptId, Task, TaskId, TaskStatus, WorkerId,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for pipeline repository operations.
pub type PipelineRepositoryResult<T> = Result<T, PipelineRepositoryError>;

/// Persistence contract for tasks and their stage-attempt ledger.
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    /// Stores a new task.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::DuplicateTask`] when the task ID
    /// already exists.
    async fn create_task(&self, task: &Task) -> PipelineRepositoryResult<()>;

    /// Persists changes to an existing task outside of a stage transition
    /// (escalation errors, correlation identifiers).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::TaskNotFound`] when the task does
    /// not exist.
    async fn update_task(&self, task: &Task) -> PipelineRepositoryResult<()>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn find_task(&self, id: TaskId) -> PipelineRepositoryResult<Option<Task>>;

    /// Returns all tasks currently in `status`, ordered by identifier.
    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
    ) -> PipelineRepositoryResult<Vec<Task>>;

    /// Returns all tasks created by `requested_by`, ordered by creation
    /// time.
    async fn list_tasks_for_requester(
        &self,
        requested_by: &str,
    ) -> PipelineRepositoryResult<Vec<Task>>;

    /// Appends a freshly opened attempt to the task's ledger.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::TaskNotFound`] when the owning
    /// task does not exist and
    /// [`PipelineRepositoryError::AttemptStillRunning`] when the task's
    /// latest attempt has not settled, which keeps at most one execution
    /// in flight per task.
    async fn open_attempt(&self, attempt: &StageAttempt) -> PipelineRepositoryResult<()>;

    /// Atomically persists a sealed attempt together with the task it
    /// advanced. Either both writes land or neither does.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::TaskNotFound`] when the task does
    /// not exist, [`PipelineRepositoryError::AttemptNotFound`] when the
    /// attempt was never opened,
    /// [`PipelineRepositoryError::AttemptNotSettled`] when the given
    /// attempt is still running, and
    /// [`PipelineRepositoryError::AttemptAlreadyCompleted`] when the stored
    /// attempt has already been sealed.
    async fn commit_transition(
        &self,
        task: &Task,
        attempt: &StageAttempt,
    ) -> PipelineRepositoryResult<()>;

    /// Returns the most recently started attempt for the task, if any.
    async fn latest_attempt(
        &self,
        task_id: TaskId,
    ) -> PipelineRepositoryResult<Option<StageAttempt>>;

    /// Returns every attempt for the task, ordered by start time.
    async fn attempts_for_task(
        &self,
        task_id: TaskId,
    ) -> PipelineRepositoryResult<Vec<StageAttempt>>;

    /// Returns every attempt the task made at `stage`, ordered by start
    /// time.
    async fn attempts_for_stage(
        &self,
        task_id: TaskId,
        stage: Stage,
    ) -> PipelineRepositoryResult<Vec<StageAttempt>>;

    /// Acquires the exclusive advancement claim on a task.
    ///
    /// Re-claiming by the current holder is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::TaskNotFound`] when the task does
    /// not exist and [`PipelineRepositoryError::TaskAlreadyClaimed`] when
    /// another worker holds the claim.
    async fn claim_task(
        &self,
        task_id: TaskId,
        worker: &WorkerId,
    ) -> PipelineRepositoryResult<()>;

    /// Releases the claim held by `worker`.
    ///
    /// Releasing an unclaimed task is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::TaskNotFound`] when the task does
    /// not exist and [`PipelineRepositoryError::NotClaimHolder`] when the
    /// claim is held by a different worker.
    async fn release_task(
        &self,
        task_id: TaskId,
        worker: &WorkerId,
    ) -> PipelineRepositoryResult<()>;

    /// Releases the claim regardless of holder.
    ///
    /// Used on resumption, when the previous holder is presumed dead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::TaskNotFound`] when the task does
    /// not exist.
    async fn break_claim(&self, task_id: TaskId) -> PipelineRepositoryResult<()>;

    /// Deletes the task and, by cascade, its entire attempt ledger.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineRepositoryError::TaskNotFound`] when the task does
    /// not exist.
    async fn purge_task(&self, task_id: TaskId) -> PipelineRepositoryResult<()>;
}

/// Errors returned by pipeline repository implementations.
#[derive(Debug, Clone, Error)]
pub enum PipelineRepositoryError {
    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(TaskId),

    /// The task was not found.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The attempt was not found.
    #[error("stage attempt not found: {0}")]
    AttemptNotFound(StageAttemptId),

    /// A new attempt was opened while the latest one is still running.
    #[error("task {0} already has a running stage attempt")]
    AttemptStillRunning(TaskId),

    /// A transition commit carried an attempt that has not settled.
    #[error("stage attempt {0} has not settled")]
    AttemptNotSettled(StageAttemptId),

    /// The stored attempt was already sealed.
    #[error("stage attempt {0} is already completed")]
    AttemptAlreadyCompleted(StageAttemptId),

    /// Another worker holds the advancement claim.
    #[error("task {task_id} is already claimed by worker {held_by}")]
    TaskAlreadyClaimed {
        /// Task whose claim was contested.
        task_id: TaskId,
        /// Worker currently holding the claim.
        held_by: WorkerId,
    },

    /// The releasing worker does not hold the claim.
    #[error("worker {worker} does not hold the claim on task {task_id}")]
    NotClaimHolder {
        /// Task whose claim was contested.
        task_id: TaskId,
        /// Worker that attempted the release.
        worker: WorkerId,
    },

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl PipelineRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
