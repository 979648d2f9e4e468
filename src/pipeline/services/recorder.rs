//! Service layer for the append-only stage attempt ledger.

use crate::pipeline::{
    domain::{
        AttemptStatus, PipelineDomainError, Stage, StageAttempt, StageAttemptId, StageOutput, Task,
        TaskId,
    },
    ports::{PipelineRepository, PipelineRepositoryError},
};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Service-level errors for ledger recording operations.
#[derive(Debug, Error)]
pub enum StageRecorderError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] PipelineDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] PipelineRepositoryError),
    /// The task is terminal and performs no stage work.
    #[error("task {0} is terminal and has no stage to record")]
    NoStageForTask(TaskId),
    /// The given attempt is not the task's open attempt.
    #[error("attempt {0} is not the task's open attempt")]
    AttemptNotOpen(StageAttemptId),
}

/// Result type for ledger recording operations.
pub type StageRecorderResult<T> = Result<T, StageRecorderError>;

/// Records stage attempts against the append-only ledger.
///
/// Every unit of stage work is bracketed by [`StageRecorder::open`] and
/// [`StageRecorder::complete`]; the completion also carries the task, so
/// sealing an attempt and advancing the task commit together.
#[derive(Clone)]
pub struct StageRecorder<R, C>
where
    R: PipelineRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
}

impl<R, C> StageRecorder<R, C>
where
    R: PipelineRepository,
    C: Clock + Send + Sync,
{
    /// Creates a new stage recorder.
    #[must_use]
    pub const fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self { repository, clock }
    }

    /// Opens a running attempt for the stage the task's status performs.
    ///
    /// # Errors
    ///
    /// Returns [`StageRecorderError::NoStageForTask`] for a terminal task
    /// and [`StageRecorderError::Repository`] when the task is unknown or
    /// a prior attempt is still running.
    pub async fn open(&self, task: &Task) -> StageRecorderResult<StageAttempt> {
        let stage = Stage::for_status(task.status())
            .ok_or_else(|| StageRecorderError::NoStageForTask(task.id()))?;
        let attempt = StageAttempt::open(task.id(), stage, &*self.clock);
        self.repository.open_attempt(&attempt).await?;
        debug!(
            task_id = %task.id(),
            stage = stage.as_str(),
            attempt_id = %attempt.id(),
            "opened stage attempt"
        );
        Ok(attempt)
    }

    /// Seals the open attempt and commits the task state with it.
    ///
    /// The attempt is completed with `status` and `output`, and the given
    /// task snapshot is persisted in the same repository commit, so a crash
    /// can never separate a sealed attempt from its task transition.
    ///
    /// # Errors
    ///
    /// Returns [`StageRecorderError::AttemptNotOpen`] when `attempt_id`
    /// does not name the task's open attempt,
    /// [`StageRecorderError::Domain`] when the attempt is already sealed,
    /// and [`StageRecorderError::Repository`] when the commit fails.
    pub async fn complete(
        &self,
        task: &Task,
        attempt_id: StageAttemptId,
        status: AttemptStatus,
        output: Option<StageOutput>,
    ) -> StageRecorderResult<StageAttempt> {
        let mut attempt = self
            .repository
            .latest_attempt(task.id())
            .await?
            .ok_or(StageRecorderError::AttemptNotOpen(attempt_id))?;
        if attempt.id() != attempt_id {
            return Err(StageRecorderError::AttemptNotOpen(attempt_id));
        }
        attempt.complete(status, output, &*self.clock)?;
        self.repository.commit_transition(task, &attempt).await?;
        debug!(
            task_id = %task.id(),
            stage = attempt.stage().as_str(),
            attempt_id = %attempt.id(),
            outcome = status.as_str(),
            "sealed stage attempt"
        );
        Ok(attempt)
    }

    /// Seals a running attempt left behind by a dead process.
    ///
    /// The latest attempt, when still running, is completed `Failed` with
    /// an [`StageOutput::Interrupted`] payload and the task is persisted
    /// unchanged. A second call finds no running attempt and does nothing,
    /// so crash recovery can replay it safely.
    ///
    /// # Errors
    ///
    /// Returns [`StageRecorderError`] when the ledger read or the sealing
    /// commit fails.
    pub async fn abandon_running(&self, task: &Task) -> StageRecorderResult<Option<StageAttempt>> {
        let Some(mut attempt) = self.repository.latest_attempt(task.id()).await? else {
            return Ok(None);
        };
        if !attempt.is_running() {
            return Ok(None);
        }
        attempt.complete(
            AttemptStatus::Failed,
            Some(StageOutput::Interrupted {
                reason: "process terminated while the attempt was running".to_owned(),
                rollback: None,
            }),
            &*self.clock,
        )?;
        self.repository.commit_transition(task, &attempt).await?;
        warn!(
            task_id = %task.id(),
            stage = attempt.stage().as_str(),
            attempt_id = %attempt.id(),
            "abandoned running stage attempt"
        );
        Ok(Some(attempt))
    }

    /// Returns every attempt recorded for the task, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StageRecorderError::Repository`] when the ledger read
    /// fails.
    pub async fn history(&self, task_id: TaskId) -> StageRecorderResult<Vec<StageAttempt>> {
        Ok(self.repository.attempts_for_task(task_id).await?)
    }

    /// Returns every attempt recorded for the task at one stage, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StageRecorderError::Repository`] when the ledger read
    /// fails.
    pub async fn stage_history(
        &self,
        task_id: TaskId,
        stage: Stage,
    ) -> StageRecorderResult<Vec<StageAttempt>> {
        Ok(self.repository.attempts_for_stage(task_id, stage).await?)
    }

    /// Returns the most recently opened attempt for the task, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StageRecorderError::Repository`] when the ledger read
    /// fails.
    pub async fn latest(&self, task_id: TaskId) -> StageRecorderResult<Option<StageAttempt>> {
        Ok(self.repository.latest_attempt(task_id).await?)
    }
}
