//! Pipeline stages and the append-only attempt ledger entries.

use super::{PipelineDomainError, StageAttemptId, StageOutput, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};

/// A recordable phase of pipeline work.
///
/// Each unit of stage work a task performs is logged against one of these
/// phases. `Approval` records the human decision itself, so an override of
/// a blocked plan leaves an explicit ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Codebase investigation for the requested intent.
    Research,
    /// Structured plan drafting and risk classification.
    Planning,
    /// Human approval decision.
    Approval,
    /// Patch generation and push.
    Developing,
    /// Local test suite execution.
    Testing,
    /// CI verdict wait and remediation.
    CiFixing,
    /// Human pull request review.
    Reviewing,
    /// Release to staging.
    DeployingStaging,
    /// Staging observation window.
    ObservingStaging,
    /// Promotion and release to production.
    DeployingProduction,
    /// Production observation window.
    ObservingProduction,
}

impl Stage {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Planning => "planning",
            Self::Approval => "approval",
            Self::Developing => "developing",
            Self::Testing => "testing",
            Self::CiFixing => "ci_fixing",
            Self::Reviewing => "reviewing",
            Self::DeployingStaging => "deploying_staging",
            Self::ObservingStaging => "observing_staging",
            Self::DeployingProduction => "deploying_production",
            Self::ObservingProduction => "observing_production",
        }
    }

    /// Returns the stage performing the work of a lifecycle status.
    ///
    /// Terminal statuses perform no work and map to `None`.
    #[must_use]
    pub const fn for_status(status: TaskStatus) -> Option<Self> {
        match status {
            TaskStatus::Research => Some(Self::Research),
            TaskStatus::Planning => Some(Self::Planning),
            TaskStatus::AwaitingApproval => Some(Self::Approval),
            TaskStatus::Developing => Some(Self::Developing),
            TaskStatus::Testing => Some(Self::Testing),
            TaskStatus::CiFixing => Some(Self::CiFixing),
            TaskStatus::Reviewing => Some(Self::Reviewing),
            TaskStatus::DeployingStaging => Some(Self::DeployingStaging),
            TaskStatus::ObservingStaging => Some(Self::ObservingStaging),
            TaskStatus::DeployingProduction => Some(Self::DeployingProduction),
            TaskStatus::ObservingProduction => Some(Self::ObservingProduction),
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::RolledBack => None,
        }
    }
}

impl TryFrom<&str> for Stage {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "research" => Ok(Self::Research),
            "planning" => Ok(Self::Planning),
            "approval" => Ok(Self::Approval),
            "developing" => Ok(Self::Developing),
            "testing" => Ok(Self::Testing),
            "ci_fixing" => Ok(Self::CiFixing),
            "reviewing" => Ok(Self::Reviewing),
            "deploying_staging" => Ok(Self::DeployingStaging),
            "observing_staging" => Ok(Self::ObservingStaging),
            "deploying_production" => Ok(Self::DeployingProduction),
            "observing_production" => Ok(Self::ObservingProduction),
            _ => Err(PipelineDomainError::UnknownStage(value.to_owned())),
        }
    }
}

/// Completion state of a single stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Work is in flight; the attempt has no outcome yet.
    Running,
    /// The attempt finished and its stage goal was met.
    Succeeded,
    /// The attempt finished without meeting its stage goal.
    Failed,
}

impl AttemptStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Returns whether the attempt has settled.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl TryFrom<&str> for AttemptStatus {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(PipelineDomainError::UnknownAttemptStatus(value.to_owned())),
        }
    }
}

/// One ledger entry: a single try at one pipeline stage.
///
/// Attempts are append-only. An attempt opens `Running` with no output and
/// is sealed exactly once; a sealed attempt never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAttempt {
    id: StageAttemptId,
    task_id: TaskId,
    stage: Stage,
    status: AttemptStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    output: Option<StageOutput>,
}

/// Parameter object for reconstructing a persisted stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedAttemptData {
    /// Persisted attempt identifier.
    pub id: StageAttemptId,
    /// Persisted owning task identifier.
    pub task_id: TaskId,
    /// Persisted stage.
    pub stage: Stage,
    /// Persisted completion state.
    pub status: AttemptStatus,
    /// Persisted start timestamp.
    pub started_at: DateTime<Utc>,
    /// Persisted completion timestamp, if sealed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Persisted output payload, if any.
    pub output: Option<StageOutput>,
}

impl StageAttempt {
    /// Opens a new running attempt for a task at the given stage.
    #[must_use]
    pub fn open(task_id: TaskId, stage: Stage, clock: &impl Clock) -> Self {
        Self {
            id: StageAttemptId::new(),
            task_id,
            stage,
            status: AttemptStatus::Running,
            started_at: clock.utc(),
            completed_at: None,
            output: None,
        }
    }

    /// Reconstructs an attempt from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedAttemptData) -> Self {
        Self {
            id: data.id,
            task_id: data.task_id,
            stage: data.stage,
            status: data.status,
            started_at: data.started_at,
            completed_at: data.completed_at,
            output: data.output,
        }
    }

    /// Returns the attempt identifier.
    #[must_use]
    pub const fn id(&self) -> StageAttemptId {
        self.id
    }

    /// Returns the owning task identifier.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the stage this attempt worked.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the completion state.
    #[must_use]
    pub const fn status(&self) -> AttemptStatus {
        self.status
    }

    /// Returns the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the completion timestamp, if sealed.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the recorded output, if any.
    #[must_use]
    pub const fn output(&self) -> Option<&StageOutput> {
        self.output.as_ref()
    }

    /// Returns whether the attempt is still running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, AttemptStatus::Running)
    }

    /// Seals the attempt with its outcome and output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::AttemptAlreadyCompleted`] when the
    /// attempt is already sealed, or
    /// [`PipelineDomainError::AttemptCompletionNotSettled`] when `status`
    /// is not a settled outcome.
    pub fn complete(
        &mut self,
        status: AttemptStatus,
        output: Option<StageOutput>,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        if self.status.is_settled() {
            return Err(PipelineDomainError::AttemptAlreadyCompleted);
        }
        if !status.is_settled() {
            return Err(PipelineDomainError::AttemptCompletionNotSettled);
        }

        self.status = status;
        self.completed_at = Some(clock.utc());
        self.output = output;
        Ok(())
    }
}
