//! Task aggregate root and its status graph.

use super::{
    ChangeKind, IterationLimits, LimitKind, PipelineDomainError, Plan, RiskLevel, TaskId,
    TaskTrigger,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle status.
///
/// Statuses form a directed graph enforced by
/// [`TaskStatus::can_transition_to`]. `Succeeded`, `Failed`, and
/// `RolledBack` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Gathering context for the requested change.
    Research,
    /// Producing a structured plan and risk classification.
    Planning,
    /// Waiting on a human approval decision.
    AwaitingApproval,
    /// Generating or revising the patch.
    Developing,
    /// Running the local test suite.
    Testing,
    /// Waiting on CI, fixing CI failures.
    CiFixing,
    /// Waiting on human pull request review.
    Reviewing,
    /// Releasing to the staging environment.
    DeployingStaging,
    /// Watching staging metrics for regressions.
    ObservingStaging,
    /// Releasing to the production environment.
    DeployingProduction,
    /// Watching production metrics for regressions.
    ObservingProduction,
    /// Change shipped and stable.
    Succeeded,
    /// Change abandoned after an unrecoverable error or escalation.
    Failed,
    /// Change reverted by a compensating rollback.
    RolledBack,
}

impl TaskStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Planning => "planning",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Developing => "developing",
            Self::Testing => "testing",
            Self::CiFixing => "ci_fixing",
            Self::Reviewing => "reviewing",
            Self::DeployingStaging => "deploying_staging",
            Self::ObservingStaging => "observing_staging",
            Self::DeployingProduction => "deploying_production",
            Self::ObservingProduction => "observing_production",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Returns `true` when no further transition may leave this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::RolledBack)
    }

    /// Returns `true` when `next` is a legal successor of this status.
    ///
    /// Self-transitions model authorized retries and exist only for the
    /// retryable statuses. `Failed` is reachable from every non-terminal
    /// status; `RolledBack` only from the deploy and observation statuses.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Research => matches!(next, Self::Planning | Self::Failed),
            Self::Planning => {
                matches!(
                    next,
                    Self::AwaitingApproval | Self::Developing | Self::Failed
                )
            }
            Self::AwaitingApproval => matches!(next, Self::Developing | Self::Failed),
            Self::Developing => {
                matches!(next, Self::Developing | Self::Testing | Self::Failed)
            }
            Self::Testing => {
                matches!(next, Self::Developing | Self::CiFixing | Self::Failed)
            }
            Self::CiFixing => {
                matches!(next, Self::CiFixing | Self::Reviewing | Self::Failed)
            }
            Self::Reviewing => matches!(next, Self::DeployingStaging | Self::Failed),
            Self::DeployingStaging => {
                matches!(
                    next,
                    Self::DeployingStaging
                        | Self::ObservingStaging
                        | Self::RolledBack
                        | Self::Failed
                )
            }
            Self::ObservingStaging => {
                matches!(
                    next,
                    Self::DeployingProduction | Self::RolledBack | Self::Failed
                )
            }
            Self::DeployingProduction => {
                matches!(
                    next,
                    Self::ObservingProduction | Self::RolledBack | Self::Failed
                )
            }
            Self::ObservingProduction => {
                matches!(next, Self::Succeeded | Self::RolledBack | Self::Failed)
            }
            Self::Succeeded | Self::Failed | Self::RolledBack => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "research" => Ok(Self::Research),
            "planning" => Ok(Self::Planning),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "developing" => Ok(Self::Developing),
            "testing" => Ok(Self::Testing),
            "ci_fixing" => Ok(Self::CiFixing),
            "reviewing" => Ok(Self::Reviewing),
            "deploying_staging" => Ok(Self::DeployingStaging),
            "observing_staging" => Ok(Self::ObservingStaging),
            "deploying_production" => Ok(Self::DeployingProduction),
            "observing_production" => Ok(Self::ObservingProduction),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "rolled_back" => Ok(Self::RolledBack),
            _ => Err(PipelineDomainError::UnknownStatus(value.to_owned())),
        }
    }
}

/// Task aggregate root.
///
/// Version-control references are populated progressively and never
/// retracted; the commit is the only reference that may be replaced, as
/// each development iteration pushes a new head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    intent: String,
    requested_by: String,
    channel: Option<String>,
    kind: ChangeKind,
    status: TaskStatus,
    risk_level: Option<RiskLevel>,
    plan: Option<Plan>,
    branch_name: Option<String>,
    pr_number: Option<u32>,
    pr_url: Option<String>,
    commit_sha: Option<String>,
    dev_iterations: u32,
    ci_retries: u32,
    error: Option<String>,
    deployed_at: Option<DateTime<Utc>>,
    rolled_back_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted change intent.
    pub intent: String,
    /// Persisted requester identity.
    pub requested_by: String,
    /// Persisted origin channel, if any.
    pub channel: Option<String>,
    /// Persisted change kind.
    pub kind: ChangeKind,
    /// Persisted lifecycle status.
    pub status: TaskStatus,
    /// Persisted risk classification, if planning completed.
    pub risk_level: Option<RiskLevel>,
    /// Persisted plan, if planning completed.
    pub plan: Option<Plan>,
    /// Persisted branch name, if any.
    pub branch_name: Option<String>,
    /// Persisted pull request number, if any.
    pub pr_number: Option<u32>,
    /// Persisted pull request URL, if any.
    pub pr_url: Option<String>,
    /// Persisted head commit, if any.
    pub commit_sha: Option<String>,
    /// Persisted development retry count.
    pub dev_iterations: u32,
    /// Persisted CI retry count.
    pub ci_retries: u32,
    /// Persisted last escalation error, if any.
    pub error: Option<String>,
    /// Persisted production deployment timestamp, if any.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Persisted rollback timestamp, if any.
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new task from an accepted trigger.
    #[must_use]
    pub fn from_trigger(trigger: &TaskTrigger, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        Self {
            id: TaskId::new(),
            intent: trigger.intent().to_owned(),
            requested_by: trigger.requested_by().to_owned(),
            channel: trigger.channel().map(ToOwned::to_owned),
            kind: trigger.kind(),
            status: TaskStatus::Research,
            risk_level: None,
            plan: None,
            branch_name: None,
            pr_number: None,
            pr_url: None,
            commit_sha: None,
            dev_iterations: 0,
            ci_retries: 0,
            error: None,
            deployed_at: None,
            rolled_back_at: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            intent: data.intent,
            requested_by: data.requested_by,
            channel: data.channel,
            kind: data.kind,
            status: data.status,
            risk_level: data.risk_level,
            plan: data.plan,
            branch_name: data.branch_name,
            pr_number: data.pr_number,
            pr_url: data.pr_url,
            commit_sha: data.commit_sha,
            dev_iterations: data.dev_iterations,
            ci_retries: data.ci_retries,
            error: data.error,
            deployed_at: data.deployed_at,
            rolled_back_at: data.rolled_back_at,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the change intent.
    #[must_use]
    pub fn intent(&self) -> &str {
        &self.intent
    }

    /// Returns the requester identity.
    #[must_use]
    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }

    /// Returns the origin channel, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Returns the change kind.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the risk classification, if planning completed.
    #[must_use]
    pub const fn risk_level(&self) -> Option<RiskLevel> {
        self.risk_level
    }

    /// Returns the plan, if planning completed.
    #[must_use]
    pub const fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Returns the working branch, if any.
    #[must_use]
    pub fn branch_name(&self) -> Option<&str> {
        self.branch_name.as_deref()
    }

    /// Returns the pull request number, if any.
    #[must_use]
    pub const fn pr_number(&self) -> Option<u32> {
        self.pr_number
    }

    /// Returns the pull request URL, if any.
    #[must_use]
    pub fn pr_url(&self) -> Option<&str> {
        self.pr_url.as_deref()
    }

    /// Returns the head commit, if any.
    #[must_use]
    pub fn commit_sha(&self) -> Option<&str> {
        self.commit_sha.as_deref()
    }

    /// Returns the development retry count.
    #[must_use]
    pub const fn dev_iterations(&self) -> u32 {
        self.dev_iterations
    }

    /// Returns the CI retry count.
    #[must_use]
    pub const fn ci_retries(&self) -> u32 {
        self.ci_retries
    }

    /// Returns the last escalation error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns the production deployment timestamp, if any.
    #[must_use]
    pub const fn deployed_at(&self) -> Option<DateTime<Utc>> {
        self.deployed_at
    }

    /// Returns the rollback timestamp, if any.
    #[must_use]
    pub const fn rolled_back_at(&self) -> Option<DateTime<Utc>> {
        self.rolled_back_at
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest mutation timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves the task to `next` along the status graph.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidStatusTransition`] when the
    /// graph has no edge from the current status to `next`.
    pub fn transition_to(
        &mut self,
        next: TaskStatus,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineDomainError::InvalidStatusTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch(clock);
        Ok(())
    }

    /// Records the plan and fixes the risk classification for the life of
    /// the task.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::PlanAlreadyAssigned`] if a plan is
    /// already set.
    pub fn assign_plan(&mut self, plan: Plan, clock: &impl Clock) -> Result<(), PipelineDomainError> {
        if self.plan.is_some() {
            return Err(PipelineDomainError::PlanAlreadyAssigned(self.id));
        }
        self.risk_level = Some(plan.risk());
        self.plan = Some(plan);
        self.touch(clock);
        Ok(())
    }

    /// Associates the working branch with this task.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::BranchAlreadyAssociated`] if a branch
    /// is already set.
    pub fn associate_branch(
        &mut self,
        branch: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        set_once(
            &mut self.branch_name,
            branch.into(),
            PipelineDomainError::BranchAlreadyAssociated(self.id),
        )?;
        self.touch(clock);
        Ok(())
    }

    /// Associates the pull request with this task.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::PullRequestAlreadyAssociated`] if a
    /// pull request is already set.
    pub fn associate_pull_request(
        &mut self,
        number: u32,
        url: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        if self.pr_number.is_some() || self.pr_url.is_some() {
            return Err(PipelineDomainError::PullRequestAlreadyAssociated(self.id));
        }
        self.pr_number = Some(number);
        self.pr_url = Some(url.into());
        self.touch(clock);
        Ok(())
    }

    /// Records the current head commit, replacing any prior one.
    pub fn record_commit(&mut self, sha: impl Into<String>, clock: &impl Clock) {
        self.commit_sha = Some(sha.into());
        self.touch(clock);
    }

    /// Consumes one development retry.
    ///
    /// The first pass through a retryable stage is free; only authorized
    /// re-entries consume budget.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::IterationLimitExceeded`] when the
    /// counter is already at the ceiling.
    pub fn record_dev_iteration(
        &mut self,
        limits: IterationLimits,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        if self.dev_iterations >= limits.max_dev_iterations() {
            return Err(PipelineDomainError::IterationLimitExceeded {
                kind: LimitKind::DevIterations,
                limit: limits.max_dev_iterations(),
            });
        }
        self.dev_iterations += 1;
        self.touch(clock);
        Ok(())
    }

    /// Consumes one CI retry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::IterationLimitExceeded`] when the
    /// counter is already at the ceiling.
    pub fn record_ci_retry(
        &mut self,
        limits: IterationLimits,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        if self.ci_retries >= limits.max_ci_retries() {
            return Err(PipelineDomainError::IterationLimitExceeded {
                kind: LimitKind::CiRetries,
                limit: limits.max_ci_retries(),
            });
        }
        self.ci_retries += 1;
        self.touch(clock);
        Ok(())
    }

    /// Marks the production deployment timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::AlreadyDeployed`] if the timestamp is
    /// already set.
    pub fn mark_deployed(&mut self, clock: &impl Clock) -> Result<(), PipelineDomainError> {
        if self.deployed_at.is_some() {
            return Err(PipelineDomainError::AlreadyDeployed(self.id));
        }
        self.deployed_at = Some(clock.utc());
        self.touch(clock);
        Ok(())
    }

    /// Marks the rollback timestamp.
    ///
    /// The timestamp records reversal of a production deployment, so it
    /// requires `deployed_at` to be set first and must land strictly
    /// after it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::AlreadyRolledBack`] if the timestamp
    /// is already set,
    /// [`PipelineDomainError::RolledBackWithoutDeployment`] if no
    /// deployment preceded it, and
    /// [`PipelineDomainError::RollbackNotAfterDeployment`] if the clock
    /// has not advanced past the deployment instant.
    pub fn mark_rolled_back(&mut self, clock: &impl Clock) -> Result<(), PipelineDomainError> {
        if self.rolled_back_at.is_some() {
            return Err(PipelineDomainError::AlreadyRolledBack(self.id));
        }
        let Some(deployed) = self.deployed_at else {
            return Err(PipelineDomainError::RolledBackWithoutDeployment(self.id));
        };
        let now = clock.utc();
        if now <= deployed {
            return Err(PipelineDomainError::RollbackNotAfterDeployment(self.id));
        }
        self.rolled_back_at = Some(now);
        self.touch(clock);
        Ok(())
    }

    /// Records the latest escalation error, replacing any prior one.
    pub fn note_error(&mut self, message: impl Into<String>, clock: &impl Clock) {
        self.error = Some(message.into());
        self.touch(clock);
    }

    /// Records an escalation error and moves the task to `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidStatusTransition`] when the
    /// task is already terminal.
    pub fn record_failure(
        &mut self,
        message: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        self.transition_to(TaskStatus::Failed, clock)?;
        self.note_error(message, clock);
        Ok(())
    }

    /// Updates the `updated_at` timestamp to the current clock time.
    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}

/// Sets a reference field if empty, or returns the given error.
fn set_once<T>(
    field: &mut Option<T>,
    new_value: T,
    already_set_error: PipelineDomainError,
) -> Result<(), PipelineDomainError> {
    if field.is_some() {
        return Err(already_set_error);
    }
    *field = Some(new_value);
    Ok(())
}
