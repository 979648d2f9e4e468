//! The task state machine: drives pipeline runs from trigger to terminal
//! state.

use crate::pipeline::{
    domain::{
        ApprovalChoice, ApprovalRequirement, AttemptStatus, Environment, LimitKind, PathCheck,
        PipelineDomainError, PipelinePolicy, Stage, StageAttempt, StageOutput, Task, TaskId,
        TaskStatus, TaskTrigger, WorkerId,
    },
    ports::{
        ApprovalClient, ApprovalDecision, CodeGenerator, DeployClient, MetricsClient,
        PipelineRepository, PipelineRepositoryError, ResearchNotes, ReviewDecision, Sleeper,
        TestRunner, VersionControlClient,
    },
};
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{DeploymentController, ObservationOutcome, StageRecorder, StageRecorderError};

/// The full collaborator set the pipeline drives.
///
/// Every external capability sits behind one of these ports; the
/// orchestrator owns sequencing and state while the collaborators own
/// mechanics.
#[derive(Clone)]
pub struct Collaborators {
    /// Research, plan drafting, and patch generation.
    pub code: Arc<dyn CodeGenerator>,
    /// Local suite runs and CI verdicts.
    pub checks: Arc<dyn TestRunner>,
    /// Branches, pushes, pull requests, merges, and promotion.
    pub vcs: Arc<dyn VersionControlClient>,
    /// Human decisions on gated plans.
    pub approvals: Arc<dyn ApprovalClient>,
    /// Releases and reverts.
    pub deploys: Arc<dyn DeployClient>,
    /// Error-rate telemetry.
    pub metrics: Arc<dyn MetricsClient>,
}

/// Service-level errors for pipeline orchestration.
#[derive(Debug, Error)]
pub enum PipelineOrchestratorError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] PipelineDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] PipelineRepositoryError),
    /// Ledger recording failed.
    #[error(transparent)]
    Recorder(#[from] StageRecorderError),
    /// No task exists with the given identifier.
    #[error("no task {0}")]
    TaskNotFound(TaskId),
    /// The operation needs a live task but found a terminal one.
    #[error("task {task_id} is already terminal in status {status}")]
    TaskAlreadyTerminal {
        /// Identifier of the terminal task.
        task_id: TaskId,
        /// Terminal status the task rests in.
        status: TaskStatus,
    },
    /// The operation needs a terminal task but found a live one.
    #[error("task {task_id} is still active in status {status}")]
    TaskStillActive {
        /// Identifier of the active task.
        task_id: TaskId,
        /// Status the task is active in.
        status: TaskStatus,
    },
}

/// Result type for pipeline orchestration operations.
pub type PipelineOrchestratorResult<T> = Result<T, PipelineOrchestratorError>;

/// Drives tasks through the staged change pipeline.
///
/// Each stage execution is bracketed by an exclusive worker claim and
/// recorded as one ledger attempt; the task transition and the sealed
/// attempt always commit together, so a crash at any point leaves the task
/// resumable from its last settled state.
#[derive(Clone)]
pub struct PipelineOrchestrator<R, C, S>
where
    R: PipelineRepository,
    C: Clock + Send + Sync,
    S: Sleeper,
{
    repository: Arc<R>,
    recorder: StageRecorder<R, C>,
    controller: DeploymentController<C, S>,
    collaborators: Collaborators,
    policy: Arc<PipelinePolicy>,
    clock: Arc<C>,
    worker: WorkerId,
}

impl<R, C, S> PipelineOrchestrator<R, C, S>
where
    R: PipelineRepository,
    C: Clock + Send + Sync,
    S: Sleeper,
{
    /// Creates a new pipeline orchestrator.
    #[must_use]
    pub fn new(
        repository: Arc<R>,
        collaborators: Collaborators,
        sleeper: Arc<S>,
        policy: PipelinePolicy,
        clock: Arc<C>,
        worker: WorkerId,
    ) -> Self {
        let policy = Arc::new(policy);
        let recorder = StageRecorder::new(Arc::clone(&repository), Arc::clone(&clock));
        let controller = DeploymentController::new(
            Arc::clone(&collaborators.vcs),
            Arc::clone(&collaborators.deploys),
            Arc::clone(&collaborators.metrics),
            sleeper,
            Arc::clone(&clock),
            Arc::clone(&policy),
        );
        Self {
            repository,
            recorder,
            controller,
            collaborators,
            policy,
            clock,
            worker,
        }
    }

    /// Accepts a trigger and creates its task in the research state.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineOrchestratorError::Domain`] when the trigger is
    /// not authorized and [`PipelineOrchestratorError::Repository`] when
    /// persistence fails.
    pub async fn submit(&self, trigger: TaskTrigger) -> PipelineOrchestratorResult<Task> {
        trigger.authorize(self.policy.allowed_triggers(), self.policy.owner())?;
        let task = Task::from_trigger(&trigger, &*self.clock);
        self.repository.create_task(&task).await?;
        info!(
            task_id = %task.id(),
            requested_by = %task.requested_by(),
            intent = %task.intent(),
            "task submitted"
        );
        Ok(task)
    }

    /// Executes exactly one stage attempt under the worker's claim.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineOrchestratorError::TaskAlreadyTerminal`] for a
    /// finished task, [`PipelineOrchestratorError::Repository`] when
    /// another worker holds the claim, and any stage recording error.
    pub async fn advance(&self, task_id: TaskId) -> PipelineOrchestratorResult<TaskStatus> {
        self.repository.claim_task(task_id, &self.worker).await?;
        let stepped = self.step_claimed(task_id).await;
        self.finish_claimed(task_id, stepped).await
    }

    /// Drives the task until it reaches a terminal status.
    ///
    /// The claim is held across every stage of the drive and released at
    /// the end, whether the drive settled or erred. Calling `run` on an
    /// already terminal task returns its status unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineOrchestratorError::Repository`] when another
    /// worker holds the claim, and any stage recording error.
    pub async fn run(&self, task_id: TaskId) -> PipelineOrchestratorResult<TaskStatus> {
        self.repository.claim_task(task_id, &self.worker).await?;
        debug!(task_id = %task_id, worker = %self.worker, "claimed task");
        let driven = self.drive_claimed(task_id).await;
        self.finish_claimed(task_id, driven).await
    }

    /// Recovers a task after its executing process died.
    ///
    /// Breaks the stale claim, seals any attempt left running as failed
    /// with an interruption output, and drives the task onward from its
    /// last committed status. Replaying `resume` is safe: a second call
    /// finds no claim and no running attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineOrchestratorError::Repository`] when the task is
    /// unknown, and any stage recording error from the continued drive.
    pub async fn resume(&self, task_id: TaskId) -> PipelineOrchestratorResult<TaskStatus> {
        self.repository.break_claim(task_id).await?;
        let task = self.load(task_id).await?;
        self.recorder.abandon_running(&task).await?;
        if task.status().is_terminal() {
            return Ok(task.status());
        }
        info!(task_id = %task_id, status = task.status().as_str(), "resuming task");
        self.run(task_id).await
    }

    /// Force-terminates a live task on human request.
    ///
    /// A task with no live deployment fails with the cancellation
    /// recorded. When an artifact is live (staging observed or production
    /// in flight or observed), the same compensating rollback as an
    /// automatic breach runs first and the task ends rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineOrchestratorError::TaskAlreadyTerminal`] when
    /// the task already finished, and any recording error.
    pub async fn cancel(
        &self,
        task_id: TaskId,
        cancelled_by: &str,
    ) -> PipelineOrchestratorResult<TaskStatus> {
        self.repository.break_claim(task_id).await?;
        let mut task = self.load(task_id).await?;
        if task.status().is_terminal() {
            return Err(PipelineOrchestratorError::TaskAlreadyTerminal {
                task_id,
                status: task.status(),
            });
        }
        self.recorder.abandon_running(&task).await?;

        let reason = format!("cancelled by {cancelled_by}");
        let attempt = self.recorder.open(&task).await?;
        match live_environment(task.status()) {
            Some(environment) => match self.controller.run_rollback(environment).await {
                Ok(rollback) => {
                    if matches!(environment, Environment::Production) {
                        task.mark_rolled_back(&*self.clock)?;
                    }
                    task.note_error(reason.clone(), &*self.clock);
                    task.transition_to(TaskStatus::RolledBack, &*self.clock)?;
                    let output = StageOutput::Interrupted {
                        reason,
                        rollback: Some(rollback),
                    };
                    self.recorder
                        .complete(&task, attempt.id(), AttemptStatus::Failed, Some(output))
                        .await?;
                }
                Err(err) => {
                    let message = format!("{reason}; rollback failed: {err}");
                    task.record_failure(message.clone(), &*self.clock)?;
                    let output = StageOutput::Interrupted {
                        reason: message,
                        rollback: None,
                    };
                    self.recorder
                        .complete(&task, attempt.id(), AttemptStatus::Failed, Some(output))
                        .await?;
                }
            },
            None => {
                task.record_failure(reason.clone(), &*self.clock)?;
                let output = StageOutput::Interrupted {
                    reason,
                    rollback: None,
                };
                self.recorder
                    .complete(&task, attempt.id(), AttemptStatus::Failed, Some(output))
                    .await?;
            }
        }
        info!(
            task_id = %task_id,
            status = task.status().as_str(),
            cancelled_by,
            "task cancelled"
        );
        Ok(task.status())
    }

    /// Removes a finished task and its full attempt history.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineOrchestratorError::TaskStillActive`] for a task
    /// that has not reached a terminal status.
    pub async fn purge(&self, task_id: TaskId) -> PipelineOrchestratorResult<()> {
        let task = self.load(task_id).await?;
        if !task.status().is_terminal() {
            return Err(PipelineOrchestratorError::TaskStillActive {
                task_id,
                status: task.status(),
            });
        }
        self.repository.purge_task(task_id).await?;
        info!(task_id = %task_id, "task purged");
        Ok(())
    }

    async fn step_claimed(&self, task_id: TaskId) -> PipelineOrchestratorResult<TaskStatus> {
        let task = self.load(task_id).await?;
        let task = self.step(task).await?;
        Ok(task.status())
    }

    async fn drive_claimed(&self, task_id: TaskId) -> PipelineOrchestratorResult<TaskStatus> {
        let mut task = self.load(task_id).await?;
        while !task.status().is_terminal() {
            task = self.step(task).await?;
        }
        Ok(task.status())
    }

    /// Releases the claim and folds a release failure into the outcome.
    async fn finish_claimed(
        &self,
        task_id: TaskId,
        outcome: PipelineOrchestratorResult<TaskStatus>,
    ) -> PipelineOrchestratorResult<TaskStatus> {
        let released = self.repository.release_task(task_id, &self.worker).await;
        match (outcome, released) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err.into()),
            (Ok(status), Ok(())) => Ok(status),
        }
    }

    async fn load(&self, task_id: TaskId) -> PipelineOrchestratorResult<Task> {
        self.repository
            .find_task(task_id)
            .await?
            .ok_or(PipelineOrchestratorError::TaskNotFound(task_id))
    }

    async fn step(&self, task: Task) -> PipelineOrchestratorResult<Task> {
        match task.status() {
            TaskStatus::Research => self.run_research(task).await,
            TaskStatus::Planning => self.run_planning(task).await,
            TaskStatus::AwaitingApproval => self.run_approval(task).await,
            TaskStatus::Developing => self.run_developing(task).await,
            TaskStatus::Testing => self.run_testing(task).await,
            TaskStatus::CiFixing => self.run_ci_fixing(task).await,
            TaskStatus::Reviewing => self.run_reviewing(task).await,
            TaskStatus::DeployingStaging => self.run_deploying(task, Environment::Staging).await,
            TaskStatus::ObservingStaging => self.run_observing(task, Environment::Staging).await,
            TaskStatus::DeployingProduction => {
                self.run_deploying(task, Environment::Production).await
            }
            TaskStatus::ObservingProduction => {
                self.run_observing(task, Environment::Production).await
            }
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::RolledBack => {
                Err(PipelineOrchestratorError::TaskAlreadyTerminal {
                    task_id: task.id(),
                    status: task.status(),
                })
            }
        }
    }

    async fn run_research(&self, task: Task) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        match self.collaborators.code.research(&task).await {
            Ok(notes) => {
                let output = StageOutput::Research {
                    summary: notes.summary,
                };
                self.advance_to(task, &attempt, TaskStatus::Planning, output)
                    .await
            }
            Err(err) => self.escalate(task, &attempt, err.to_string(), None).await,
        }
    }

    async fn run_planning(&self, mut task: Task) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        let notes = self.research_notes(task.id()).await?;
        match self.collaborators.code.draft_plan(&task, &notes).await {
            Ok(plan) => {
                let output = StageOutput::Planning {
                    risk: plan.risk(),
                    changed_paths: plan.changed_paths().to_vec(),
                    summary: plan.summary().to_owned(),
                };
                let check = self.policy.protected_paths().evaluate(plan.changed_paths());
                let gate = self.policy.auto_approve_risk().gate(plan.risk());
                task.assign_plan(plan, &*self.clock)?;

                let next = if check.is_blocked()
                    || matches!(gate, ApprovalRequirement::RequireHuman)
                {
                    TaskStatus::AwaitingApproval
                } else {
                    TaskStatus::Developing
                };
                if check.is_blocked() {
                    info!(
                        task_id = %task.id(),
                        "plan touches protected paths, human approval required"
                    );
                } else if matches!(gate, ApprovalRequirement::RequireHuman) {
                    info!(
                        task_id = %task.id(),
                        "plan risk exceeds auto-approval ceiling, human approval required"
                    );
                }
                self.advance_to(task, &attempt, next, output).await
            }
            Err(err) => self.escalate(task, &attempt, err.to_string(), None).await,
        }
    }

    async fn run_approval(&self, task: Task) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        let check = task.plan().map_or(PathCheck::Allowed, |plan| {
            self.policy.protected_paths().evaluate(plan.changed_paths())
        });
        match self.collaborators.approvals.await_decision(&task, &check).await {
            Ok(ApprovalDecision::Approved { by }) => {
                if check.is_blocked() {
                    let message = format!(
                        "approval by {by} cannot admit protected paths without an explicit override"
                    );
                    let output = StageOutput::Approval {
                        decision: ApprovalChoice::Approved,
                        decided_by: by,
                        note: None,
                    };
                    self.escalate(task, &attempt, message, Some(output)).await
                } else {
                    let output = StageOutput::Approval {
                        decision: ApprovalChoice::Approved,
                        decided_by: by,
                        note: None,
                    };
                    self.advance_to(task, &attempt, TaskStatus::Developing, output)
                        .await
                }
            }
            Ok(ApprovalDecision::Overridden { by, note }) => {
                info!(task_id = %task.id(), decided_by = %by, "plan gate overridden");
                let output = StageOutput::Approval {
                    decision: ApprovalChoice::Override,
                    decided_by: by,
                    note: Some(note),
                };
                self.advance_to(task, &attempt, TaskStatus::Developing, output)
                    .await
            }
            Ok(ApprovalDecision::Rejected { by, reason }) => {
                let message = format!("plan rejected by {by}: {reason}");
                let output = StageOutput::Approval {
                    decision: ApprovalChoice::Rejected,
                    decided_by: by,
                    note: Some(reason),
                };
                self.escalate(task, &attempt, message, Some(output)).await
            }
            Err(err) => self.escalate(task, &attempt, err.to_string(), None).await,
        }
    }

    async fn run_developing(&self, mut task: Task) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        let prior_failure = self.prior_failure_note(task.id(), &attempt).await?;

        let branch = match task.branch_name() {
            Some(existing) => existing.to_owned(),
            None => {
                let git = self.policy.git();
                let name = git.branch_for(task.kind(), task.intent(), task.id());
                let base = git.base_branch(task.kind()).to_owned();
                if let Err(err) = self.collaborators.vcs.create_branch(&name, &base).await {
                    return self
                        .retry_or_escalate(
                            task,
                            &attempt,
                            LimitKind::DevIterations,
                            TaskStatus::Developing,
                            None,
                            err.to_string(),
                        )
                        .await;
                }
                debug!(task_id = %task.id(), branch = %name, base = %base, "created working branch");
                task.associate_branch(name.clone(), &*self.clock)?;
                name
            }
        };

        let patch = match self
            .collaborators
            .code
            .generate_patch(&task, prior_failure.as_deref())
            .await
        {
            Ok(patch) => patch,
            Err(err) => {
                return self
                    .retry_or_escalate(
                        task,
                        &attempt,
                        LimitKind::DevIterations,
                        TaskStatus::Developing,
                        None,
                        err.to_string(),
                    )
                    .await;
            }
        };

        match self.collaborators.vcs.push_patch(&branch, &patch).await {
            Ok(commit) => {
                task.record_commit(commit.as_str(), &*self.clock);
                let output = StageOutput::Developing {
                    diff_summary: patch.summary,
                    files_changed: patch.files_changed,
                };
                self.advance_to(task, &attempt, TaskStatus::Testing, output)
                    .await
            }
            Err(err) => {
                self.retry_or_escalate(
                    task,
                    &attempt,
                    LimitKind::DevIterations,
                    TaskStatus::Developing,
                    None,
                    err.to_string(),
                )
                .await
            }
        }
    }

    async fn run_testing(&self, task: Task) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        match self.collaborators.checks.run_suite(&task).await {
            Ok(report) if report.passed => {
                let output = StageOutput::Checks {
                    passed: true,
                    diagnostics: report.diagnostics,
                };
                self.advance_to(task, &attempt, TaskStatus::CiFixing, output)
                    .await
            }
            Ok(report) => {
                let output = StageOutput::Checks {
                    passed: false,
                    diagnostics: report.diagnostics.clone(),
                };
                self.retry_or_escalate(
                    task,
                    &attempt,
                    LimitKind::DevIterations,
                    TaskStatus::Developing,
                    Some(output),
                    report.diagnostics,
                )
                .await
            }
            Err(err) => {
                self.retry_or_escalate(
                    task,
                    &attempt,
                    LimitKind::DevIterations,
                    TaskStatus::Developing,
                    None,
                    err.to_string(),
                )
                .await
            }
        }
    }

    async fn run_ci_fixing(&self, mut task: Task) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        let Some(branch) = task.branch_name().map(ToOwned::to_owned) else {
            let message = "task reached CI without a working branch".to_owned();
            return self.escalate(task, &attempt, message, None).await;
        };

        if task.pr_number().is_none() {
            let base = self.policy.git().base_branch(task.kind()).to_owned();
            match self
                .collaborators
                .vcs
                .open_pull_request(&task, &branch, &base)
                .await
            {
                Ok(pr) => {
                    info!(task_id = %task.id(), pr_number = pr.number, url = %pr.url, "opened pull request");
                    task.associate_pull_request(pr.number, pr.url, &*self.clock)?;
                }
                Err(err) => {
                    return self
                        .retry_or_escalate(
                            task,
                            &attempt,
                            LimitKind::CiRetries,
                            TaskStatus::CiFixing,
                            None,
                            err.to_string(),
                        )
                        .await;
                }
            }
        }

        if let Some(diagnostics) = self.latest_ci_failure(task.id(), &attempt).await? {
            let patch = match self
                .collaborators
                .code
                .generate_patch(&task, Some(&diagnostics))
                .await
            {
                Ok(patch) => patch,
                Err(err) => {
                    return self
                        .retry_or_escalate(
                            task,
                            &attempt,
                            LimitKind::CiRetries,
                            TaskStatus::CiFixing,
                            None,
                            err.to_string(),
                        )
                        .await;
                }
            };
            match self.collaborators.vcs.push_patch(&branch, &patch).await {
                Ok(commit) => {
                    debug!(task_id = %task.id(), commit = %commit, "pushed CI remediation");
                    task.record_commit(commit.as_str(), &*self.clock);
                }
                Err(err) => {
                    return self
                        .retry_or_escalate(
                            task,
                            &attempt,
                            LimitKind::CiRetries,
                            TaskStatus::CiFixing,
                            None,
                            err.to_string(),
                        )
                        .await;
                }
            }
        }

        match self.collaborators.checks.await_ci_verdict(&task).await {
            Ok(report) if report.passed => {
                let output = StageOutput::Checks {
                    passed: true,
                    diagnostics: report.diagnostics,
                };
                self.advance_to(task, &attempt, TaskStatus::Reviewing, output)
                    .await
            }
            Ok(report) => {
                let output = StageOutput::Checks {
                    passed: false,
                    diagnostics: report.diagnostics.clone(),
                };
                self.retry_or_escalate(
                    task,
                    &attempt,
                    LimitKind::CiRetries,
                    TaskStatus::CiFixing,
                    Some(output),
                    report.diagnostics,
                )
                .await
            }
            Err(err) => {
                self.retry_or_escalate(
                    task,
                    &attempt,
                    LimitKind::CiRetries,
                    TaskStatus::CiFixing,
                    None,
                    err.to_string(),
                )
                .await
            }
        }
    }

    async fn run_reviewing(&self, mut task: Task) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        match self.collaborators.vcs.await_review(&task).await {
            Ok(ReviewDecision::Approved { reviewer }) => {
                match self.collaborators.vcs.merge_pull_request(&task).await {
                    Ok(commit) => {
                        task.record_commit(commit.as_str(), &*self.clock);
                        let output = StageOutput::Review {
                            approved: true,
                            reviewer,
                        };
                        self.advance_to(task, &attempt, TaskStatus::DeployingStaging, output)
                            .await
                    }
                    Err(err) => {
                        let output = StageOutput::Review {
                            approved: true,
                            reviewer,
                        };
                        self.escalate(task, &attempt, err.to_string(), Some(output))
                            .await
                    }
                }
            }
            Ok(ReviewDecision::Rejected { reviewer, reason }) => {
                let message = format!("review rejected by {reviewer}: {reason}");
                let output = StageOutput::Review {
                    approved: false,
                    reviewer,
                };
                self.escalate(task, &attempt, message, Some(output)).await
            }
            Err(err) => self.escalate(task, &attempt, err.to_string(), None).await,
        }
    }

    async fn run_deploying(
        &self,
        mut task: Task,
        environment: Environment,
    ) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        match self.controller.run_deploy(&task, environment).await {
            Ok(output) => {
                if matches!(environment, Environment::Production) {
                    if let StageOutput::Deploy { commit, .. } = &output {
                        task.record_commit(commit.clone(), &*self.clock);
                    }
                    task.mark_deployed(&*self.clock)?;
                }
                let next = match environment {
                    Environment::Staging => TaskStatus::ObservingStaging,
                    Environment::Production => TaskStatus::ObservingProduction,
                };
                self.advance_to(task, &attempt, next, output).await
            }
            Err(err) => match environment {
                Environment::Staging => {
                    self.retry_or_escalate(
                        task,
                        &attempt,
                        LimitKind::DevIterations,
                        TaskStatus::DeployingStaging,
                        None,
                        err.to_string(),
                    )
                    .await
                }
                Environment::Production => {
                    // The deployed artifact lives on staging at this point.
                    let message = format!("production deploy failed: {err}");
                    match self.controller.run_rollback(Environment::Staging).await {
                        Ok(rollback) => {
                            warn!(task_id = %task.id(), error = %message, "rolled back after failed production deploy");
                            task.note_error(message.clone(), &*self.clock);
                            task.transition_to(TaskStatus::RolledBack, &*self.clock)?;
                            let output = StageOutput::Interrupted {
                                reason: message,
                                rollback: Some(rollback),
                            };
                            self.recorder
                                .complete(&task, attempt.id(), AttemptStatus::Failed, Some(output))
                                .await?;
                            Ok(task)
                        }
                        Err(rollback_err) => {
                            let full = format!("{message}; rollback failed: {rollback_err}");
                            self.escalate(task, &attempt, full, None).await
                        }
                    }
                }
            },
        }
    }

    async fn run_observing(
        &self,
        mut task: Task,
        environment: Environment,
    ) -> PipelineOrchestratorResult<Task> {
        let attempt = self.recorder.open(&task).await?;
        match self.controller.run_observation(&task, environment).await {
            Ok(outcome) => {
                let output = outcome.clone().into_output(environment);
                match outcome {
                    ObservationOutcome::Stable { .. } => {
                        let next = match environment {
                            Environment::Staging => TaskStatus::DeployingProduction,
                            Environment::Production => TaskStatus::Succeeded,
                        };
                        if matches!(environment, Environment::Production)
                            && task.deployed_at().is_none()
                        {
                            task.mark_deployed(&*self.clock)?;
                        }
                        self.advance_to(task, &attempt, next, output).await
                    }
                    ObservationOutcome::Breached {
                        peak_error_rate_percent,
                        ..
                    } => {
                        if matches!(environment, Environment::Production) {
                            task.mark_rolled_back(&*self.clock)?;
                        }
                        let message = format!(
                            "error rate in {environment} breached {}% (peak {peak_error_rate_percent}%), rolled back",
                            self.policy.error_rate_threshold()
                        );
                        warn!(task_id = %task.id(), environment = %environment, "deployment rolled back after breach");
                        task.note_error(message, &*self.clock);
                        task.transition_to(TaskStatus::RolledBack, &*self.clock)?;
                        self.recorder
                            .complete(&task, attempt.id(), AttemptStatus::Failed, Some(output))
                            .await?;
                        Ok(task)
                    }
                }
            }
            Err(err) => self.escalate(task, &attempt, err.to_string(), None).await,
        }
    }

    /// Commits a successful stage: task advances, attempt seals succeeded.
    async fn advance_to(
        &self,
        mut task: Task,
        attempt: &StageAttempt,
        next: TaskStatus,
        output: StageOutput,
    ) -> PipelineOrchestratorResult<Task> {
        task.transition_to(next, &*self.clock)?;
        self.recorder
            .complete(&task, attempt.id(), AttemptStatus::Succeeded, Some(output))
            .await?;
        info!(
            task_id = %task.id(),
            stage = attempt.stage().as_str(),
            status = next.as_str(),
            "stage succeeded"
        );
        Ok(task)
    }

    /// Fails the task: the error is recorded, the attempt seals failed.
    async fn escalate(
        &self,
        mut task: Task,
        attempt: &StageAttempt,
        message: String,
        output: Option<StageOutput>,
    ) -> PipelineOrchestratorResult<Task> {
        warn!(
            task_id = %task.id(),
            stage = attempt.stage().as_str(),
            error = %message,
            "stage failed, task failed"
        );
        task.record_failure(message, &*self.clock)?;
        self.recorder
            .complete(&task, attempt.id(), AttemptStatus::Failed, output)
            .await?;
        Ok(task)
    }

    /// Re-enters a retryable stage when budget remains, else fails the
    /// task with the exhausted ceiling in its error.
    async fn retry_or_escalate(
        &self,
        mut task: Task,
        attempt: &StageAttempt,
        kind: LimitKind,
        re_entry: TaskStatus,
        output: Option<StageOutput>,
        message: String,
    ) -> PipelineOrchestratorResult<Task> {
        let limits = self.policy.limits();
        let budget_left = match kind {
            LimitKind::DevIterations => limits.can_retry_dev(&task),
            LimitKind::CiRetries => limits.can_retry_ci(&task),
        };
        if budget_left {
            match kind {
                LimitKind::DevIterations => task.record_dev_iteration(limits, &*self.clock)?,
                LimitKind::CiRetries => task.record_ci_retry(limits, &*self.clock)?,
            }
            task.transition_to(re_entry, &*self.clock)?;
            self.recorder
                .complete(&task, attempt.id(), AttemptStatus::Failed, output)
                .await?;
            warn!(
                task_id = %task.id(),
                stage = attempt.stage().as_str(),
                status = re_entry.as_str(),
                error = %message,
                "stage failed, retrying"
            );
            Ok(task)
        } else {
            let ceiling = match kind {
                LimitKind::DevIterations => limits.max_dev_iterations(),
                LimitKind::CiRetries => limits.max_ci_retries(),
            };
            let escalation = format!("{kind} limit of {ceiling} exhausted: {message}");
            self.escalate(task, attempt, escalation, output).await
        }
    }

    /// Pulls the research summary for planning out of the ledger.
    async fn research_notes(&self, task_id: TaskId) -> PipelineOrchestratorResult<ResearchNotes> {
        let attempts = self.recorder.stage_history(task_id, Stage::Research).await?;
        let summary = attempts
            .iter()
            .rev()
            .find_map(|attempt| match attempt.output() {
                Some(StageOutput::Research { summary }) => Some(summary.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(ResearchNotes { summary })
    }

    /// Extracts the diagnostics of the newest failed attempt whose output
    /// carries any.
    ///
    /// Failed attempts sealed without a usable output, such as a crashed
    /// suite run, do not mask the diagnostics recorded before them.
    async fn prior_failure_note(
        &self,
        task_id: TaskId,
        current: &StageAttempt,
    ) -> PipelineOrchestratorResult<Option<String>> {
        let attempts = self.recorder.history(task_id).await?;
        Ok(attempts
            .iter()
            .rev()
            .filter(|attempt| attempt.id() != current.id())
            .filter(|attempt| matches!(attempt.status(), AttemptStatus::Failed))
            .find_map(|attempt| match attempt.output() {
                Some(StageOutput::Checks { diagnostics, .. }) => Some(diagnostics.clone()),
                Some(StageOutput::Interrupted { reason, .. }) => Some(reason.clone()),
                _ => None,
            }))
    }

    /// Extracts the diagnostics of the last red CI verdict, if the latest
    /// settled try at the stage failed on one.
    async fn latest_ci_failure(
        &self,
        task_id: TaskId,
        current: &StageAttempt,
    ) -> PipelineOrchestratorResult<Option<String>> {
        let attempts = self.recorder.stage_history(task_id, Stage::CiFixing).await?;
        Ok(attempts
            .iter()
            .rev()
            .filter(|attempt| attempt.id() != current.id())
            .find(|attempt| matches!(attempt.status(), AttemptStatus::Failed))
            .and_then(|attempt| match attempt.output() {
                Some(StageOutput::Checks {
                    passed: false,
                    diagnostics,
                }) => Some(diagnostics.clone()),
                _ => None,
            }))
    }
}

/// Returns the environment holding a live artifact for a status, if any.
///
/// Staging holds the artifact from the moment its observation starts until
/// production deploys; production holds it once its own observation starts.
const fn live_environment(status: TaskStatus) -> Option<Environment> {
    match status {
        TaskStatus::ObservingStaging | TaskStatus::DeployingProduction => {
            Some(Environment::Staging)
        }
        TaskStatus::ObservingProduction => Some(Environment::Production),
        _ => None,
    }
}
