//! Deploy execution and observation windows for staged releases.

use crate::pipeline::{
    domain::{Environment, PipelinePolicy, RollbackRecord, StageOutput, Task, TaskId},
    ports::{CollaboratorError, DeployClient, MetricsClient, Sleeper, VersionControlClient},
};
use chrono::Duration as ChronoDuration;
use mockable::Clock;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

/// Service-level errors for deploy and observation operations.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The task carries no commit to release.
    #[error("task {0} has no recorded commit to deploy")]
    MissingCommit(TaskId),
    /// A deploy, metrics, or version-control collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Result type for deploy and observation operations.
pub type DeploymentResult<T> = Result<T, DeploymentError>;

/// Verdict of one timed observation window.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationOutcome {
    /// The window elapsed with every poll at or under the threshold.
    Stable {
        /// Number of metric polls performed.
        polls: u32,
        /// Highest error rate seen during the window.
        peak_error_rate_percent: f64,
    },
    /// A poll breached the threshold and the environment was reverted.
    Breached {
        /// Number of metric polls performed, including the breaching one.
        polls: u32,
        /// Highest error rate seen during the window.
        peak_error_rate_percent: f64,
        /// The compensating rollback that was run.
        rollback: RollbackRecord,
    },
}

impl ObservationOutcome {
    /// Returns whether the window ended in a breach.
    #[must_use]
    pub const fn is_breached(&self) -> bool {
        matches!(self, Self::Breached { .. })
    }

    /// Converts the verdict into the attempt output recorded for it.
    #[must_use]
    pub fn into_output(self, environment: Environment) -> StageOutput {
        match self {
            Self::Stable {
                polls,
                peak_error_rate_percent,
            } => StageOutput::Observation {
                environment,
                polls,
                peak_error_rate_percent,
                breached: false,
                rollback: None,
            },
            Self::Breached {
                polls,
                peak_error_rate_percent,
                rollback,
            } => StageOutput::Observation {
                environment,
                polls,
                peak_error_rate_percent,
                breached: true,
                rollback: Some(rollback),
            },
        }
    }
}

/// Runs releases, watches them settle, and reverts them when they do not.
///
/// The controller performs the mechanics of the four release stages; it
/// never touches task state, so the orchestrator alone decides what a
/// verdict means for the lifecycle.
#[derive(Clone)]
pub struct DeploymentController<C, S>
where
    C: Clock + Send + Sync,
    S: Sleeper,
{
    vcs: Arc<dyn VersionControlClient>,
    deploys: Arc<dyn DeployClient>,
    metrics: Arc<dyn MetricsClient>,
    sleeper: Arc<S>,
    clock: Arc<C>,
    policy: Arc<PipelinePolicy>,
}

impl<C, S> DeploymentController<C, S>
where
    C: Clock + Send + Sync,
    S: Sleeper,
{
    /// Creates a new deployment controller.
    #[must_use]
    pub const fn new(
        vcs: Arc<dyn VersionControlClient>,
        deploys: Arc<dyn DeployClient>,
        metrics: Arc<dyn MetricsClient>,
        sleeper: Arc<S>,
        clock: Arc<C>,
        policy: Arc<PipelinePolicy>,
    ) -> Self {
        Self {
            vcs,
            deploys,
            metrics,
            sleeper,
            clock,
            policy,
        }
    }

    /// Releases the task's artifact into the environment.
    ///
    /// Staging deploys the task's recorded commit directly. Production
    /// first promotes the integration branch into the production branch
    /// and deploys the promoted head, which the returned output carries as
    /// its commit.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::MissingCommit`] when the task has no
    /// recorded commit and [`DeploymentError::Collaborator`] when the
    /// promotion or the release fails.
    pub async fn run_deploy(
        &self,
        task: &Task,
        environment: Environment,
    ) -> DeploymentResult<StageOutput> {
        let recorded = task
            .commit_sha()
            .ok_or_else(|| DeploymentError::MissingCommit(task.id()))?;
        let commit = match environment {
            Environment::Staging => recorded.to_owned(),
            Environment::Production => {
                let git = self.policy.git();
                let head = self
                    .vcs
                    .promote(git.develop_branch(), git.production_branch())
                    .await?;
                head.as_str().to_owned()
            }
        };

        let strategy = self.policy.deploy_strategy();
        let receipt = self.deploys.deploy(environment, strategy, &commit).await?;
        info!(
            task_id = %task.id(),
            environment = %environment,
            strategy = %strategy,
            target = %receipt.target,
            "deployed"
        );
        Ok(StageOutput::Deploy {
            environment,
            strategy,
            target: receipt.target,
            commit,
        })
    }

    /// Watches the environment for the configured window after a deploy.
    ///
    /// The first poll runs immediately; further polls follow the
    /// configured cadence until the window deadline passes, and the
    /// deadline always ends the window even when a sleep overshoots it.
    /// Every poll reads the error rate accumulated since the window
    /// opened, so earlier traffic cannot dilute a regression. A poll
    /// above the error-rate threshold aborts the window and runs the
    /// compensating rollback at once. A zero-length window declares the
    /// environment stable without polling.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Collaborator`] when a metrics poll or
    /// the breach rollback fails; the deployment is left in place for a
    /// human in that case.
    pub async fn run_observation(
        &self,
        task: &Task,
        environment: Environment,
    ) -> DeploymentResult<ObservationOutcome> {
        let threshold = self.policy.error_rate_threshold();
        let minutes = self.policy.observation_minutes(environment);
        let cadence = Duration::from_secs(u64::from(self.policy.observation_poll_seconds()));
        let opened = self.clock.utc();
        let deadline = opened + ChronoDuration::minutes(i64::from(minutes));

        let mut polls: u32 = 0;
        let mut peak: f64 = 0.0;
        while self.clock.utc() < deadline {
            let rate = self.metrics.error_rate_percent(environment, opened).await?;
            polls += 1;
            if rate > peak {
                peak = rate;
            }
            if rate > threshold {
                warn!(
                    task_id = %task.id(),
                    environment = %environment,
                    error_rate_percent = rate,
                    threshold_percent = threshold,
                    "error rate breached threshold, rolling back"
                );
                let rollback = self.run_rollback(environment).await?;
                return Ok(ObservationOutcome::Breached {
                    polls,
                    peak_error_rate_percent: peak,
                    rollback,
                });
            }
            self.sleeper.sleep(cadence).await;
        }

        info!(
            task_id = %task.id(),
            environment = %environment,
            polls,
            peak_error_rate_percent = peak,
            "observation window elapsed clean"
        );
        Ok(ObservationOutcome::Stable {
            polls,
            peak_error_rate_percent: peak,
        })
    }

    /// Reverts the environment to its prior known-good state.
    ///
    /// Database migrations are reverted with the code when the policy says
    /// so.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Collaborator`] when the revert fails.
    pub async fn run_rollback(&self, environment: Environment) -> DeploymentResult<RollbackRecord> {
        let receipt = self
            .deploys
            .rollback(environment, self.policy.rollback_migrations())
            .await?;
        info!(
            environment = %environment,
            migrations_reverted = receipt.migrations_reverted,
            "rolled back deployment"
        );
        Ok(RollbackRecord {
            environment,
            migrations_reverted: receipt.migrations_reverted,
        })
    }
}
