//! Shared test helpers for in-memory pipeline integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry::pipeline::{
    adapters::{TokioSleeper, memory::InMemoryPipelineRepository},
    domain::{
        AllowedTriggers, DeployStrategy, Environment, PathCheck, PipelinePolicy, Plan, RiskLevel,
        Task, TaskTrigger, WorkerId,
    },
    ports::{
        ApprovalClient, ApprovalDecision, CheckReport, CodeGenerator, CollaboratorResult,
        CommitId, DeployClient, DeployReceipt, MetricsClient, Patch, PullRequestRef,
        ResearchNotes, ReviewDecision, RollbackReceipt, TestRunner, VersionControlClient,
    },
    services::{Collaborators, PipelineOrchestrator},
};
use mockable::DefaultClock;
use rstest::fixture;
use serde_json::json;
use std::io;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Orchestrator type under test.
pub type TestPipeline =
    PipelineOrchestrator<InMemoryPipelineRepository, DefaultClock, TokioSleeper>;

/// Single collaborator answering every port with a fixed green-path
/// response: low-risk plan, passing checks, approving review, healthy
/// metrics.
pub struct GreenPathHub;

#[async_trait]
impl CodeGenerator for GreenPathHub {
    async fn research(&self, _task: &Task) -> CollaboratorResult<ResearchNotes> {
        Ok(ResearchNotes {
            summary: "one cache module is affected".to_owned(),
        })
    }

    async fn draft_plan(&self, _task: &Task, _notes: &ResearchNotes) -> CollaboratorResult<Plan> {
        Ok(Plan::new(
            RiskLevel::Low,
            ["src/cache.rs"],
            "swap the eviction order",
            json!({"steps": ["swap the comparator", "extend the unit tests"]}),
        ))
    }

    async fn generate_patch(
        &self,
        _task: &Task,
        _prior_failure: Option<&str>,
    ) -> CollaboratorResult<Patch> {
        Ok(Patch {
            diff: "--- a/src/cache.rs\n+++ b/src/cache.rs\n".to_owned(),
            summary: "swap the eviction order".to_owned(),
            files_changed: vec!["src/cache.rs".to_owned()],
        })
    }
}

#[async_trait]
impl TestRunner for GreenPathHub {
    async fn run_suite(&self, _task: &Task) -> CollaboratorResult<CheckReport> {
        Ok(CheckReport {
            passed: true,
            diagnostics: String::new(),
        })
    }

    async fn await_ci_verdict(&self, _task: &Task) -> CollaboratorResult<CheckReport> {
        Ok(CheckReport {
            passed: true,
            diagnostics: String::new(),
        })
    }
}

#[async_trait]
impl VersionControlClient for GreenPathHub {
    async fn create_branch(&self, _name: &str, _base: &str) -> CollaboratorResult<()> {
        Ok(())
    }

    async fn push_patch(&self, _branch: &str, _patch: &Patch) -> CollaboratorResult<CommitId> {
        Ok(CommitId::new("0a1b2c3"))
    }

    async fn open_pull_request(
        &self,
        _task: &Task,
        _branch: &str,
        _base: &str,
    ) -> CollaboratorResult<PullRequestRef> {
        Ok(PullRequestRef {
            number: 41,
            url: "https://git.example/gantry/pull/41".to_owned(),
        })
    }

    async fn await_review(&self, _task: &Task) -> CollaboratorResult<ReviewDecision> {
        Ok(ReviewDecision::Approved {
            reviewer: "reviewer".to_owned(),
        })
    }

    async fn merge_pull_request(&self, _task: &Task) -> CollaboratorResult<CommitId> {
        Ok(CommitId::new("4d5e6f7"))
    }

    async fn promote(&self, _from: &str, _to: &str) -> CollaboratorResult<CommitId> {
        Ok(CommitId::new("8f9e0d1"))
    }
}

#[async_trait]
impl ApprovalClient for GreenPathHub {
    async fn await_decision(
        &self,
        _task: &Task,
        _path_check: &PathCheck,
    ) -> CollaboratorResult<ApprovalDecision> {
        Ok(ApprovalDecision::Approved {
            by: "owner".to_owned(),
        })
    }
}

#[async_trait]
impl DeployClient for GreenPathHub {
    async fn deploy(
        &self,
        environment: Environment,
        _strategy: DeployStrategy,
        _commit: &str,
    ) -> CollaboratorResult<DeployReceipt> {
        Ok(DeployReceipt {
            target: format!("{environment}-host"),
        })
    }

    async fn rollback(
        &self,
        _environment: Environment,
        revert_migrations: bool,
    ) -> CollaboratorResult<RollbackReceipt> {
        Ok(RollbackReceipt {
            migrations_reverted: revert_migrations,
        })
    }
}

#[async_trait]
impl MetricsClient for GreenPathHub {
    async fn error_rate_percent(
        &self,
        _environment: Environment,
        _since: DateTime<Utc>,
    ) -> CollaboratorResult<f64> {
        Ok(0.0)
    }
}

/// Provides a tokio runtime for async operations in tests.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created.
#[fixture]
pub fn runtime() -> io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// Provides a fresh shared repository for each test.
#[fixture]
pub fn repo() -> Arc<InMemoryPipelineRepository> {
    Arc::new(InMemoryPipelineRepository::new())
}

/// Provides a policy that admits any requester and skips observation
/// windows.
#[fixture]
pub fn policy() -> PipelinePolicy {
    PipelinePolicy::default()
        .with_allowed_triggers(AllowedTriggers::All)
        .with_observation_minutes(0, 0)
}

/// Builds an orchestrator bound to the shared repository.
///
/// # Errors
///
/// Returns an error if the worker name is rejected.
pub fn pipeline(
    repo: &Arc<InMemoryPipelineRepository>,
    policy: PipelinePolicy,
    worker_name: &str,
) -> Result<TestPipeline, Box<dyn std::error::Error + Send + Sync>> {
    let hub = Arc::new(GreenPathHub);
    let collaborators = Collaborators {
        code: Arc::clone(&hub) as Arc<dyn CodeGenerator>,
        checks: Arc::clone(&hub) as Arc<dyn TestRunner>,
        vcs: Arc::clone(&hub) as Arc<dyn VersionControlClient>,
        approvals: Arc::clone(&hub) as Arc<dyn ApprovalClient>,
        deploys: Arc::clone(&hub) as Arc<dyn DeployClient>,
        metrics: Arc::clone(&hub) as Arc<dyn MetricsClient>,
    };
    Ok(PipelineOrchestrator::new(
        Arc::clone(repo),
        collaborators,
        Arc::new(TokioSleeper),
        policy,
        Arc::new(DefaultClock),
        WorkerId::new(worker_name)?,
    ))
}

/// Builds a submission trigger with a fixed requester.
///
/// # Errors
///
/// Returns an error if the trigger fields are rejected.
pub fn trigger(intent: &str) -> Result<TaskTrigger, Box<dyn std::error::Error + Send + Sync>> {
    Ok(TaskTrigger::new(intent, "platform-team")?)
}
