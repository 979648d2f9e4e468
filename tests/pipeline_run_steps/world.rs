//! Shared world state for pipeline run BDD scenarios.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry::pipeline::{
    adapters::{TokioSleeper, memory::InMemoryPipelineRepository},
    domain::{
        DeployStrategy, Environment, PathCheck, PipelinePolicy, Plan, RiskLevel, Task, TaskStatus,
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
use std::sync::{Arc, Mutex, PoisonError};

/// Orchestrator type used by the BDD world.
pub type TestPipeline =
    PipelineOrchestrator<InMemoryPipelineRepository, DefaultClock, TokioSleeper>;

/// Code generator drafting plans at a configurable risk level.
pub struct StubPlanner {
    pub risk: Mutex<RiskLevel>,
}

#[async_trait]
impl CodeGenerator for StubPlanner {
    async fn research(&self, _task: &Task) -> CollaboratorResult<ResearchNotes> {
        Ok(ResearchNotes {
            summary: "the change is contained in one module".to_owned(),
        })
    }

    async fn draft_plan(&self, _task: &Task, _notes: &ResearchNotes) -> CollaboratorResult<Plan> {
        let level = *self.risk.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Plan::new(
            level,
            ["src/retry.rs"],
            "scenario plan",
            json!({"steps": ["apply the change"]}),
        ))
    }

    async fn generate_patch(
        &self,
        _task: &Task,
        _prior_failure: Option<&str>,
    ) -> CollaboratorResult<Patch> {
        Ok(Patch {
            diff: "--- a/src/retry.rs\n+++ b/src/retry.rs\n".to_owned(),
            summary: "scenario patch".to_owned(),
            files_changed: vec!["src/retry.rs".to_owned()],
        })
    }
}

/// Test runner whose suite and CI verdicts always pass.
pub struct GreenChecks;

#[async_trait]
impl TestRunner for GreenChecks {
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

/// Version-control client answering every call with a fixed happy result.
pub struct CooperativeVcs;

#[async_trait]
impl VersionControlClient for CooperativeVcs {
    async fn create_branch(&self, _name: &str, _base: &str) -> CollaboratorResult<()> {
        Ok(())
    }

    async fn push_patch(&self, _branch: &str, _patch: &Patch) -> CollaboratorResult<CommitId> {
        Ok(CommitId::new("abc1234"))
    }

    async fn open_pull_request(
        &self,
        _task: &Task,
        _branch: &str,
        _base: &str,
    ) -> CollaboratorResult<PullRequestRef> {
        Ok(PullRequestRef {
            number: 7,
            url: "https://git.example/gantry/pull/7".to_owned(),
        })
    }

    async fn await_review(&self, _task: &Task) -> CollaboratorResult<ReviewDecision> {
        Ok(ReviewDecision::Approved {
            reviewer: "reviewer".to_owned(),
        })
    }

    async fn merge_pull_request(&self, _task: &Task) -> CollaboratorResult<CommitId> {
        Ok(CommitId::new("merged777"))
    }

    async fn promote(&self, _from: &str, _to: &str) -> CollaboratorResult<CommitId> {
        Ok(CommitId::new("prodhead9"))
    }
}

/// Approval client returning a configurable human decision.
pub struct StubApprovals {
    pub decision: Mutex<ApprovalDecision>,
}

#[async_trait]
impl ApprovalClient for StubApprovals {
    async fn await_decision(
        &self,
        _task: &Task,
        _path_check: &PathCheck,
    ) -> CollaboratorResult<ApprovalDecision> {
        Ok(self
            .decision
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// Deploy client recording releases and rollbacks.
pub struct RecordingDeploys {
    pub deployed: Mutex<Vec<Environment>>,
    pub rolled_back: Mutex<Vec<(Environment, bool)>>,
}

#[async_trait]
impl DeployClient for RecordingDeploys {
    async fn deploy(
        &self,
        environment: Environment,
        _strategy: DeployStrategy,
        _commit: &str,
    ) -> CollaboratorResult<DeployReceipt> {
        self.deployed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(environment);
        Ok(DeployReceipt {
            target: format!("{environment}-host"),
        })
    }

    async fn rollback(
        &self,
        environment: Environment,
        revert_migrations: bool,
    ) -> CollaboratorResult<RollbackReceipt> {
        self.rolled_back
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((environment, revert_migrations));
        Ok(RollbackReceipt {
            migrations_reverted: revert_migrations,
        })
    }
}

/// Metrics client reporting a configurable error rate.
pub struct StubMetrics {
    pub rate: Mutex<f64>,
}

#[async_trait]
impl MetricsClient for StubMetrics {
    async fn error_rate_percent(
        &self,
        _environment: Environment,
        _since: DateTime<Utc>,
    ) -> CollaboratorResult<f64> {
        Ok(*self.rate.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Scenario world for pipeline run behaviour tests.
pub struct PipelineRunWorld {
    pub repository: Arc<InMemoryPipelineRepository>,
    pub planner: Arc<StubPlanner>,
    pub approvals: Arc<StubApprovals>,
    pub metrics: Arc<StubMetrics>,
    pub deploys: Arc<RecordingDeploys>,
    pub policy: Option<PipelinePolicy>,
    pub pipeline: Option<TestPipeline>,
    pub task: Option<Task>,
    pub outcome: Option<TaskStatus>,
}

impl PipelineRunWorld {
    /// Creates a world with healthy collaborators and no policy chosen yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            repository: Arc::new(InMemoryPipelineRepository::new()),
            planner: Arc::new(StubPlanner {
                risk: Mutex::new(RiskLevel::Low),
            }),
            approvals: Arc::new(StubApprovals {
                decision: Mutex::new(ApprovalDecision::Approved {
                    by: "owner".to_owned(),
                }),
            }),
            metrics: Arc::new(StubMetrics {
                rate: Mutex::new(0.0),
            }),
            deploys: Arc::new(RecordingDeploys {
                deployed: Mutex::new(Vec::new()),
                rolled_back: Mutex::new(Vec::new()),
            }),
            policy: None,
            pipeline: None,
            task: None,
            outcome: None,
        }
    }

    /// Bundles the stub collaborators for the orchestrator.
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            code: Arc::clone(&self.planner) as Arc<dyn CodeGenerator>,
            checks: Arc::new(GreenChecks) as Arc<dyn TestRunner>,
            vcs: Arc::new(CooperativeVcs) as Arc<dyn VersionControlClient>,
            approvals: Arc::clone(&self.approvals) as Arc<dyn ApprovalClient>,
            deploys: Arc::clone(&self.deploys) as Arc<dyn DeployClient>,
            metrics: Arc::clone(&self.metrics) as Arc<dyn MetricsClient>,
        }
    }
}

impl Default for PipelineRunWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> PipelineRunWorld {
    PipelineRunWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
