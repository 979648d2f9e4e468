//! Shared fixtures for pipeline tests: scripted collaborator fakes, a
//! deterministic clock, and a harness bundling them over the in-memory
//! repository.

use crate::pipeline::{
    adapters::memory::InMemoryPipelineRepository,
    domain::{
        DeployStrategy, Environment, PathCheck, PipelinePolicy, Plan, RiskLevel, Task, WorkerId,
    },
    ports::{
        ApprovalClient, ApprovalDecision, CheckReport, CodeGenerator, CollaboratorResult,
        CommitId, DeployClient, DeployReceipt, MetricsClient, Patch, PullRequestRef,
        ResearchNotes, ReviewDecision, RollbackReceipt, Sleeper, TestRunner,
        VersionControlClient,
    },
    services::{Collaborators, PipelineOrchestrator},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use mockable::{Clock, DefaultClock};
use serde_json::json;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Queue of scripted responses consumed front to back; when drained, a
/// per-call default answers instead.
pub struct Script<T> {
    responses: Mutex<VecDeque<CollaboratorResult<T>>>,
}

impl<T> Script<T> {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, response: CollaboratorResult<T>) {
        self.responses
            .lock()
            .expect("script lock")
            .push_back(response);
    }

    pub fn next_or(&self, default: impl FnOnce() -> T) -> CollaboratorResult<T> {
        self.responses
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok(default()))
    }
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn passing_checks() -> CheckReport {
    CheckReport {
        passed: true,
        diagnostics: String::new(),
    }
}

pub fn failing_checks(diagnostics: &str) -> CheckReport {
    CheckReport {
        passed: false,
        diagnostics: diagnostics.to_owned(),
    }
}

pub fn low_risk_plan() -> Plan {
    Plan::new(
        RiskLevel::Low,
        ["src/lib.rs"],
        "tighten retry backoff",
        json!({"steps": ["adjust the backoff constant"]}),
    )
}

/// Code generator whose research, plans, and patches are scripted.
#[derive(Default)]
pub struct ScriptedCodeGenerator {
    pub research: Script<ResearchNotes>,
    pub plans: Script<Plan>,
    pub patches: Script<Patch>,
    /// `prior_failure` arguments seen by [`CodeGenerator::generate_patch`].
    pub revision_prompts: Mutex<Vec<Option<String>>>,
}

impl ScriptedCodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedCodeGenerator {
    async fn research(&self, _task: &Task) -> CollaboratorResult<ResearchNotes> {
        self.research.next_or(|| ResearchNotes {
            summary: "retry backoff is hard-coded in the client".to_owned(),
        })
    }

    async fn draft_plan(&self, _task: &Task, _notes: &ResearchNotes) -> CollaboratorResult<Plan> {
        self.plans.next_or(low_risk_plan)
    }

    async fn generate_patch(
        &self,
        _task: &Task,
        prior_failure: Option<&str>,
    ) -> CollaboratorResult<Patch> {
        self.revision_prompts
            .lock()
            .expect("revision prompt lock")
            .push(prior_failure.map(ToOwned::to_owned));
        self.patches.next_or(|| Patch {
            diff: "--- a/src/lib.rs\n+++ b/src/lib.rs\n".to_owned(),
            summary: "tighten retry backoff".to_owned(),
            files_changed: vec!["src/lib.rs".to_owned()],
        })
    }
}

/// Test runner whose suite and CI verdicts are scripted.
#[derive(Default)]
pub struct ScriptedChecks {
    pub suite: Script<CheckReport>,
    pub ci: Script<CheckReport>,
}

impl ScriptedChecks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestRunner for ScriptedChecks {
    async fn run_suite(&self, _task: &Task) -> CollaboratorResult<CheckReport> {
        self.suite.next_or(passing_checks)
    }

    async fn await_ci_verdict(&self, _task: &Task) -> CollaboratorResult<CheckReport> {
        self.ci.next_or(passing_checks)
    }
}

/// Version-control client recording branch and push activity.
#[derive(Default)]
pub struct ScriptedVcs {
    pub branch_results: Script<()>,
    pub pushes: Script<CommitId>,
    pub pull_requests: Script<PullRequestRef>,
    pub reviews: Script<ReviewDecision>,
    pub merges: Script<CommitId>,
    pub promotions: Script<CommitId>,
    /// `(name, base)` pairs passed to `create_branch`.
    pub created_branches: Mutex<Vec<(String, String)>>,
    /// Branch names passed to `push_patch`.
    pub pushed_branches: Mutex<Vec<String>>,
    /// `(from, to)` pairs passed to `promote`.
    pub promoted: Mutex<Vec<(String, String)>>,
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionControlClient for ScriptedVcs {
    async fn create_branch(&self, name: &str, base: &str) -> CollaboratorResult<()> {
        self.created_branches
            .lock()
            .expect("created branch lock")
            .push((name.to_owned(), base.to_owned()));
        self.branch_results.next_or(|| ())
    }

    async fn push_patch(&self, branch: &str, _patch: &Patch) -> CollaboratorResult<CommitId> {
        self.pushed_branches
            .lock()
            .expect("pushed branch lock")
            .push(branch.to_owned());
        self.pushes.next_or(|| CommitId::new("abc1234"))
    }

    async fn open_pull_request(
        &self,
        _task: &Task,
        _branch: &str,
        _base: &str,
    ) -> CollaboratorResult<PullRequestRef> {
        self.pull_requests.next_or(|| PullRequestRef {
            number: 7,
            url: "https://git.example/gantry/pull/7".to_owned(),
        })
    }

    async fn await_review(&self, _task: &Task) -> CollaboratorResult<ReviewDecision> {
        self.reviews.next_or(|| ReviewDecision::Approved {
            reviewer: "reviewer".to_owned(),
        })
    }

    async fn merge_pull_request(&self, _task: &Task) -> CollaboratorResult<CommitId> {
        self.merges.next_or(|| CommitId::new("merged777"))
    }

    async fn promote(&self, from: &str, to: &str) -> CollaboratorResult<CommitId> {
        self.promoted
            .lock()
            .expect("promotion lock")
            .push((from.to_owned(), to.to_owned()));
        self.promotions.next_or(|| CommitId::new("prodhead9"))
    }
}

/// Deploy client recording releases and rollbacks.
#[derive(Default)]
pub struct ScriptedDeploys {
    pub deploys: Script<DeployReceipt>,
    pub rollbacks: Script<RollbackReceipt>,
    /// `(environment, strategy, commit)` triples passed to `deploy`.
    pub deployed: Mutex<Vec<(Environment, DeployStrategy, String)>>,
    /// `(environment, revert_migrations)` pairs passed to `rollback`.
    pub rolled_back: Mutex<Vec<(Environment, bool)>>,
}

impl ScriptedDeploys {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeployClient for ScriptedDeploys {
    async fn deploy(
        &self,
        environment: Environment,
        strategy: DeployStrategy,
        commit: &str,
    ) -> CollaboratorResult<DeployReceipt> {
        self.deployed
            .lock()
            .expect("deploy lock")
            .push((environment, strategy, commit.to_owned()));
        self.deploys.next_or(|| DeployReceipt {
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
            .expect("rollback lock")
            .push((environment, revert_migrations));
        self.rollbacks.next_or(|| RollbackReceipt {
            migrations_reverted: revert_migrations,
        })
    }
}

/// Metrics client returning scripted error rates, healthy by default.
#[derive(Default)]
pub struct ScriptedMetrics {
    pub rates: Script<f64>,
    /// `(environment, since)` pairs passed to `error_rate_percent`, one
    /// entry per poll.
    pub polled: Mutex<Vec<(Environment, DateTime<Utc>)>>,
}

impl ScriptedMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsClient for ScriptedMetrics {
    async fn error_rate_percent(
        &self,
        environment: Environment,
        since: DateTime<Utc>,
    ) -> CollaboratorResult<f64> {
        self.polled
            .lock()
            .expect("poll lock")
            .push((environment, since));
        self.rates.next_or(|| 0.0)
    }
}

/// Approval client recording the path-guard verdict it was shown.
#[derive(Default)]
pub struct ScriptedApprovals {
    pub decisions: Script<ApprovalDecision>,
    /// Path checks passed to `await_decision`.
    pub gates: Mutex<Vec<PathCheck>>,
}

impl ScriptedApprovals {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalClient for ScriptedApprovals {
    async fn await_decision(
        &self,
        _task: &Task,
        path_check: &PathCheck,
    ) -> CollaboratorResult<ApprovalDecision> {
        self.gates
            .lock()
            .expect("gate lock")
            .push(path_check.clone());
        self.decisions.next_or(|| ApprovalDecision::Approved {
            by: "owner".to_owned(),
        })
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Default)]
pub struct TestSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl TestSleeper {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sleeper for TestSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().expect("sleeper lock").push(duration);
    }
}

/// Clock that advances by a fixed step on every UTC reading, making
/// observation-window deadlines deterministic.
pub struct SteppingClock {
    now: Mutex<DateTime<Utc>>,
    step: ChronoDuration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: ChronoDuration) -> Self {
        Self {
            now: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().expect("clock lock");
        let current = *now;
        *now = current + self.step;
        current
    }
}

pub fn worker(name: &str) -> WorkerId {
    WorkerId::new(name).expect("valid worker id")
}

/// In-memory repository plus one of every scripted collaborator.
pub struct PipelineHarness {
    pub repository: Arc<InMemoryPipelineRepository>,
    pub code: Arc<ScriptedCodeGenerator>,
    pub checks: Arc<ScriptedChecks>,
    pub vcs: Arc<ScriptedVcs>,
    pub approvals: Arc<ScriptedApprovals>,
    pub deploys: Arc<ScriptedDeploys>,
    pub metrics: Arc<ScriptedMetrics>,
    pub sleeper: Arc<TestSleeper>,
}

impl PipelineHarness {
    pub fn new() -> Self {
        Self {
            repository: Arc::new(InMemoryPipelineRepository::new()),
            code: Arc::new(ScriptedCodeGenerator::new()),
            checks: Arc::new(ScriptedChecks::new()),
            vcs: Arc::new(ScriptedVcs::new()),
            approvals: Arc::new(ScriptedApprovals::new()),
            deploys: Arc::new(ScriptedDeploys::new()),
            metrics: Arc::new(ScriptedMetrics::new()),
            sleeper: Arc::new(TestSleeper::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            code: Arc::clone(&self.code) as Arc<dyn CodeGenerator>,
            checks: Arc::clone(&self.checks) as Arc<dyn TestRunner>,
            vcs: Arc::clone(&self.vcs) as Arc<dyn VersionControlClient>,
            approvals: Arc::clone(&self.approvals) as Arc<dyn ApprovalClient>,
            deploys: Arc::clone(&self.deploys) as Arc<dyn DeployClient>,
            metrics: Arc::clone(&self.metrics) as Arc<dyn MetricsClient>,
        }
    }

    pub fn orchestrator(
        &self,
        policy: PipelinePolicy,
    ) -> PipelineOrchestrator<InMemoryPipelineRepository, DefaultClock, TestSleeper> {
        self.orchestrator_for(policy, "worker-a")
    }

    pub fn orchestrator_for(
        &self,
        policy: PipelinePolicy,
        worker_name: &str,
    ) -> PipelineOrchestrator<InMemoryPipelineRepository, DefaultClock, TestSleeper> {
        PipelineOrchestrator::new(
            Arc::clone(&self.repository),
            self.collaborators(),
            Arc::clone(&self.sleeper),
            policy,
            Arc::new(DefaultClock),
            worker(worker_name),
        )
    }
}

impl Default for PipelineHarness {
    fn default() -> Self {
        Self::new()
    }
}
