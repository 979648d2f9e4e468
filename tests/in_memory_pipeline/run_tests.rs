//! Full pipeline runs over the public orchestrator API.

use crate::in_memory_pipeline::helpers::{pipeline, policy, repo, runtime, trigger};
use gantry::pipeline::{
    adapters::memory::InMemoryPipelineRepository,
    domain::{AttemptStatus, PipelinePolicy, Stage, TaskStatus},
    ports::PipelineRepository,
};
use rstest::rstest;
use std::io;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Tests that submission stores a research-status task with the trigger
/// fields.
#[rstest]
fn submission_stores_a_research_task(
    runtime: io::Result<Runtime>,
    repo: Arc<InMemoryPipelineRepository>,
    policy: PipelinePolicy,
) {
    let rt = runtime.expect("runtime creation");
    let pipeline = pipeline(&repo, policy, "worker-1").expect("pipeline construction");

    let task = rt
        .block_on(pipeline.submit(trigger("reorder cache eviction").expect("trigger")))
        .expect("submission");

    assert_eq!(task.status(), TaskStatus::Research);
    assert_eq!(task.intent(), "reorder cache eviction");
    assert_eq!(task.requested_by(), "platform-team");

    let stored = rt
        .block_on(repo.find_task(task.id()))
        .expect("lookup")
        .expect("task persisted");
    assert_eq!(stored, task, "the stored task should match the returned one");
}

/// Tests that a green-path run lands in `Succeeded` with the production
/// head recorded.
#[rstest]
fn a_full_run_lands_in_succeeded(
    runtime: io::Result<Runtime>,
    repo: Arc<InMemoryPipelineRepository>,
    policy: PipelinePolicy,
) {
    let rt = runtime.expect("runtime creation");
    let pipeline = pipeline(&repo, policy, "worker-1").expect("pipeline construction");
    let task = rt
        .block_on(pipeline.submit(trigger("reorder cache eviction").expect("trigger")))
        .expect("submission");

    let status = rt.block_on(pipeline.run(task.id())).expect("run");
    assert_eq!(status, TaskStatus::Succeeded);

    let stored = rt
        .block_on(repo.find_task(task.id()))
        .expect("lookup")
        .expect("task persisted");
    assert_eq!(stored.status(), TaskStatus::Succeeded);
    assert_eq!(stored.commit_sha(), Some("8f9e0d1"));
    assert_eq!(stored.pr_number(), Some(41));
    assert!(
        stored.deployed_at().is_some(),
        "the production deploy should be timestamped"
    );
    assert!(stored.error().is_none(), "a green run records no error");
}

/// Tests that the ledger holds one succeeded attempt per stage, in
/// pipeline order, with no approval attempt for an auto-approved plan.
#[rstest]
fn the_ledger_records_every_stage_in_order(
    runtime: io::Result<Runtime>,
    repo: Arc<InMemoryPipelineRepository>,
    policy: PipelinePolicy,
) {
    let rt = runtime.expect("runtime creation");
    let pipeline = pipeline(&repo, policy, "worker-1").expect("pipeline construction");
    let task = rt
        .block_on(pipeline.submit(trigger("reorder cache eviction").expect("trigger")))
        .expect("submission");

    rt.block_on(pipeline.run(task.id())).expect("run");

    let attempts = rt
        .block_on(repo.attempts_for_task(task.id()))
        .expect("ledger");
    assert!(
        attempts
            .iter()
            .all(|attempt| attempt.status() == AttemptStatus::Succeeded),
        "every attempt should settle as succeeded"
    );
    let stages: Vec<Stage> = attempts.iter().map(|attempt| attempt.stage()).collect();
    assert_eq!(
        stages,
        [
            Stage::Research,
            Stage::Planning,
            Stage::Developing,
            Stage::Testing,
            Stage::CiFixing,
            Stage::Reviewing,
            Stage::DeployingStaging,
            Stage::ObservingStaging,
            Stage::DeployingProduction,
            Stage::ObservingProduction,
        ]
    );
}
