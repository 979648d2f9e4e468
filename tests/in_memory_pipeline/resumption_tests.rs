//! Claim handling and crash recovery over the in-memory repository.

use crate::in_memory_pipeline::helpers::{pipeline, policy, repo, runtime, trigger};
use gantry::pipeline::{
    adapters::memory::InMemoryPipelineRepository,
    domain::{AttemptStatus, PipelinePolicy, Stage, StageOutput, TaskStatus, WorkerId},
    ports::{PipelineRepository, PipelineRepositoryError},
    services::StageRecorder,
};
use mockable::DefaultClock;
use rstest::rstest;
use std::io;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Tests that a held claim rejects rival workers but tolerates the
/// holder re-claiming.
#[rstest]
fn a_held_claim_rejects_other_workers(
    runtime: io::Result<Runtime>,
    repo: Arc<InMemoryPipelineRepository>,
    policy: PipelinePolicy,
) {
    let rt = runtime.expect("runtime creation");
    let pipeline = pipeline(&repo, policy, "worker-a").expect("pipeline construction");
    let task = rt
        .block_on(pipeline.submit(trigger("reorder cache eviction").expect("trigger")))
        .expect("submission");

    let holder = WorkerId::new("worker-a").expect("worker id");
    let rival = WorkerId::new("worker-b").expect("worker id");
    rt.block_on(repo.claim_task(task.id(), &holder))
        .expect("first claim");
    rt.block_on(repo.claim_task(task.id(), &holder))
        .expect("re-claim by the holder");

    let contested = rt.block_on(repo.claim_task(task.id(), &rival));
    assert!(
        matches!(
            contested,
            Err(PipelineRepositoryError::TaskAlreadyClaimed { held_by, .. }) if held_by == holder
        ),
        "a rival claim should name the holder"
    );
}

/// Tests that resume breaks a dead worker's claim, seals its orphaned
/// attempt, and finishes the run.
#[rstest]
fn resume_rescues_a_dead_workers_task(
    runtime: io::Result<Runtime>,
    repo: Arc<InMemoryPipelineRepository>,
    policy: PipelinePolicy,
) {
    let rt = runtime.expect("runtime creation");
    let original = pipeline(&repo, policy.clone(), "worker-dead").expect("pipeline construction");
    let task = rt
        .block_on(original.submit(trigger("reorder cache eviction").expect("trigger")))
        .expect("submission");

    // A crashed worker leaves its claim and a running attempt behind.
    let holder = WorkerId::new("worker-dead").expect("worker id");
    rt.block_on(repo.claim_task(task.id(), &holder))
        .expect("claim");
    let recorder = StageRecorder::new(Arc::clone(&repo), Arc::new(DefaultClock));
    rt.block_on(recorder.open(&task)).expect("orphan attempt");

    let rescuer = pipeline(&repo, policy, "worker-rescue").expect("pipeline construction");
    let status = rt.block_on(rescuer.resume(task.id())).expect("resume");
    assert_eq!(status, TaskStatus::Succeeded);

    let attempts = rt
        .block_on(repo.attempts_for_task(task.id()))
        .expect("ledger");
    let abandoned: Vec<_> = attempts
        .iter()
        .filter(|attempt| attempt.status() == AttemptStatus::Failed)
        .collect();
    assert_eq!(abandoned.len(), 1, "exactly one attempt is abandoned");
    let orphan = abandoned.first().expect("abandoned attempt");
    assert_eq!(orphan.stage(), Stage::Research);
    assert!(
        matches!(orphan.output(), Some(StageOutput::Interrupted { .. })),
        "the abandoned attempt should be sealed as interrupted"
    );
}

/// Tests that a new worker picks up a partially advanced task without
/// repeating settled stages.
#[rstest]
fn a_new_worker_continues_a_partially_advanced_task(
    runtime: io::Result<Runtime>,
    repo: Arc<InMemoryPipelineRepository>,
    policy: PipelinePolicy,
) {
    let rt = runtime.expect("runtime creation");
    let original = pipeline(&repo, policy.clone(), "worker-a").expect("pipeline construction");
    let task = rt
        .block_on(original.submit(trigger("reorder cache eviction").expect("trigger")))
        .expect("submission");
    rt.block_on(original.advance(task.id())).expect("research");
    rt.block_on(original.advance(task.id())).expect("planning");

    let successor = pipeline(&repo, policy, "worker-b").expect("pipeline construction");
    let status = rt.block_on(successor.resume(task.id())).expect("resume");
    assert_eq!(status, TaskStatus::Succeeded);

    let attempts = rt
        .block_on(repo.attempts_for_task(task.id()))
        .expect("ledger");
    assert_eq!(
        attempts.len(),
        10,
        "no stage is repeated after the handover"
    );
    assert!(
        attempts
            .iter()
            .all(|attempt| attempt.status() == AttemptStatus::Succeeded),
        "the handover leaves no failed attempts"
    );
}
