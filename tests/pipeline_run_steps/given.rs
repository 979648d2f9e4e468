//! Given steps for pipeline run behaviour scenarios.

use super::world::PipelineRunWorld;
use gantry::pipeline::{
    domain::{AllowedTriggers, PipelinePolicy, RiskLevel},
    ports::ApprovalDecision,
};
use rstest_bdd_macros::given;
use std::sync::PoisonError;

#[given(r#"a pipeline owned by "{owner}" that trusts any requester"#)]
fn pipeline_with_owner(world: &mut PipelineRunWorld, owner: String) {
    world.policy = Some(
        PipelinePolicy::default()
            .with_owner(owner)
            .with_allowed_triggers(AllowedTriggers::All)
            .with_observation_minutes(0, 0),
    );
}

#[given(r#"the planner drafts a "{risk}" risk plan"#)]
fn planner_drafts_risk(world: &mut PipelineRunWorld, risk: String) -> Result<(), eyre::Report> {
    let level = RiskLevel::try_from(risk.as_str())
        .map_err(|err| eyre::eyre!("invalid risk level in scenario: {err}"))?;
    *world
        .planner
        .risk
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = level;
    Ok(())
}

#[given(r#"the owner will reject the plan as "{reason}""#)]
fn owner_will_reject(world: &mut PipelineRunWorld, reason: String) {
    *world
        .approvals
        .decision
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = ApprovalDecision::Rejected {
        by: "owner".to_owned(),
        reason,
    };
}

#[given("production error rates will spike to {rate:f64} percent")]
fn production_error_rates_spike(
    world: &mut PipelineRunWorld,
    rate: f64,
) -> Result<(), eyre::Report> {
    let policy = world
        .policy
        .take()
        .ok_or_else(|| eyre::eyre!("missing policy in scenario world"))?;
    world.policy = Some(policy.with_observation_minutes(0, 1));
    *world
        .metrics
        .rate
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = rate;
    Ok(())
}
