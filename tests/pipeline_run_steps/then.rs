//! Then steps for pipeline run behaviour scenarios.

use super::world::{PipelineRunWorld, run_async};
use eyre::WrapErr;
use gantry::pipeline::{
    domain::{Environment, TaskStatus},
    ports::PipelineRepository,
};
use rstest_bdd_macros::then;
use std::sync::PoisonError;

#[then(r#"the task ends in status "{status}""#)]
fn task_ends_in_status(world: &PipelineRunWorld, status: String) -> Result<(), eyre::Report> {
    let expected = TaskStatus::try_from(status.as_str())
        .map_err(|err| eyre::eyre!("invalid expected status in scenario: {err}"))?;
    let outcome = world
        .outcome
        .ok_or_else(|| eyre::eyre!("missing run outcome in scenario world"))?;

    if outcome != expected {
        return Err(eyre::eyre!(
            "expected status {}, found {}",
            expected.as_str(),
            outcome.as_str()
        ));
    }
    Ok(())
}

#[then("the change was deployed to staging and then production")]
fn change_deployed_everywhere(world: &PipelineRunWorld) -> Result<(), eyre::Report> {
    let deployed = world
        .deploys
        .deployed
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if deployed.as_slice() != [Environment::Staging, Environment::Production] {
        return Err(eyre::eyre!(
            "expected a staging release then a production release, found {deployed:?}"
        ));
    }
    Ok(())
}

#[then(r#"the task error mentions "{text}""#)]
fn task_error_mentions(world: &PipelineRunWorld, text: String) -> Result<(), eyre::Report> {
    let task = world
        .task
        .as_ref()
        .ok_or_else(|| eyre::eyre!("missing submitted task in scenario world"))?;
    let stored = run_async(world.repository.find_task(task.id()))
        .wrap_err("reload task")?
        .ok_or_else(|| eyre::eyre!("task vanished from the repository"))?;
    let error = stored
        .error()
        .ok_or_else(|| eyre::eyre!("task has no recorded error"))?;

    if !error.contains(&text) {
        return Err(eyre::eyre!("error '{error}' does not mention '{text}'"));
    }
    Ok(())
}

#[then(r#"the "{name}" deployment was rolled back"#)]
fn deployment_was_rolled_back(world: &PipelineRunWorld, name: String) -> Result<(), eyre::Report> {
    let environment = match name.as_str() {
        "staging" => Environment::Staging,
        "production" => Environment::Production,
        other => return Err(eyre::eyre!("unknown environment '{other}' in scenario")),
    };
    let rollbacks = world
        .deploys
        .rolled_back
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if !rollbacks.iter().any(|entry| entry.0 == environment) {
        return Err(eyre::eyre!(
            "no rollback recorded for {environment}, found {rollbacks:?}"
        ));
    }
    Ok(())
}
