//! Application services orchestrating the change pipeline.

mod deployment;
mod orchestrator;
mod recorder;

pub use deployment::{DeploymentController, DeploymentError, ObservationOutcome};
pub use orchestrator::{
    Collaborators, PipelineOrchestrator, PipelineOrchestratorError, PipelineOrchestratorResult,
};
pub use recorder::{StageRecorder, StageRecorderError, StageRecorderResult};
