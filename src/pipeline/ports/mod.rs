//! Port contracts for the self-change pipeline.
//!
//! Ports define infrastructure-agnostic interfaces used by pipeline
//! services.

pub mod collaborators;
pub mod repository;
pub mod timing;

pub use collaborators::{
    ApprovalClient, ApprovalDecision, CheckReport, CodeGenerator, CollaboratorError,
    CollaboratorKind, CollaboratorResult, CommitId, DeployClient, DeployReceipt, MetricsClient,
    Patch, PullRequestRef, ResearchNotes, ReviewDecision, RollbackReceipt, TestRunner,
    VersionControlClient,
};
pub use repository::{PipelineRepository, PipelineRepositoryError, PipelineRepositoryResult};
pub use timing::Sleeper;
