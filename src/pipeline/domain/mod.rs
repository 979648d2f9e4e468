//! Domain model for the self-change pipeline.
//!
//! The pipeline domain models task intake, the status graph, risk gating,
//! protected-path guarding, retry budgets, the append-only stage-attempt
//! ledger, and operator policy while keeping all infrastructure concerns
//! outside of the domain boundary.

mod deploy;
mod error;
mod guard;
mod ids;
mod limits;
mod output;
mod policy;
mod risk;
mod stage;
mod task;
mod trigger;

pub use deploy::{DeployStrategy, Environment};
pub use error::PipelineDomainError;
pub use guard::{PathCheck, PathMatch, ProtectedPaths};
pub use ids::{StageAttemptId, TaskId, WorkerId};
pub use limits::{IterationLimits, LimitKind};
pub use output::{ApprovalChoice, Plan, RollbackRecord, StageOutput};
pub use policy::{AllowedTriggers, GitNaming, PipelinePolicy, PolicyError};
pub use risk::{ApprovalRequirement, RiskCeiling, RiskLevel};
pub use stage::{AttemptStatus, PersistedAttemptData, Stage, StageAttempt};
pub use task::{PersistedTaskData, Task, TaskStatus};
pub use trigger::{ChangeKind, TaskTrigger};
