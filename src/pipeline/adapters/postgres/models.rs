//! Diesel row models for pipeline persistence.

use super::schema::{stage_attempts, tasks};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Task identifier (ULID text).
    pub id: String,
    /// Requested change description.
    pub intent: String,
    /// Requester identity.
    pub requested_by: String,
    /// Origin channel, if any.
    pub channel: Option<String>,
    /// Change kind.
    pub kind: String,
    /// Lifecycle status.
    pub status: String,
    /// Risk classification, if set.
    pub risk_level: Option<String>,
    /// Plan payload, if set.
    pub plan: Option<Value>,
    /// Working branch, if any.
    pub branch_name: Option<String>,
    /// Pull request number, if any.
    pub pr_number: Option<i32>,
    /// Pull request URL, if any.
    pub pr_url: Option<String>,
    /// Head commit, if any.
    pub commit_sha: Option<String>,
    /// Development retry count.
    pub dev_iterations: i32,
    /// CI retry count.
    pub ci_retries: i32,
    /// Last escalation error, if any.
    pub error: Option<String>,
    /// Worker holding the advancement claim, if any.
    pub claimed_by: Option<String>,
    /// Production deployment timestamp, if any.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Rollback timestamp, if any.
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert model for task records.
///
/// Tasks start unclaimed, so the claim column is left to its default.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    /// Task identifier (ULID text).
    pub id: String,
    /// Requested change description.
    pub intent: String,
    /// Requester identity.
    pub requested_by: String,
    /// Origin channel, if any.
    pub channel: Option<String>,
    /// Change kind.
    pub kind: String,
    /// Lifecycle status.
    pub status: String,
    /// Risk classification, if set.
    pub risk_level: Option<String>,
    /// Plan payload, if set.
    pub plan: Option<Value>,
    /// Working branch, if any.
    pub branch_name: Option<String>,
    /// Pull request number, if any.
    pub pr_number: Option<i32>,
    /// Pull request URL, if any.
    pub pr_url: Option<String>,
    /// Head commit, if any.
    pub commit_sha: Option<String>,
    /// Development retry count.
    pub dev_iterations: i32,
    /// CI retry count.
    pub ci_retries: i32,
    /// Last escalation error, if any.
    pub error: Option<String>,
    /// Production deployment timestamp, if any.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Rollback timestamp, if any.
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Update model for task records.
///
/// The claim column is owned by the claim operations and never moves with
/// a task update; `None` values overwrite their columns with NULL so the
/// row always mirrors the aggregate.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = tasks)]
#[diesel(treat_none_as_null = true)]
pub struct TaskChangeset {
    /// Lifecycle status.
    pub status: String,
    /// Risk classification, if set.
    pub risk_level: Option<String>,
    /// Plan payload, if set.
    pub plan: Option<Value>,
    /// Working branch, if any.
    pub branch_name: Option<String>,
    /// Pull request number, if any.
    pub pr_number: Option<i32>,
    /// Pull request URL, if any.
    pub pr_url: Option<String>,
    /// Head commit, if any.
    pub commit_sha: Option<String>,
    /// Development retry count.
    pub dev_iterations: i32,
    /// CI retry count.
    pub ci_retries: i32,
    /// Last escalation error, if any.
    pub error: Option<String>,
    /// Production deployment timestamp, if any.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Rollback timestamp, if any.
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query result row for stage attempts.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = stage_attempts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StageAttemptRow {
    /// Attempt identifier (ULID text).
    pub id: String,
    /// Owning task identifier.
    pub task_id: String,
    /// Stage the attempt executed.
    pub stage: String,
    /// Attempt status.
    pub status: String,
    /// Attempt start timestamp.
    pub started_at: DateTime<Utc>,
    /// Attempt completion timestamp, while running.
    pub completed_at: Option<DateTime<Utc>>,
    /// Stage-specific outcome payload, if any.
    pub output: Option<Value>,
}

/// Insert model for stage attempts.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = stage_attempts)]
pub struct NewStageAttemptRow {
    /// Attempt identifier (ULID text).
    pub id: String,
    /// Owning task identifier.
    pub task_id: String,
    /// Stage the attempt executed.
    pub stage: String,
    /// Attempt status.
    pub status: String,
    /// Attempt start timestamp.
    pub started_at: DateTime<Utc>,
    /// Attempt completion timestamp, while running.
    pub completed_at: Option<DateTime<Utc>>,
    /// Stage-specific outcome payload, if any.
    pub output: Option<Value>,
}
