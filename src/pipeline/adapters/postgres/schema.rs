//! Diesel schema for pipeline persistence.

diesel::table! {
    /// Task records for the self-change pipeline.
    tasks (id) {
        /// Task identifier (ULID text).
        #[max_length = 26]
        id -> Varchar,
        /// Requested change description.
        intent -> Text,
        /// Requester identity.
        #[max_length = 255]
        requested_by -> Varchar,
        /// Origin channel, if any.
        #[max_length = 255]
        channel -> Nullable<Varchar>,
        /// Change kind.
        #[max_length = 20]
        kind -> Varchar,
        /// Lifecycle status.
        #[max_length = 50]
        status -> Varchar,
        /// Risk classification, set when planning completes.
        #[max_length = 20]
        risk_level -> Nullable<Varchar>,
        /// Plan payload, set when planning completes.
        plan -> Nullable<Jsonb>,
        /// Working branch, if any.
        #[max_length = 255]
        branch_name -> Nullable<Varchar>,
        /// Pull request number, if any.
        pr_number -> Nullable<Int4>,
        /// Pull request URL, if any.
        pr_url -> Nullable<Text>,
        /// Head commit, if any.
        #[max_length = 64]
        commit_sha -> Nullable<Varchar>,
        /// Development retry count.
        dev_iterations -> Int4,
        /// CI retry count.
        ci_retries -> Int4,
        /// Last escalation error, if any.
        error -> Nullable<Text>,
        /// Worker holding the advancement claim, if any.
        #[max_length = 255]
        claimed_by -> Nullable<Varchar>,
        /// Production deployment timestamp, if any.
        deployed_at -> Nullable<Timestamptz>,
        /// Rollback timestamp, if any.
        rolled_back_at -> Nullable<Timestamptz>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Append-only stage attempt ledger.
    stage_attempts (id) {
        /// Attempt identifier (ULID text).
        #[max_length = 26]
        id -> Varchar,
        /// Owning task identifier.
        #[max_length = 26]
        task_id -> Varchar,
        /// Stage the attempt executed.
        #[max_length = 50]
        stage -> Varchar,
        /// Attempt status.
        #[max_length = 20]
        status -> Varchar,
        /// Attempt start timestamp.
        started_at -> Timestamptz,
        /// Attempt completion timestamp, while running.
        completed_at -> Nullable<Timestamptz>,
        /// Stage-specific outcome payload, if any.
        output -> Nullable<Jsonb>,
    }
}

diesel::joinable!(stage_attempts -> tasks (task_id));

diesel::allow_tables_to_appear_in_same_query!(tasks, stage_attempts);
