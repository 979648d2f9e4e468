//! `PostgreSQL` repository implementation for pipeline storage.

use super::{
    models::{NewStageAttemptRow, NewTaskRow, StageAttemptRow, TaskChangeset, TaskRow},
    schema::{stage_attempts, tasks},
};
use crate::pipeline::{
    domain::{
        AttemptStatus, ChangeKind, PersistedAttemptData, PersistedTaskData, Plan, RiskLevel,
        Stage, StageAttempt, StageAttemptId, StageOutput, Task, TaskId, TaskStatus, WorkerId,
    },
    ports::{PipelineRepository, PipelineRepositoryError, PipelineRepositoryResult},
};
use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};

/// `PostgreSQL` connection pool type used by pipeline adapters.
pub type PipelinePgPool = Pool<ConnectionManager<PgConnection>>;

/// `PostgreSQL`-backed pipeline repository.
#[derive(Debug, Clone)]
pub struct PostgresPipelineRepository {
    pool: PipelinePgPool,
}

impl PostgresPipelineRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: PipelinePgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> PipelineRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> PipelineRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(PipelineRepositoryError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(PipelineRepositoryError::persistence)?
    }
}

// Raw Diesel errors carry no identifiers, so they all map to persistence
// errors; callers surface semantic variants through pre-checks and
// constraint-name inspection.
impl From<DieselError> for PipelineRepositoryError {
    fn from(err: DieselError) -> Self {
        Self::persistence(err)
    }
}

#[async_trait]
impl PipelineRepository for PostgresPipelineRepository {
    async fn create_task(&self, task: &Task) -> PipelineRepositoryResult<()> {
        let task_id = task.id();
        let new_row = to_new_task_row(task)?;

        self.run_blocking(move |connection| {
            diesel::insert_into(tasks::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        PipelineRepositoryError::DuplicateTask(task_id)
                    }
                    _ => PipelineRepositoryError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn update_task(&self, task: &Task) -> PipelineRepositoryResult<()> {
        let task_id = task.id();
        let changeset = to_task_changeset(task)?;

        self.run_blocking(move |connection| {
            let updated = diesel::update(tasks::table.filter(tasks::id.eq(task_id.to_string())))
                .set(&changeset)
                .execute(connection)
                .map_err(PipelineRepositoryError::persistence)?;
            if updated == 0 {
                return Err(PipelineRepositoryError::TaskNotFound(task_id));
            }
            Ok(())
        })
        .await
    }

    async fn find_task(&self, id: TaskId) -> PipelineRepositoryResult<Option<Task>> {
        self.run_blocking(move |connection| {
            let row = tasks::table
                .filter(tasks::id.eq(id.to_string()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()
                .map_err(PipelineRepositoryError::persistence)?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
    ) -> PipelineRepositoryResult<Vec<Task>> {
        self.run_blocking(move |connection| {
            let rows = tasks::table
                .filter(tasks::status.eq(status.as_str()))
                .order(tasks::id.asc())
                .select(TaskRow::as_select())
                .load::<TaskRow>(connection)
                .map_err(PipelineRepositoryError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn list_tasks_for_requester(
        &self,
        requested_by: &str,
    ) -> PipelineRepositoryResult<Vec<Task>> {
        let requester = requested_by.to_owned();
        self.run_blocking(move |connection| {
            let rows = tasks::table
                .filter(tasks::requested_by.eq(requester))
                .order((tasks::created_at.asc(), tasks::id.asc()))
                .select(TaskRow::as_select())
                .load::<TaskRow>(connection)
                .map_err(PipelineRepositoryError::persistence)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn open_attempt(&self, attempt: &StageAttempt) -> PipelineRepositoryResult<()> {
        let task_id = attempt.task_id();
        let new_row = to_new_attempt_row(attempt)?;

        self.run_blocking(move |connection| {
            // This pre-check improves semantic error reporting but is not
            // relied on for correctness: the partial unique index still
            // enforces a single running attempt in the TOCTOU window
            // between check and insert.
            let running: i64 = stage_attempts::table
                .filter(stage_attempts::task_id.eq(task_id.to_string()))
                .filter(stage_attempts::status.eq(AttemptStatus::Running.as_str()))
                .count()
                .get_result(connection)
                .map_err(PipelineRepositoryError::persistence)?;
            if running > 0 {
                return Err(PipelineRepositoryError::AttemptStillRunning(task_id));
            }

            diesel::insert_into(stage_attempts::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                        PipelineRepositoryError::TaskNotFound(task_id)
                    }
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
                        if is_running_attempt_unique_violation(info.as_ref()) =>
                    {
                        PipelineRepositoryError::AttemptStillRunning(task_id)
                    }
                    _ => PipelineRepositoryError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn commit_transition(
        &self,
        task: &Task,
        attempt: &StageAttempt,
    ) -> PipelineRepositoryResult<()> {
        let task_id = task.id();
        let attempt_id = attempt.id();
        if attempt.is_running() {
            return Err(PipelineRepositoryError::AttemptNotSettled(attempt_id));
        }
        let changeset = to_task_changeset(task)?;
        let sealed_status = attempt.status().as_str();
        let completed_at = attempt.completed_at();
        let output = attempt
            .output()
            .map(StageOutput::encode)
            .transpose()
            .map_err(PipelineRepositoryError::persistence)?;

        self.run_blocking(move |connection| {
            connection.transaction::<_, PipelineRepositoryError, _>(|tx_conn| {
                let sealed = diesel::update(
                    stage_attempts::table
                        .filter(stage_attempts::id.eq(attempt_id.to_string()))
                        .filter(stage_attempts::status.eq(AttemptStatus::Running.as_str())),
                )
                .set((
                    stage_attempts::status.eq(sealed_status),
                    stage_attempts::completed_at.eq(completed_at),
                    stage_attempts::output.eq(output),
                ))
                .execute(tx_conn)?;
                if sealed == 0 {
                    let exists: i64 = stage_attempts::table
                        .filter(stage_attempts::id.eq(attempt_id.to_string()))
                        .count()
                        .get_result(tx_conn)?;
                    return Err(if exists > 0 {
                        PipelineRepositoryError::AttemptAlreadyCompleted(attempt_id)
                    } else {
                        PipelineRepositoryError::AttemptNotFound(attempt_id)
                    });
                }

                let updated =
                    diesel::update(tasks::table.filter(tasks::id.eq(task_id.to_string())))
                        .set(&changeset)
                        .execute(tx_conn)?;
                if updated == 0 {
                    return Err(PipelineRepositoryError::TaskNotFound(task_id));
                }
                Ok(())
            })
        })
        .await
    }

    async fn latest_attempt(
        &self,
        task_id: TaskId,
    ) -> PipelineRepositoryResult<Option<StageAttempt>> {
        self.run_blocking(move |connection| {
            let row = stage_attempts::table
                .filter(stage_attempts::task_id.eq(task_id.to_string()))
                .order((stage_attempts::started_at.desc(), stage_attempts::id.desc()))
                .select(StageAttemptRow::as_select())
                .first::<StageAttemptRow>(connection)
                .optional()
                .map_err(PipelineRepositoryError::persistence)?;
            row.map(row_to_attempt).transpose()
        })
        .await
    }

    async fn attempts_for_task(
        &self,
        task_id: TaskId,
    ) -> PipelineRepositoryResult<Vec<StageAttempt>> {
        self.run_blocking(move |connection| {
            let rows = stage_attempts::table
                .filter(stage_attempts::task_id.eq(task_id.to_string()))
                .order((stage_attempts::started_at.asc(), stage_attempts::id.asc()))
                .select(StageAttemptRow::as_select())
                .load::<StageAttemptRow>(connection)
                .map_err(PipelineRepositoryError::persistence)?;
            rows.into_iter().map(row_to_attempt).collect()
        })
        .await
    }

    async fn attempts_for_stage(
        &self,
        task_id: TaskId,
        stage: Stage,
    ) -> PipelineRepositoryResult<Vec<StageAttempt>> {
        self.run_blocking(move |connection| {
            let rows = stage_attempts::table
                .filter(stage_attempts::task_id.eq(task_id.to_string()))
                .filter(stage_attempts::stage.eq(stage.as_str()))
                .order((stage_attempts::started_at.asc(), stage_attempts::id.asc()))
                .select(StageAttemptRow::as_select())
                .load::<StageAttemptRow>(connection)
                .map_err(PipelineRepositoryError::persistence)?;
            rows.into_iter().map(row_to_attempt).collect()
        })
        .await
    }

    async fn claim_task(
        &self,
        task_id: TaskId,
        worker: &WorkerId,
    ) -> PipelineRepositoryResult<()> {
        let worker_name = worker.as_str().to_owned();
        self.run_blocking(move |connection| {
            connection.transaction::<_, PipelineRepositoryError, _>(|tx_conn| {
                let holder = load_claim_for_update(tx_conn, task_id)?;
                match holder {
                    None => Err(PipelineRepositoryError::TaskNotFound(task_id)),
                    Some(Some(held_by)) if held_by != worker_name => {
                        let held_by = WorkerId::new(held_by)
                            .map_err(PipelineRepositoryError::persistence)?;
                        Err(PipelineRepositoryError::TaskAlreadyClaimed { task_id, held_by })
                    }
                    Some(_) => {
                        diesel::update(tasks::table.filter(tasks::id.eq(task_id.to_string())))
                            .set(tasks::claimed_by.eq(Some(worker_name.clone())))
                            .execute(tx_conn)?;
                        Ok(())
                    }
                }
            })
        })
        .await
    }

    async fn release_task(
        &self,
        task_id: TaskId,
        worker: &WorkerId,
    ) -> PipelineRepositoryResult<()> {
        let releasing = worker.clone();
        self.run_blocking(move |connection| {
            connection.transaction::<_, PipelineRepositoryError, _>(|tx_conn| {
                let holder = load_claim_for_update(tx_conn, task_id)?;
                match holder {
                    None => Err(PipelineRepositoryError::TaskNotFound(task_id)),
                    Some(None) => Ok(()),
                    Some(Some(held_by)) if held_by == releasing.as_str() => {
                        clear_claim(tx_conn, task_id)?;
                        Ok(())
                    }
                    Some(Some(_)) => Err(PipelineRepositoryError::NotClaimHolder {
                        task_id,
                        worker: releasing.clone(),
                    }),
                }
            })
        })
        .await
    }

    async fn break_claim(&self, task_id: TaskId) -> PipelineRepositoryResult<()> {
        self.run_blocking(move |connection| {
            let updated = clear_claim(connection, task_id)?;
            if updated == 0 {
                return Err(PipelineRepositoryError::TaskNotFound(task_id));
            }
            Ok(())
        })
        .await
    }

    async fn purge_task(&self, task_id: TaskId) -> PipelineRepositoryResult<()> {
        self.run_blocking(move |connection| {
            connection.transaction::<_, PipelineRepositoryError, _>(|tx_connection| {
                // The foreign key cascades too; deleting children here
                // keeps the no-orphan guarantee independent of schema
                // options.
                diesel::delete(
                    stage_attempts::table.filter(stage_attempts::task_id.eq(task_id.to_string())),
                )
                .execute(tx_connection)?;
                let deleted =
                    diesel::delete(tasks::table.filter(tasks::id.eq(task_id.to_string())))
                        .execute(tx_connection)?;
                if deleted == 0 {
                    return Err(PipelineRepositoryError::TaskNotFound(task_id));
                }
                Ok(())
            })
        })
        .await
    }
}

/// Locks the task row and reads its claim holder.
///
/// Returns `None` when the task does not exist; `Some(None)` when it is
/// unclaimed.
fn load_claim_for_update(
    connection: &mut PgConnection,
    task_id: TaskId,
) -> PipelineRepositoryResult<Option<Option<String>>> {
    tasks::table
        .filter(tasks::id.eq(task_id.to_string()))
        .select(tasks::claimed_by)
        .for_update()
        .first::<Option<String>>(connection)
        .optional()
        .map_err(PipelineRepositoryError::persistence)
}

fn clear_claim(connection: &mut PgConnection, task_id: TaskId) -> PipelineRepositoryResult<usize> {
    diesel::update(tasks::table.filter(tasks::id.eq(task_id.to_string())))
        .set(tasks::claimed_by.eq(None::<String>))
        .execute(connection)
        .map_err(PipelineRepositoryError::persistence)
}

fn to_new_task_row(task: &Task) -> PipelineRepositoryResult<NewTaskRow> {
    let plan = task
        .plan()
        .map(serde_json::to_value)
        .transpose()
        .map_err(PipelineRepositoryError::persistence)?;

    Ok(NewTaskRow {
        id: task.id().to_string(),
        intent: task.intent().to_owned(),
        requested_by: task.requested_by().to_owned(),
        channel: task.channel().map(ToOwned::to_owned),
        kind: task.kind().as_str().to_owned(),
        status: task.status().as_str().to_owned(),
        risk_level: task.risk_level().map(|risk| risk.as_str().to_owned()),
        plan,
        branch_name: task.branch_name().map(ToOwned::to_owned),
        pr_number: task.pr_number().map(to_row_count).transpose()?,
        pr_url: task.pr_url().map(ToOwned::to_owned),
        commit_sha: task.commit_sha().map(ToOwned::to_owned),
        dev_iterations: to_row_count(task.dev_iterations())?,
        ci_retries: to_row_count(task.ci_retries())?,
        error: task.error().map(ToOwned::to_owned),
        deployed_at: task.deployed_at(),
        rolled_back_at: task.rolled_back_at(),
        created_at: task.created_at(),
        updated_at: task.updated_at(),
    })
}

fn to_task_changeset(task: &Task) -> PipelineRepositoryResult<TaskChangeset> {
    let plan = task
        .plan()
        .map(serde_json::to_value)
        .transpose()
        .map_err(PipelineRepositoryError::persistence)?;

    Ok(TaskChangeset {
        status: task.status().as_str().to_owned(),
        risk_level: task.risk_level().map(|risk| risk.as_str().to_owned()),
        plan,
        branch_name: task.branch_name().map(ToOwned::to_owned),
        pr_number: task.pr_number().map(to_row_count).transpose()?,
        pr_url: task.pr_url().map(ToOwned::to_owned),
        commit_sha: task.commit_sha().map(ToOwned::to_owned),
        dev_iterations: to_row_count(task.dev_iterations())?,
        ci_retries: to_row_count(task.ci_retries())?,
        error: task.error().map(ToOwned::to_owned),
        deployed_at: task.deployed_at(),
        rolled_back_at: task.rolled_back_at(),
        updated_at: task.updated_at(),
    })
}

fn row_to_task(row: TaskRow) -> PipelineRepositoryResult<Task> {
    let TaskRow {
        id,
        intent,
        requested_by,
        channel,
        kind: persisted_kind,
        status: persisted_status,
        risk_level: persisted_risk,
        plan: persisted_plan,
        branch_name,
        pr_number,
        pr_url,
        commit_sha,
        dev_iterations,
        ci_retries,
        error,
        claimed_by: _,
        deployed_at,
        rolled_back_at,
        created_at,
        updated_at,
    } = row;

    let id = TaskId::try_from(id.as_str()).map_err(PipelineRepositoryError::persistence)?;
    let kind = ChangeKind::try_from(persisted_kind.as_str())
        .map_err(PipelineRepositoryError::persistence)?;
    let status = TaskStatus::try_from(persisted_status.as_str())
        .map_err(PipelineRepositoryError::persistence)?;
    let risk_level = persisted_risk
        .as_deref()
        .map(RiskLevel::try_from)
        .transpose()
        .map_err(PipelineRepositoryError::persistence)?;
    let plan = persisted_plan
        .as_ref()
        .map(Plan::decode)
        .transpose()
        .map_err(PipelineRepositoryError::persistence)?;

    let data = PersistedTaskData {
        id,
        intent,
        requested_by,
        channel,
        kind,
        status,
        risk_level,
        plan,
        branch_name,
        pr_number: pr_number.map(from_row_count).transpose()?,
        pr_url,
        commit_sha,
        dev_iterations: from_row_count(dev_iterations)?,
        ci_retries: from_row_count(ci_retries)?,
        error,
        deployed_at,
        rolled_back_at,
        created_at,
        updated_at,
    };
    Ok(Task::from_persisted(data))
}

fn to_new_attempt_row(attempt: &StageAttempt) -> PipelineRepositoryResult<NewStageAttemptRow> {
    let output = attempt
        .output()
        .map(StageOutput::encode)
        .transpose()
        .map_err(PipelineRepositoryError::persistence)?;

    Ok(NewStageAttemptRow {
        id: attempt.id().to_string(),
        task_id: attempt.task_id().to_string(),
        stage: attempt.stage().as_str().to_owned(),
        status: attempt.status().as_str().to_owned(),
        started_at: attempt.started_at(),
        completed_at: attempt.completed_at(),
        output,
    })
}

fn row_to_attempt(row: StageAttemptRow) -> PipelineRepositoryResult<StageAttempt> {
    let StageAttemptRow {
        id,
        task_id,
        stage: persisted_stage,
        status: persisted_status,
        started_at,
        completed_at,
        output: persisted_output,
    } = row;

    let id = StageAttemptId::try_from(id.as_str()).map_err(PipelineRepositoryError::persistence)?;
    let task_id =
        TaskId::try_from(task_id.as_str()).map_err(PipelineRepositoryError::persistence)?;
    let stage = Stage::try_from(persisted_stage.as_str())
        .map_err(PipelineRepositoryError::persistence)?;
    let status = AttemptStatus::try_from(persisted_status.as_str())
        .map_err(PipelineRepositoryError::persistence)?;
    let output = persisted_output
        .as_ref()
        .map(StageOutput::decode)
        .transpose()
        .map_err(PipelineRepositoryError::persistence)?;

    let data = PersistedAttemptData {
        id,
        task_id,
        stage,
        status,
        started_at,
        completed_at,
        output,
    };
    Ok(StageAttempt::from_persisted(data))
}

fn to_row_count(value: u32) -> PipelineRepositoryResult<i32> {
    i32::try_from(value).map_err(PipelineRepositoryError::persistence)
}

fn from_row_count(value: i32) -> PipelineRepositoryResult<u32> {
    u32::try_from(value).map_err(PipelineRepositoryError::persistence)
}

fn is_running_attempt_unique_violation(info: &dyn DatabaseErrorInformation) -> bool {
    info.constraint_name()
        .is_some_and(|name| name == "idx_stage_attempts_running_unique")
}
