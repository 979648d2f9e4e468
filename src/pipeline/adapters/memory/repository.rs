//! In-memory repository for pipeline tests and single-process runs.

use crate::pipeline::{
    domain::{Stage, StageAttempt, Task, TaskId, TaskStatus, WorkerId},
    ports::{PipelineRepository, PipelineRepositoryError, PipelineRepositoryResult},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe in-memory pipeline repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPipelineRepository {
    state: Arc<RwLock<InMemoryPipelineState>>,
}

#[derive(Debug, Default)]
struct InMemoryPipelineState {
    tasks: HashMap<TaskId, Task>,
    status_index: HashMap<TaskStatus, Vec<TaskId>>,
    requester_index: HashMap<String, Vec<TaskId>>,
    attempts: HashMap<TaskId, Vec<StageAttempt>>,
    claims: HashMap<TaskId, WorkerId>,
}

impl InMemoryPipelineRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> PipelineRepositoryResult<RwLockReadGuard<'_, InMemoryPipelineState>> {
        self.state.read().map_err(|err| {
            PipelineRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }

    fn write_state(&self) -> PipelineRepositoryResult<RwLockWriteGuard<'_, InMemoryPipelineState>> {
        self.state.write().map_err(|err| {
            PipelineRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

fn index_status(state: &mut InMemoryPipelineState, task: &Task) {
    state
        .status_index
        .entry(task.status())
        .or_default()
        .push(task.id());
}

fn index_requester(state: &mut InMemoryPipelineState, task: &Task) {
    state
        .requester_index
        .entry(task.requested_by().to_owned())
        .or_default()
        .push(task.id());
}

/// Removes a task ID from an index bucket, cleaning up the entry if empty.
fn remove_from_index<K>(index: &mut HashMap<K, Vec<TaskId>>, task_id: TaskId, key: &K)
where
    K: Eq + std::hash::Hash,
{
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|id| *id != task_id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Looks up tasks by index bucket, sorted into creation order.
fn collect_indexed<K>(
    state: &InMemoryPipelineState,
    index: &HashMap<K, Vec<TaskId>>,
    key: &K,
) -> Vec<Task>
where
    K: Eq + std::hash::Hash,
{
    let mut tasks: Vec<Task> = index
        .get(key)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| state.tasks.get(id).cloned())
                .collect()
        })
        .unwrap_or_default();
    tasks.sort_by_key(|task| (task.created_at(), task.id()));
    tasks
}

/// Replaces the stored running attempt with its sealed form.
fn seal_stored_attempt(
    state: &mut InMemoryPipelineState,
    attempt: &StageAttempt,
) -> PipelineRepositoryResult<()> {
    let ledger = state
        .attempts
        .get_mut(&attempt.task_id())
        .ok_or(PipelineRepositoryError::AttemptNotFound(attempt.id()))?;
    let stored = ledger
        .iter_mut()
        .find(|candidate| candidate.id() == attempt.id())
        .ok_or(PipelineRepositoryError::AttemptNotFound(attempt.id()))?;
    if !stored.is_running() {
        return Err(PipelineRepositoryError::AttemptAlreadyCompleted(
            attempt.id(),
        ));
    }
    *stored = attempt.clone();
    Ok(())
}

#[async_trait]
impl PipelineRepository for InMemoryPipelineRepository {
    async fn create_task(&self, task: &Task) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        if state.tasks.contains_key(&task.id()) {
            return Err(PipelineRepositoryError::DuplicateTask(task.id()));
        }
        index_status(&mut state, task);
        index_requester(&mut state, task);
        state.attempts.entry(task.id()).or_default();
        state.tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        let old_status = state
            .tasks
            .get(&task.id())
            .ok_or(PipelineRepositoryError::TaskNotFound(task.id()))?
            .status();

        // The requester never changes, so only the status index moves.
        remove_from_index(&mut state.status_index, task.id(), &old_status);
        index_status(&mut state, task);
        state.tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn find_task(&self, id: TaskId) -> PipelineRepositoryResult<Option<Task>> {
        let state = self.read_state()?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
    ) -> PipelineRepositoryResult<Vec<Task>> {
        let state = self.read_state()?;
        Ok(collect_indexed(&state, &state.status_index, &status))
    }

    async fn list_tasks_for_requester(
        &self,
        requested_by: &str,
    ) -> PipelineRepositoryResult<Vec<Task>> {
        let state = self.read_state()?;
        let key = requested_by.to_owned();
        Ok(collect_indexed(&state, &state.requester_index, &key))
    }

    async fn open_attempt(&self, attempt: &StageAttempt) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        if !state.tasks.contains_key(&attempt.task_id()) {
            return Err(PipelineRepositoryError::TaskNotFound(attempt.task_id()));
        }
        let ledger = state.attempts.entry(attempt.task_id()).or_default();
        if ledger.iter().any(StageAttempt::is_running) {
            return Err(PipelineRepositoryError::AttemptStillRunning(
                attempt.task_id(),
            ));
        }
        ledger.push(attempt.clone());
        Ok(())
    }

    async fn commit_transition(
        &self,
        task: &Task,
        attempt: &StageAttempt,
    ) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        let old_status = state
            .tasks
            .get(&task.id())
            .ok_or(PipelineRepositoryError::TaskNotFound(task.id()))?
            .status();
        if attempt.is_running() {
            return Err(PipelineRepositoryError::AttemptNotSettled(attempt.id()));
        }
        seal_stored_attempt(&mut state, attempt)?;
        remove_from_index(&mut state.status_index, task.id(), &old_status);
        index_status(&mut state, task);
        state.tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn latest_attempt(
        &self,
        task_id: TaskId,
    ) -> PipelineRepositoryResult<Option<StageAttempt>> {
        let state = self.read_state()?;
        // Ties on started_at fall back to append order via max_by_key
        // returning the last maximal element.
        let latest = state
            .attempts
            .get(&task_id)
            .and_then(|ledger| ledger.iter().max_by_key(|attempt| attempt.started_at()))
            .cloned();
        Ok(latest)
    }

    async fn attempts_for_task(
        &self,
        task_id: TaskId,
    ) -> PipelineRepositoryResult<Vec<StageAttempt>> {
        let state = self.read_state()?;
        let mut ledger = state.attempts.get(&task_id).cloned().unwrap_or_default();
        ledger.sort_by_key(StageAttempt::started_at);
        Ok(ledger)
    }

    async fn attempts_for_stage(
        &self,
        task_id: TaskId,
        stage: Stage,
    ) -> PipelineRepositoryResult<Vec<StageAttempt>> {
        let state = self.read_state()?;
        let mut ledger: Vec<StageAttempt> = state
            .attempts
            .get(&task_id)
            .map(|attempts| {
                attempts
                    .iter()
                    .filter(|attempt| attempt.stage() == stage)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ledger.sort_by_key(StageAttempt::started_at);
        Ok(ledger)
    }

    async fn claim_task(
        &self,
        task_id: TaskId,
        worker: &WorkerId,
    ) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        if !state.tasks.contains_key(&task_id) {
            return Err(PipelineRepositoryError::TaskNotFound(task_id));
        }
        if let Some(holder) = state.claims.get(&task_id) {
            if holder != worker {
                return Err(PipelineRepositoryError::TaskAlreadyClaimed {
                    task_id,
                    held_by: holder.clone(),
                });
            }
            return Ok(());
        }
        state.claims.insert(task_id, worker.clone());
        Ok(())
    }

    async fn release_task(
        &self,
        task_id: TaskId,
        worker: &WorkerId,
    ) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        if !state.tasks.contains_key(&task_id) {
            return Err(PipelineRepositoryError::TaskNotFound(task_id));
        }
        match state.claims.get(&task_id) {
            None => Ok(()),
            Some(holder) if holder == worker => {
                state.claims.remove(&task_id);
                Ok(())
            }
            Some(_) => Err(PipelineRepositoryError::NotClaimHolder {
                task_id,
                worker: worker.clone(),
            }),
        }
    }

    async fn break_claim(&self, task_id: TaskId) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        if !state.tasks.contains_key(&task_id) {
            return Err(PipelineRepositoryError::TaskNotFound(task_id));
        }
        state.claims.remove(&task_id);
        Ok(())
    }

    async fn purge_task(&self, task_id: TaskId) -> PipelineRepositoryResult<()> {
        let mut state = self.write_state()?;
        let task = state
            .tasks
            .remove(&task_id)
            .ok_or(PipelineRepositoryError::TaskNotFound(task_id))?;
        let status = task.status();
        let requester = task.requested_by().to_owned();
        remove_from_index(&mut state.status_index, task_id, &status);
        remove_from_index(&mut state.requester_index, task_id, &requester);
        state.attempts.remove(&task_id);
        state.claims.remove(&task_id);
        Ok(())
    }
}
