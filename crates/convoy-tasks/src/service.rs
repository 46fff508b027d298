use std::sync::Arc;
use std::time::Duration;

use convoy_server::RetryStrategy;

use crate::error::{PersistentError, PersistentResult};
use crate::id::TaskId;
use crate::notifier::{CompletionNotifier, PersistentTasksClient, TaskPredicate};
use crate::store::RegistryStore;
use crate::task::{PersistentTask, TaskParams, TaskStatus};

/// The outward surface for managing persistent tasks.
/// Mutations are routed to the master and retried while mastership is in flux.
/// Queries are served from the registry snapshot visible to this node.
pub struct PersistentTasksService {
    client: Arc<PersistentTasksClient>,
    store: Arc<dyn RegistryStore>,
    retry_strategy: RetryStrategy,
}

impl PersistentTasksService {
    pub fn new(
        client: Arc<PersistentTasksClient>,
        store: Arc<dyn RegistryStore>,
        retry_strategy: RetryStrategy,
    ) -> Self {
        Self {
            client,
            store,
            retry_strategy,
        }
    }

    pub async fn create_task(
        &self,
        task_id: impl Into<TaskId>,
        task_type: impl Into<String>,
        params: TaskParams,
    ) -> PersistentResult<PersistentTask> {
        let task_id = task_id.into();
        let task_type = task_type.into();
        if task_id.as_str().is_empty() {
            return Err(PersistentError::invalid("the task ID must not be empty"));
        }
        let client = &self.client;
        self.retry_strategy
            .run(
                || client.create_task(task_id.clone(), task_type.clone(), params.clone()),
                PersistentError::is_retriable,
            )
            .await
    }

    pub async fn remove_task(&self, task_id: impl Into<TaskId>) -> PersistentResult<PersistentTask> {
        let task_id = task_id.into();
        let client = &self.client;
        self.retry_strategy
            .run(
                || client.remove_task(task_id.clone()),
                PersistentError::is_retriable,
            )
            .await
    }

    pub fn list_tasks(&self) -> Vec<PersistentTask> {
        self.store.current_snapshot().tasks.tasks().cloned().collect()
    }

    /// Returns the status of a registered or recently completed task.
    pub fn get_task_status(&self, task_id: &TaskId) -> PersistentResult<TaskStatus> {
        self.store
            .current_snapshot()
            .task_status(task_id)
            .ok_or_else(|| PersistentError::NotFound(task_id.clone()))
    }

    /// Waits until the predicate holds for the task, or fails with a timeout error.
    pub async fn wait_for_task(
        &self,
        task_id: &TaskId,
        predicate: &TaskPredicate,
        timeout: Option<Duration>,
    ) -> PersistentResult<Option<PersistentTask>> {
        self.client
            .wait_for_condition(task_id, predicate, timeout)
            .await
    }
}
