mod client;

use std::time::Duration;

use async_trait::async_trait;
pub use client::PersistentTasksClient;

use crate::error::PersistentResult;
use crate::id::{AllocationId, TaskId};
use crate::task::{PersistentTask, TaskState};

/// The acknowledgement of a task notification by the master.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAck {
    /// The registry was updated. The task is absent if the update removed it.
    Applied(Option<PersistentTask>),
    /// The notification was stale and left the registry unchanged.
    Ignored(String),
}

impl TaskAck {
    pub fn is_applied(&self) -> bool {
        matches!(self, TaskAck::Applied(_))
    }
}

pub type TaskPredicate = dyn Fn(Option<&PersistentTask>) -> bool + Send + Sync;

/// Reports the progress of executions to the master.
/// Calls are never retried here. A lost notification is repaired by reconciliation.
#[async_trait]
pub trait CompletionNotifier: Send + Sync + 'static {
    async fn update_state(
        &self,
        task_id: &TaskId,
        allocation_id: AllocationId,
        state: TaskState,
    ) -> PersistentResult<TaskAck>;

    async fn send_completion(
        &self,
        task_id: &TaskId,
        allocation_id: AllocationId,
        failure: Option<String>,
    ) -> PersistentResult<TaskAck>;

    /// Waits until the predicate holds for the task in the registry.
    /// The predicate receives [None] when the task is not in the registry.
    /// The wait is cancelled when the returned future is dropped.
    async fn wait_for_condition(
        &self,
        task_id: &TaskId,
        predicate: &TaskPredicate,
        timeout: Option<Duration>,
    ) -> PersistentResult<Option<PersistentTask>>;
}
