use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::NodeInfo;
use crate::error::PersistentResult;
use crate::execution::{CancellationToken, TaskExecution};
use crate::id::{AllocationId, NodeId, TaskId};
use crate::notifier::TaskAck;
use crate::task::definition::{Assignment, PersistentTask, TaskParams, TaskState};

/// The body and the placement rule of one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    fn task_type(&self) -> &str;

    /// Runs the task to completion.
    /// The body must check the cancellation token of the context at safe points
    /// and return promptly once it fires.
    async fn run(&self, context: TaskContext) -> Result<(), String>;

    /// Chooses the node that should execute the task.
    /// The default picks the least loaded candidate.
    fn select_node(&self, _task: &PersistentTask, candidates: &AllocationCandidates) -> Assignment {
        candidates.least_loaded()
    }
}

pub struct AllocationCandidate {
    pub node: NodeInfo,
    /// The number of tasks currently assigned to the node.
    pub load: usize,
}

/// The live nodes a task may be assigned to, in topology order.
pub struct AllocationCandidates {
    candidates: Vec<AllocationCandidate>,
}

impl AllocationCandidates {
    pub fn new(candidates: Vec<AllocationCandidate>) -> Self {
        Self { candidates }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocationCandidate> {
        self.candidates.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.candidates.iter().any(|x| &x.node.id == node_id)
    }

    pub fn filter(&self, predicate: impl Fn(&NodeInfo) -> bool) -> Self {
        let candidates = self
            .candidates
            .iter()
            .filter(|x| predicate(&x.node))
            .map(|x| AllocationCandidate {
                node: x.node.clone(),
                load: x.load,
            })
            .collect();
        Self { candidates }
    }

    /// Ties are broken by topology order so that allocation is deterministic.
    pub fn least_loaded(&self) -> Assignment {
        let mut selected: Option<&AllocationCandidate> = None;
        for candidate in self.candidates.iter() {
            if selected.is_none_or(|x| candidate.load < x.load) {
                selected = Some(candidate);
            }
        }
        match selected {
            Some(x) => Assignment::assigned(x.node.id.clone()),
            None => Assignment::unassigned("no live node is eligible for the task"),
        }
    }
}

pub struct TaskContext {
    task_id: TaskId,
    allocation_id: AllocationId,
    params: TaskParams,
    state: Option<TaskState>,
    execution: Arc<TaskExecution>,
}

impl TaskContext {
    pub(crate) fn new(task: &PersistentTask, execution: Arc<TaskExecution>) -> Self {
        Self {
            task_id: task.id.clone(),
            allocation_id: task.allocation_id,
            params: task.params.clone(),
            state: task.state.clone(),
            execution,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn allocation_id(&self) -> AllocationId {
        self.allocation_id
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    /// The last state snapshot recorded in the registry when the execution started.
    pub fn state(&self) -> Option<&TaskState> {
        self.state.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.execution.cancellation()
    }

    pub fn is_cancelled(&self) -> bool {
        self.execution.cancellation().is_cancelled()
    }

    /// The reason of a local cancellation, if any.
    pub fn cancel_reason(&self) -> Option<&str> {
        self.execution.cancel_reason()
    }

    pub async fn update_state(&self, state: TaskState) -> PersistentResult<TaskAck> {
        self.execution.update_state(state).await
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("allocation_id", &self.allocation_id)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }
}
