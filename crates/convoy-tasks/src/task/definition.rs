use serde::{Deserialize, Serialize};

use crate::id::{AllocationId, ExecutionKey, NodeId, TaskId};

/// The opaque parameters of a task, interpreted only by its handler.
pub type TaskParams = serde_json::Value;
/// The opaque progress snapshot of a task, interpreted only by its handler.
pub type TaskState = serde_json::Value;

pub(crate) const INITIAL_ASSIGNMENT_EXPLANATION: &str = "waiting for initial assignment";

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    executor_node: Option<NodeId>,
    explanation: String,
}

impl Assignment {
    pub fn assigned(node_id: NodeId) -> Self {
        Self {
            executor_node: Some(node_id),
            explanation: String::new(),
        }
    }

    pub fn unassigned(explanation: impl Into<String>) -> Self {
        Self {
            executor_node: None,
            explanation: explanation.into(),
        }
    }

    pub fn executor_node(&self) -> Option<&NodeId> {
        self.executor_node.as_ref()
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn is_assigned(&self) -> bool {
        self.executor_node.is_some()
    }

    pub fn is_assigned_to(&self, node_id: &NodeId) -> bool {
        self.executor_node.as_ref() == Some(node_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentTask {
    pub id: TaskId,
    pub task_type: String,
    pub params: TaskParams,
    pub state: Option<TaskState>,
    pub assignment: Assignment,
    pub allocation_id: AllocationId,
}

impl PersistentTask {
    pub fn execution_key(&self) -> ExecutionKey {
        ExecutionKey::new(self.id.clone(), self.allocation_id)
    }

    pub fn is_assigned_to(&self, node_id: &NodeId) -> bool {
        self.assignment.is_assigned_to(node_id)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
    Removed,
}

/// A task that has left the registry, kept for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub id: TaskId,
    pub task_type: String,
    pub allocation_id: AllocationId,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Unassigned {
        explanation: String,
    },
    Assigned {
        node_id: NodeId,
        allocation_id: AllocationId,
        state: Option<TaskState>,
    },
    Completed {
        outcome: TaskOutcome,
    },
}

impl TaskStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed { .. })
    }
}

impl From<&PersistentTask> for TaskStatus {
    fn from(task: &PersistentTask) -> Self {
        match task.assignment.executor_node() {
            Some(node_id) => TaskStatus::Assigned {
                node_id: node_id.clone(),
                allocation_id: task.allocation_id,
                state: task.state.clone(),
            },
            None => TaskStatus::Unassigned {
                explanation: task.assignment.explanation().to_string(),
            },
        }
    }
}

impl From<&CompletedTask> for TaskStatus {
    fn from(task: &CompletedTask) -> Self {
        TaskStatus::Completed {
            outcome: task.outcome.clone(),
        }
    }
}
