use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PersistentError, PersistentResult};
use crate::id::{AllocationId, NodeId, TaskId};
use crate::task::definition::{
    Assignment, CompletedTask, PersistentTask, TaskOutcome, TaskParams, TaskState, TaskStatus,
    INITIAL_ASSIGNMENT_EXPLANATION,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryUpdateOutcome {
    Applied,
    /// The update referred to a task or an allocation that is no longer current.
    Ignored(String),
}

/// The authoritative collection of persistent tasks.
/// Only the allocator mutates it, and every mutation is published as a new snapshot
/// through the registry store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRegistry {
    tasks: IndexMap<TaskId, PersistentTask>,
    /// Tasks that have left the registry, oldest first.
    completed: IndexMap<TaskId, CompletedTask>,
    /// The last allocation ID handed out to any task.
    /// Allocation IDs are never reused, even across tasks removed and created again
    /// with the same task ID.
    last_allocation_id: AllocationId,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&PersistentTask> {
        self.tasks.get(task_id)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &PersistentTask> {
        self.tasks.values()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn completed(&self, task_id: &TaskId) -> Option<&CompletedTask> {
        self.completed.get(task_id)
    }

    pub fn completed_tasks(&self) -> impl Iterator<Item = &CompletedTask> {
        self.completed.values()
    }

    pub fn last_allocation_id(&self) -> AllocationId {
        self.last_allocation_id
    }

    pub fn count_assigned_to(&self, node_id: &NodeId) -> usize {
        self.tasks
            .values()
            .filter(|task| task.is_assigned_to(node_id))
            .count()
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.tasks
            .get(task_id)
            .map(TaskStatus::from)
            .or_else(|| self.completed.get(task_id).map(TaskStatus::from))
    }

    pub fn add_task(
        &mut self,
        task_id: TaskId,
        task_type: String,
        params: TaskParams,
    ) -> PersistentResult<()> {
        if self.tasks.contains_key(&task_id) {
            return Err(PersistentError::AlreadyExists(task_id));
        }
        self.completed.shift_remove(&task_id);
        let task = PersistentTask {
            id: task_id.clone(),
            task_type,
            params,
            state: None,
            assignment: Assignment::unassigned(INITIAL_ASSIGNMENT_EXPLANATION),
            allocation_id: AllocationId::NONE,
        };
        self.tasks.insert(task_id, task);
        Ok(())
    }

    pub fn remove_task(
        &mut self,
        task_id: &TaskId,
        retention: usize,
    ) -> PersistentResult<PersistentTask> {
        let Some(task) = self.tasks.shift_remove(task_id) else {
            return Err(PersistentError::NotFound(task_id.clone()));
        };
        self.record_completion(&task, TaskOutcome::Removed, retention);
        Ok(task)
    }

    /// Checks whether a notification for the allocation is authoritative.
    pub fn check_allocation(
        &self,
        task_id: &TaskId,
        allocation_id: AllocationId,
    ) -> Result<&PersistentTask, String> {
        let Some(task) = self.tasks.get(task_id) else {
            return Err(format!("task {task_id} not found"));
        };
        if task.allocation_id != allocation_id {
            return Err(format!(
                "task {task_id} has allocation {} but the request has allocation {allocation_id}",
                task.allocation_id
            ));
        }
        if !task.assignment.is_assigned() {
            return Err(format!("task {task_id} is not assigned"));
        }
        Ok(task)
    }

    pub fn complete_task(
        &mut self,
        task_id: &TaskId,
        allocation_id: AllocationId,
        failure: Option<String>,
        retention: usize,
    ) -> RegistryUpdateOutcome {
        if let Err(reason) = self.check_allocation(task_id, allocation_id) {
            return RegistryUpdateOutcome::Ignored(reason);
        }
        let Some(task) = self.tasks.shift_remove(task_id) else {
            return RegistryUpdateOutcome::Ignored(format!("task {task_id} not found"));
        };
        let outcome = match failure {
            Some(message) => TaskOutcome::Failed(message),
            None => TaskOutcome::Succeeded,
        };
        self.record_completion(&task, outcome, retention);
        RegistryUpdateOutcome::Applied
    }

    pub fn update_task_state(
        &mut self,
        task_id: &TaskId,
        allocation_id: AllocationId,
        state: TaskState,
    ) -> RegistryUpdateOutcome {
        if let Err(reason) = self.check_allocation(task_id, allocation_id) {
            return RegistryUpdateOutcome::Ignored(reason);
        }
        match self.tasks.get_mut(task_id) {
            Some(task) => {
                task.state = Some(state);
                RegistryUpdateOutcome::Applied
            }
            None => RegistryUpdateOutcome::Ignored(format!("task {task_id} not found")),
        }
    }

    /// Assigns the task to the node under a new allocation ID.
    pub fn assign(&mut self, task_id: &TaskId, node_id: NodeId) -> PersistentResult<AllocationId> {
        let allocation_id = self.last_allocation_id.next()?;
        let Some(task) = self.tasks.get_mut(task_id) else {
            return Err(PersistentError::NotFound(task_id.clone()));
        };
        task.assignment = Assignment::assigned(node_id);
        task.allocation_id = allocation_id;
        self.last_allocation_id = allocation_id;
        Ok(allocation_id)
    }

    /// Marks the task as unassigned while keeping its allocation ID.
    /// Returns whether the assignment changed.
    pub fn unassign(&mut self, task_id: &TaskId, explanation: String) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        let assignment = Assignment::unassigned(explanation);
        if task.assignment == assignment {
            return false;
        }
        task.assignment = assignment;
        true
    }

    fn record_completion(&mut self, task: &PersistentTask, outcome: TaskOutcome, retention: usize) {
        self.completed.shift_remove(&task.id);
        self.completed.insert(
            task.id.clone(),
            CompletedTask {
                id: task.id.clone(),
                task_type: task.task_type.clone(),
                allocation_id: task.allocation_id,
                outcome,
            },
        );
        while self.completed.len() > retention {
            self.completed.shift_remove_index(0);
        }
    }
}
