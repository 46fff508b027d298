use log::debug;

use crate::cluster::Topology;
use crate::error::{PersistentError, PersistentResult};
use crate::id::{AllocationId, NodeId, TaskId};
use crate::notifier::TaskAck;
use crate::task::{
    AllocationCandidate, AllocationCandidates, Assignment, HandlerRegistry, PersistentTask,
    RegistryUpdateOutcome, TaskParams, TaskRegistry, TaskState,
};

/// A mutation of the task registry requested from the allocator.
#[derive(Debug, Clone)]
pub(super) enum RegistryUpdate {
    CreateTask {
        task_id: TaskId,
        task_type: String,
        params: TaskParams,
    },
    RemoveTask {
        task_id: TaskId,
    },
    CompleteTask {
        task_id: TaskId,
        allocation_id: AllocationId,
        failure: Option<String>,
    },
    UpdateTaskState {
        task_id: TaskId,
        allocation_id: AllocationId,
        state: TaskState,
    },
    Reallocate,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum UpdateResult {
    Task(PersistentTask),
    Ack(TaskAck),
    Reallocated,
}

/// One allocation pass over a registry, given the cluster topology and
/// the nodes currently considered faulty.
pub(super) struct Allocation<'a, F>
where
    F: Fn(&NodeId) -> bool,
{
    pub topology: &'a Topology,
    pub handlers: &'a HandlerRegistry,
    pub is_faulty: F,
    pub completed_task_retention: usize,
}

impl<F> Allocation<'_, F>
where
    F: Fn(&NodeId) -> bool,
{
    fn is_live(&self, node_id: &NodeId) -> bool {
        self.topology.contains(node_id) && !(self.is_faulty)(node_id)
    }

    fn candidates(&self, tasks: &TaskRegistry) -> AllocationCandidates {
        let candidates = self
            .topology
            .nodes()
            .filter(|node| self.is_live(&node.id))
            .map(|node| AllocationCandidate {
                node: node.clone(),
                load: tasks.count_assigned_to(&node.id),
            })
            .collect();
        AllocationCandidates::new(candidates)
    }

    /// Applies the update and then runs an allocation pass over the whole registry.
    pub fn apply(
        &self,
        tasks: &mut TaskRegistry,
        update: &RegistryUpdate,
    ) -> PersistentResult<UpdateResult> {
        match update {
            RegistryUpdate::CreateTask {
                task_id,
                task_type,
                params,
            } => {
                if !self.handlers.contains(task_type) {
                    return Err(PersistentError::invalid(format!(
                        "no handler registered for task type [{task_type}]"
                    )));
                }
                tasks.add_task(task_id.clone(), task_type.clone(), params.clone())?;
                self.allocate(tasks)?;
                let task = tasks
                    .get(task_id)
                    .cloned()
                    .ok_or_else(|| PersistentError::NotFound(task_id.clone()))?;
                Ok(UpdateResult::Task(task))
            }
            RegistryUpdate::RemoveTask { task_id } => {
                let task = tasks.remove_task(task_id, self.completed_task_retention)?;
                self.allocate(tasks)?;
                Ok(UpdateResult::Task(task))
            }
            RegistryUpdate::CompleteTask {
                task_id,
                allocation_id,
                failure,
            } => {
                let outcome = tasks.complete_task(
                    task_id,
                    *allocation_id,
                    failure.clone(),
                    self.completed_task_retention,
                );
                self.allocate(tasks)?;
                let ack = match outcome {
                    RegistryUpdateOutcome::Applied => TaskAck::Applied(None),
                    RegistryUpdateOutcome::Ignored(reason) => TaskAck::Ignored(reason),
                };
                Ok(UpdateResult::Ack(ack))
            }
            RegistryUpdate::UpdateTaskState {
                task_id,
                allocation_id,
                state,
            } => {
                let outcome = tasks.update_task_state(task_id, *allocation_id, state.clone());
                self.allocate(tasks)?;
                let ack = match outcome {
                    RegistryUpdateOutcome::Applied => TaskAck::Applied(tasks.get(task_id).cloned()),
                    RegistryUpdateOutcome::Ignored(reason) => TaskAck::Ignored(reason),
                };
                Ok(UpdateResult::Ack(ack))
            }
            RegistryUpdate::Reallocate => {
                self.allocate(tasks)?;
                Ok(UpdateResult::Reallocated)
            }
        }
    }

    /// Assigns every task that has no live executor.
    /// Returns whether any assignment changed.
    pub fn allocate(&self, tasks: &mut TaskRegistry) -> PersistentResult<bool> {
        let mut changed = false;
        for task_id in tasks.task_ids() {
            let assignment = {
                let Some(task) = tasks.get(&task_id) else {
                    continue;
                };
                if task
                    .assignment
                    .executor_node()
                    .is_some_and(|node_id| self.is_live(node_id))
                {
                    continue;
                }
                let candidates = self.candidates(tasks);
                let assignment = match self.handlers.get(&task.task_type) {
                    Some(handler) => handler.select_node(task, &candidates),
                    None => Assignment::unassigned(format!(
                        "no handler registered for task type [{}]",
                        task.task_type
                    )),
                };
                match assignment.executor_node() {
                    Some(node_id) if !candidates.contains(node_id) => Assignment::unassigned(
                        format!("node {node_id} selected for the task is not eligible"),
                    ),
                    _ => assignment,
                }
            };
            match assignment.executor_node() {
                Some(node_id) => {
                    let allocation_id = tasks.assign(&task_id, node_id.clone())?;
                    debug!("assigned task {task_id} to node {node_id} with allocation {allocation_id}");
                    changed = true;
                }
                None => {
                    if tasks.unassign(&task_id, assignment.explanation().to_string()) {
                        debug!(
                            "task {task_id} is unassigned: {}",
                            assignment.explanation()
                        );
                        changed = true;
                    }
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cluster::NodeInfo;
    use crate::task::{TaskContext, TaskHandler};

    struct TestHandler;

    #[async_trait]
    impl TaskHandler for TestHandler {
        fn task_type(&self) -> &str {
            "test"
        }

        async fn run(&self, _: TaskContext) -> Result<(), String> {
            Ok(())
        }
    }

    struct ZoneHandler;

    #[async_trait]
    impl TaskHandler for ZoneHandler {
        fn task_type(&self) -> &str {
            "zoned"
        }

        async fn run(&self, _: TaskContext) -> Result<(), String> {
            Ok(())
        }

        fn select_node(
            &self,
            _: &PersistentTask,
            candidates: &AllocationCandidates,
        ) -> Assignment {
            let candidates = candidates
                .filter(|node| node.attributes.get("zone").is_some_and(|x| x == "west"));
            if candidates.is_empty() {
                Assignment::unassigned("no node in zone [west]")
            } else {
                candidates.least_loaded()
            }
        }
    }

    fn handlers() -> HandlerRegistry {
        HandlerRegistry::new()
            .with_handler(Arc::new(TestHandler))
            .with_handler(Arc::new(ZoneHandler))
    }

    fn topology() -> Topology {
        Topology::new()
            .with_node(NodeInfo::new("a"))
            .with_node(NodeInfo::new("b").with_attribute("zone", "west"))
            .with_master("a")
    }

    fn create(id: &str, task_type: &str) -> RegistryUpdate {
        RegistryUpdate::CreateTask {
            task_id: TaskId::from(id),
            task_type: task_type.to_string(),
            params: json!({}),
        }
    }

    fn executor(tasks: &TaskRegistry, id: &str) -> Option<NodeId> {
        tasks
            .get(&TaskId::from(id))
            .and_then(|x| x.assignment.executor_node().cloned())
    }

    #[test]
    fn test_create_assigns_least_loaded_node() -> PersistentResult<()> {
        let topology = topology();
        let handlers = handlers();
        let allocation = Allocation {
            topology: &topology,
            handlers: &handlers,
            is_faulty: |_: &NodeId| false,
            completed_task_retention: 10,
        };
        let mut tasks = TaskRegistry::new();
        for id in ["t1", "t2", "t3"] {
            let result = allocation.apply(&mut tasks, &create(id, "test"))?;
            assert!(matches!(result, UpdateResult::Task(_)));
        }
        assert_eq!(executor(&tasks, "t1"), Some(NodeId::from("a")));
        assert_eq!(executor(&tasks, "t2"), Some(NodeId::from("b")));
        assert_eq!(executor(&tasks, "t3"), Some(NodeId::from("a")));
        assert_eq!(
            tasks.get(&TaskId::from("t3")).map(|x| x.allocation_id),
            Some(AllocationId::from(3))
        );

        // An unchanged registry is left alone.
        assert!(!allocation.allocate(&mut tasks)?);
        Ok(())
    }

    #[test]
    fn test_create_rejects_unknown_type() {
        let topology = topology();
        let handlers = handlers();
        let allocation = Allocation {
            topology: &topology,
            handlers: &handlers,
            is_faulty: |_: &NodeId| false,
            completed_task_retention: 10,
        };
        let mut tasks = TaskRegistry::new();
        let result = allocation.apply(&mut tasks, &create("t1", "unknown"));
        assert!(matches!(result, Err(PersistentError::InvalidArgument(_))));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_faulty_node_tasks_are_reassigned() -> PersistentResult<()> {
        let topology = topology();
        let handlers = handlers();
        let healthy = Allocation {
            topology: &topology,
            handlers: &handlers,
            is_faulty: |_: &NodeId| false,
            completed_task_retention: 10,
        };
        let mut tasks = TaskRegistry::new();
        healthy.apply(&mut tasks, &create("t1", "test"))?;
        healthy.apply(&mut tasks, &create("t2", "test"))?;
        assert_eq!(executor(&tasks, "t2"), Some(NodeId::from("b")));

        let b_faulty = |node_id: &NodeId| node_id.as_str() == "b";
        let degraded = Allocation {
            topology: &topology,
            handlers: &handlers,
            is_faulty: b_faulty,
            completed_task_retention: 10,
        };
        assert!(degraded.allocate(&mut tasks)?);
        assert_eq!(executor(&tasks, "t2"), Some(NodeId::from("a")));
        assert_eq!(
            tasks.get(&TaskId::from("t2")).map(|x| x.allocation_id),
            Some(AllocationId::from(3))
        );
        Ok(())
    }

    #[test]
    fn test_no_eligible_node_keeps_allocation() -> PersistentResult<()> {
        let topology = topology();
        let handlers = handlers();
        let healthy = Allocation {
            topology: &topology,
            handlers: &handlers,
            is_faulty: |_: &NodeId| false,
            completed_task_retention: 10,
        };
        let mut tasks = TaskRegistry::new();
        healthy.apply(&mut tasks, &create("z1", "zoned"))?;
        assert_eq!(executor(&tasks, "z1"), Some(NodeId::from("b")));

        let b_faulty = |node_id: &NodeId| node_id.as_str() == "b";
        let degraded = Allocation {
            topology: &topology,
            handlers: &handlers,
            is_faulty: b_faulty,
            completed_task_retention: 10,
        };
        assert!(degraded.allocate(&mut tasks)?);
        let task = tasks.get(&TaskId::from("z1"));
        assert_eq!(task.map(|x| x.allocation_id), Some(AllocationId::from(1)));
        assert_eq!(
            task.map(|x| x.assignment.explanation()),
            Some("no node in zone [west]")
        );
        assert!(!degraded.allocate(&mut tasks)?);

        // The task is assigned again once the node is back.
        assert!(healthy.allocate(&mut tasks)?);
        assert_eq!(executor(&tasks, "z1"), Some(NodeId::from("b")));
        Ok(())
    }

    #[test]
    fn test_stale_completion_leaves_registry_unchanged() -> PersistentResult<()> {
        let topology = topology();
        let handlers = handlers();
        let allocation = Allocation {
            topology: &topology,
            handlers: &handlers,
            is_faulty: |_: &NodeId| false,
            completed_task_retention: 10,
        };
        let mut tasks = TaskRegistry::new();
        allocation.apply(&mut tasks, &create("t1", "test"))?;
        let before = tasks.clone();
        let result = allocation.apply(
            &mut tasks,
            &RegistryUpdate::CompleteTask {
                task_id: TaskId::from("t1"),
                allocation_id: AllocationId::NONE,
                failure: None,
            },
        )?;
        assert!(matches!(result, UpdateResult::Ack(TaskAck::Ignored(_))));
        assert_eq!(tasks, before);

        let result = allocation.apply(
            &mut tasks,
            &RegistryUpdate::CompleteTask {
                task_id: TaskId::from("t1"),
                allocation_id: AllocationId::from(1),
                failure: None,
            },
        )?;
        assert_eq!(result, UpdateResult::Ack(TaskAck::Applied(None)));
        assert!(tasks.is_empty());
        Ok(())
    }
}
