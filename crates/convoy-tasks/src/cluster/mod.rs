use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::{NodeId, TaskId};
use crate::task::{PersistentTask, TaskRegistry, TaskStatus};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub attributes: BTreeMap<String, String>,
}

impl NodeInfo {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The cluster membership as published by the membership layer.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    master: Option<NodeId>,
    nodes: IndexMap<NodeId, NodeInfo>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.add_node(node);
        self
    }

    pub fn with_master(mut self, master: impl Into<NodeId>) -> Self {
        self.master = Some(master.into());
        self
    }

    pub fn add_node(&mut self, node: NodeInfo) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Removes the node. The master is cleared as well if the node was the master.
    pub fn remove_node(&mut self, node_id: &NodeId) -> Option<NodeInfo> {
        if self.master.as_ref() == Some(node_id) {
            self.master = None;
        }
        self.nodes.shift_remove(node_id)
    }

    pub fn set_master(&mut self, master: Option<NodeId>) {
        self.master = master;
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn is_master(&self, node_id: &NodeId) -> bool {
        self.master.as_ref() == Some(node_id)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }
}

/// One committed version of the replicated cluster state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub version: u64,
    pub topology: Topology,
    pub tasks: TaskRegistry,
}

impl ClusterSnapshot {
    pub fn task(&self, task_id: &TaskId) -> Option<&PersistentTask> {
        self.tasks.get(task_id)
    }

    pub fn task_status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.tasks.status(task_id)
    }

    pub fn tasks_assigned_to<'a>(
        &'a self,
        node_id: &'a NodeId,
    ) -> impl Iterator<Item = &'a PersistentTask> + 'a {
        self.tasks.tasks().filter(move |x| x.is_assigned_to(node_id))
    }
}
