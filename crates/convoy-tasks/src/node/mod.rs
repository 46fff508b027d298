mod actor;
mod event;
mod server;

pub use actor::NodeActor;
pub use event::NodeEvent;
pub use server::NodeRequestHandler;

use crate::execution::ExecutionState;
use crate::id::{ExecutionKey, NodeId};

/// The executions started and cancelled by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub started: Vec<ExecutionKey>,
    pub cancelled: Vec<ExecutionKey>,
    /// Finished executions whose lost completion was sent again.
    pub resent: Vec<ExecutionKey>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.cancelled.is_empty() && self.resent.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionInfo {
    pub key: ExecutionKey,
    pub task_type: String,
    pub state: ExecutionState,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub master: Option<NodeId>,
    pub is_master: bool,
    /// Whether the master answers pings. Always `true` on the master itself.
    pub master_reachable: bool,
    pub registry_version: Option<u64>,
    pub executions: Vec<ExecutionInfo>,
}
