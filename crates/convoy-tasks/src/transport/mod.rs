mod local;

use async_trait::async_trait;
pub use local::LocalTransport;
use tokio::sync::mpsc;

use crate::error::PersistentResult;
use crate::id::{AllocationId, NodeId, TaskId};
use crate::notifier::TaskAck;
use crate::task::{PersistentTask, TaskParams, TaskState};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportRequest {
    Ping {
        from: NodeId,
    },
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
}

impl TransportRequest {
    pub fn name(&self) -> &'static str {
        match self {
            TransportRequest::Ping { .. } => "ping",
            TransportRequest::CreateTask { .. } => "create task",
            TransportRequest::RemoveTask { .. } => "remove task",
            TransportRequest::CompleteTask { .. } => "complete task",
            TransportRequest::UpdateTaskState { .. } => "update task state",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportResponse {
    Pong,
    Task(PersistentTask),
    Ack(TaskAck),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionEvent {
    Connected(NodeId),
    Closed(NodeId),
}

/// The point-to-point messaging layer between nodes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends the request to the node and waits for its response.
    /// The call may never complete if the node does not respond,
    /// so callers are expected to bound it with a timeout.
    async fn send(
        &self,
        node_id: &NodeId,
        request: TransportRequest,
    ) -> PersistentResult<TransportResponse>;

    fn subscribe_connections(&self) -> mpsc::UnboundedReceiver<ConnectionEvent>;
}

/// Serves the requests that arrive at one node.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: TransportRequest) -> PersistentResult<TransportResponse>;
}
