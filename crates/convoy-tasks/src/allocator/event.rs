use std::sync::Arc;

use tokio::sync::oneshot;

use crate::cluster::ClusterSnapshot;
use crate::error::PersistentResult;
use crate::fault_detection::FaultDetectorMessage;
use crate::id::{AllocationId, NodeId, TaskId};
use crate::notifier::TaskAck;
use crate::store::ProposeOutcome;
use crate::task::{PersistentTask, TaskParams, TaskState};
use crate::transport::ConnectionEvent;

pub enum AllocatorEvent {
    ClusterChanged {
        snapshot: Arc<ClusterSnapshot>,
    },
    CreateTask {
        task_id: TaskId,
        task_type: String,
        params: TaskParams,
        result: oneshot::Sender<PersistentResult<PersistentTask>>,
    },
    RemoveTask {
        task_id: TaskId,
        result: oneshot::Sender<PersistentResult<PersistentTask>>,
    },
    CompleteTask {
        task_id: TaskId,
        allocation_id: AllocationId,
        failure: Option<String>,
        result: oneshot::Sender<PersistentResult<TaskAck>>,
    },
    UpdateTaskState {
        task_id: TaskId,
        allocation_id: AllocationId,
        state: TaskState,
        result: oneshot::Sender<PersistentResult<TaskAck>>,
    },
    ProposalSettled {
        outcome: PersistentResult<ProposeOutcome>,
    },
    PingNode {
        node_id: NodeId,
        epoch: u64,
    },
    PingResult {
        node_id: NodeId,
        epoch: u64,
        result: PersistentResult<()>,
    },
    Connection {
        event: ConnectionEvent,
    },
    Shutdown,
}

impl FaultDetectorMessage for AllocatorEvent {
    fn ping(node_id: NodeId, epoch: u64) -> Self {
        AllocatorEvent::PingNode { node_id, epoch }
    }

    fn ping_result(node_id: NodeId, epoch: u64, result: PersistentResult<()>) -> Self {
        AllocatorEvent::PingResult {
            node_id,
            epoch,
            result,
        }
    }

    fn connection_event(event: ConnectionEvent) -> Self {
        AllocatorEvent::Connection { event }
    }
}
