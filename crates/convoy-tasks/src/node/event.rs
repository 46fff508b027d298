use std::sync::Arc;

use tokio::sync::oneshot;

use crate::cluster::ClusterSnapshot;
use crate::error::PersistentResult;
use crate::execution::ExecutionTermination;
use crate::fault_detection::FaultDetectorMessage;
use crate::id::{ExecutionKey, NodeId, TaskId};
use crate::node::{ExecutionInfo, NodeStatus, ReconcileReport};
use crate::notifier::TaskAck;
use crate::transport::{ConnectionEvent, TransportRequest, TransportResponse};

pub enum NodeEvent {
    ClusterChanged {
        snapshot: Arc<ClusterSnapshot>,
    },
    /// Runs a reconciliation pass against the last seen snapshot.
    Reconcile {
        result: oneshot::Sender<ReconcileReport>,
    },
    ExecutionTerminated {
        key: ExecutionKey,
        termination: ExecutionTermination,
    },
    CompletionResent {
        key: ExecutionKey,
        result: PersistentResult<TaskAck>,
    },
    /// Sends the completion of a finished execution again if it is still unacknowledged.
    RetryCompletion {
        key: ExecutionKey,
    },
    CancelExecution {
        task_id: TaskId,
        reason: String,
        result: oneshot::Sender<bool>,
    },
    ListExecutions {
        result: oneshot::Sender<Vec<ExecutionInfo>>,
    },
    DescribeNode {
        result: oneshot::Sender<NodeStatus>,
    },
    /// A task request that must be served by the allocator of this node.
    MasterRequest {
        request: TransportRequest,
        result: oneshot::Sender<PersistentResult<TransportResponse>>,
    },
    PingMaster {
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

impl FaultDetectorMessage for NodeEvent {
    fn ping(node_id: NodeId, epoch: u64) -> Self {
        NodeEvent::PingMaster { node_id, epoch }
    }

    fn ping_result(node_id: NodeId, epoch: u64, result: PersistentResult<()>) -> Self {
        NodeEvent::PingResult {
            node_id,
            epoch,
            result,
        }
    }

    fn connection_event(event: ConnectionEvent) -> Self {
        NodeEvent::Connection { event }
    }
}
