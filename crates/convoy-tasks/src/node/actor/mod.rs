mod core;
mod handler;
mod reconcile;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_server::actor::ActorHandle;
use indexmap::IndexMap;

use crate::allocator::AllocatorActor;
use crate::cluster::ClusterSnapshot;
use crate::cluster_node::ClusterNodeOptions;
use crate::execution::{ExecutionObserver, ExecutionTermination, TaskExecution};
use crate::fault_detection::FaultDetector;
use crate::id::{ExecutionKey, NodeId};
use crate::node::NodeEvent;
use crate::notifier::CompletionNotifier;

/// The per-node owner of task executions.
/// It reconciles the executions on this node with every registry snapshot,
/// watches the master, and hosts the allocator while this node is the master.
pub struct NodeActor {
    options: ClusterNodeOptions,
    notifier: Arc<dyn CompletionNotifier>,
    snapshot: Option<Arc<ClusterSnapshot>>,
    executions: IndexMap<ExecutionKey, Arc<TaskExecution>>,
    /// Executions that have finished but are still referenced by the registry.
    finished: IndexMap<ExecutionKey, FinishedExecution>,
    /// Finished executions whose completion is being sent again.
    resending: HashSet<ExecutionKey>,
    master: Option<NodeId>,
    master_detector: FaultDetector,
    master_reachable: bool,
    allocator: Option<ActorHandle<AllocatorActor>>,
}

struct FinishedExecution {
    task_type: String,
    failure: Option<String>,
    notified: bool,
}

/// Reports terminated executions back to the node actor.
struct ExecutionReporter {
    handle: ActorHandle<NodeActor>,
}

#[async_trait]
impl ExecutionObserver for ExecutionReporter {
    async fn on_terminated(&self, key: ExecutionKey, termination: ExecutionTermination) {
        let _ = self
            .handle
            .send(NodeEvent::ExecutionTerminated { key, termination })
            .await;
    }
}
