use std::collections::HashSet;
use std::sync::Arc;

use convoy_server::actor::{Actor, ActorAction, ActorContext};
use indexmap::IndexMap;
use log::info;

use crate::allocator::AllocatorEvent;
use crate::cluster_node::ClusterNodeOptions;
use crate::fault_detection::FaultDetector;
use crate::node::actor::NodeActor;
use crate::node::NodeEvent;
use crate::notifier::PersistentTasksClient;
use crate::store::forward_snapshots;

impl Actor for NodeActor {
    type Message = NodeEvent;
    type Options = ClusterNodeOptions;

    fn new(options: ClusterNodeOptions) -> Self {
        let notifier = Arc::new(PersistentTasksClient::new(
            options.node_id.clone(),
            Arc::clone(&options.store),
            Arc::clone(&options.transport),
            options.notifier_timeout,
        ));
        let master_detector = FaultDetector::new(
            options.node_id.clone(),
            Arc::clone(&options.transport),
            options.fault_detection.clone(),
        );
        Self {
            options,
            notifier,
            snapshot: None,
            executions: IndexMap::new(),
            finished: IndexMap::new(),
            resending: HashSet::new(),
            master: None,
            master_detector,
            master_reachable: true,
            allocator: None,
        }
    }

    fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!("starting node {}", self.options.node_id);
        self.master_detector.start(ctx);
        forward_snapshots(ctx, self.options.store.as_ref(), |snapshot| {
            NodeEvent::ClusterChanged { snapshot }
        });
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: NodeEvent) -> ActorAction {
        match message {
            NodeEvent::ClusterChanged { snapshot } => self.handle_cluster_changed(ctx, snapshot),
            NodeEvent::Reconcile { result } => self.handle_reconcile(ctx, result),
            NodeEvent::ExecutionTerminated { key, termination } => {
                self.handle_execution_terminated(ctx, key, termination)
            }
            NodeEvent::CompletionResent { key, result } => {
                self.handle_completion_resent(ctx, key, result)
            }
            NodeEvent::RetryCompletion { key } => self.handle_retry_completion(ctx, key),
            NodeEvent::CancelExecution {
                task_id,
                reason,
                result,
            } => self.handle_cancel_execution(ctx, task_id, reason, result),
            NodeEvent::ListExecutions { result } => {
                let _ = result.send(self.list_executions());
                ActorAction::Continue
            }
            NodeEvent::DescribeNode { result } => {
                let _ = result.send(self.describe());
                ActorAction::Continue
            }
            NodeEvent::MasterRequest { request, result } => {
                self.handle_master_request(ctx, request, result)
            }
            NodeEvent::PingMaster { node_id, epoch } => {
                self.master_detector.handle_ping(ctx, node_id, epoch);
                ActorAction::Continue
            }
            NodeEvent::PingResult {
                node_id,
                epoch,
                result,
            } => {
                let signal = self
                    .master_detector
                    .handle_ping_result(ctx, node_id, epoch, result);
                self.handle_master_signal(ctx, signal)
            }
            NodeEvent::Connection { event } => {
                let signal = self.master_detector.handle_connection_event(ctx, event);
                self.handle_master_signal(ctx, signal)
            }
            NodeEvent::Shutdown => ActorAction::Stop,
        }
    }

    fn stop(self, _: &mut ActorContext<Self>) {
        info!("stopping node {}", self.options.node_id);
        for execution in self.executions.values() {
            execution.mark_as_cancelled();
        }
        if let Some(allocator) = self.allocator {
            // The actor context is shutting down, so the message is sent from a detached task.
            tokio::spawn(async move {
                let _ = allocator.send(AllocatorEvent::Shutdown).await;
            });
        }
    }
}
