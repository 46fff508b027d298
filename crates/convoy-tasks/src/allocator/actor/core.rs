use std::collections::VecDeque;
use std::sync::Arc;

use convoy_server::actor::{Actor, ActorAction, ActorContext};
use log::info;

use crate::allocator::actor::{AllocatorActor, PendingUpdate};
use crate::allocator::{AllocatorEvent, AllocatorOptions};
use crate::error::PersistentError;
use crate::fault_detection::FaultDetector;
use crate::store::forward_snapshots;

impl Actor for AllocatorActor {
    type Message = AllocatorEvent;
    type Options = AllocatorOptions;

    fn new(options: AllocatorOptions) -> Self {
        let fault_detector = FaultDetector::new(
            options.node_id.clone(),
            Arc::clone(&options.transport),
            options.fault_detection.clone(),
        );
        Self {
            options,
            fault_detector,
            queue: VecDeque::new(),
            proposal: None,
            last_seen_version: None,
        }
    }

    fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!("starting the task allocator on node {}", self.options.node_id);
        self.fault_detector.start(ctx);
        forward_snapshots(ctx, self.options.store.as_ref(), |snapshot| {
            AllocatorEvent::ClusterChanged { snapshot }
        });
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: AllocatorEvent) -> ActorAction {
        match message {
            AllocatorEvent::ClusterChanged { snapshot } => {
                self.handle_cluster_changed(ctx, snapshot)
            }
            AllocatorEvent::CreateTask {
                task_id,
                task_type,
                params,
                result,
            } => self.handle_create_task(ctx, task_id, task_type, params, result),
            AllocatorEvent::RemoveTask { task_id, result } => {
                self.handle_remove_task(ctx, task_id, result)
            }
            AllocatorEvent::CompleteTask {
                task_id,
                allocation_id,
                failure,
                result,
            } => self.handle_complete_task(ctx, task_id, allocation_id, failure, result),
            AllocatorEvent::UpdateTaskState {
                task_id,
                allocation_id,
                state,
                result,
            } => self.handle_update_task_state(ctx, task_id, allocation_id, state, result),
            AllocatorEvent::ProposalSettled { outcome } => {
                self.handle_proposal_settled(ctx, outcome)
            }
            AllocatorEvent::PingNode { node_id, epoch } => {
                self.fault_detector.handle_ping(ctx, node_id, epoch);
                ActorAction::Continue
            }
            AllocatorEvent::PingResult {
                node_id,
                epoch,
                result,
            } => {
                let signal = self
                    .fault_detector
                    .handle_ping_result(ctx, node_id, epoch, result);
                self.handle_fault_signal(ctx, signal)
            }
            AllocatorEvent::Connection { event } => {
                let signal = self.fault_detector.handle_connection_event(ctx, event);
                self.handle_fault_signal(ctx, signal)
            }
            AllocatorEvent::Shutdown => ActorAction::Stop,
        }
    }

    fn stop(mut self, _: &mut ActorContext<Self>) {
        info!("stopping the task allocator on node {}", self.options.node_id);
        for PendingUpdate { reply, .. } in self.queue.drain(..) {
            reply.send(Err(PersistentError::NotMaster(self.options.node_id.clone())));
        }
    }
}
