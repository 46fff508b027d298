use std::sync::Arc;

use convoy_server::actor::{ActorAction, ActorContext};
use convoy_telemetry::common::SpanAttribute;
use fastrace::collector::SpanContext;
use fastrace::future::FutureExt;
use fastrace::Span;
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::allocator::actor::{AllocatorActor, PendingUpdate, Proposal, UpdateReply};
use crate::allocator::allocation::{Allocation, RegistryUpdate};
use crate::allocator::AllocatorEvent;
use crate::cluster::{ClusterSnapshot, Topology};
use crate::error::{PersistentError, PersistentResult};
use crate::fault_detection::FaultSignal;
use crate::id::{AllocationId, NodeId, TaskId};
use crate::notifier::TaskAck;
use crate::store::ProposeOutcome;
use crate::task::{PersistentTask, TaskParams, TaskRegistry, TaskState};

impl AllocatorActor {
    pub(super) fn handle_cluster_changed(
        &mut self,
        ctx: &mut ActorContext<Self>,
        snapshot: Arc<ClusterSnapshot>,
    ) -> ActorAction {
        if self
            .last_seen_version
            .is_some_and(|version| snapshot.version <= version)
        {
            return ActorAction::Continue;
        }
        self.last_seen_version = Some(snapshot.version);
        self.fault_detector
            .set_targets(ctx, snapshot.topology.node_ids().cloned());
        if !snapshot.topology.is_master(&self.options.node_id) {
            debug!(
                "node {} is not the master at version {}",
                self.options.node_id, snapshot.version
            );
            return ActorAction::Continue;
        }
        let has_pending_reallocation = self
            .queue
            .iter()
            .skip(usize::from(self.proposal.is_some()))
            .any(|x| matches!(x.update, RegistryUpdate::Reallocate));
        if has_pending_reallocation {
            return ActorAction::Continue;
        }
        let mut tasks = snapshot.tasks.clone();
        let changed = self.allocation(&snapshot.topology).allocate(&mut tasks);
        match changed {
            Ok(true) => self.enqueue(ctx, RegistryUpdate::Reallocate, UpdateReply::None),
            Ok(false) => {}
            Err(e) => return ActorAction::warn(format!("failed to allocate tasks: {e}")),
        }
        ActorAction::Continue
    }

    pub(super) fn handle_create_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        task_type: String,
        params: TaskParams,
        result: oneshot::Sender<PersistentResult<PersistentTask>>,
    ) -> ActorAction {
        let update = RegistryUpdate::CreateTask {
            task_id,
            task_type,
            params,
        };
        self.enqueue(ctx, update, UpdateReply::Task(result));
        ActorAction::Continue
    }

    pub(super) fn handle_remove_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        result: oneshot::Sender<PersistentResult<PersistentTask>>,
    ) -> ActorAction {
        self.enqueue(
            ctx,
            RegistryUpdate::RemoveTask { task_id },
            UpdateReply::Task(result),
        );
        ActorAction::Continue
    }

    pub(super) fn handle_complete_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        allocation_id: AllocationId,
        failure: Option<String>,
        result: oneshot::Sender<PersistentResult<TaskAck>>,
    ) -> ActorAction {
        let update = RegistryUpdate::CompleteTask {
            task_id,
            allocation_id,
            failure,
        };
        self.enqueue(ctx, update, UpdateReply::Ack(result));
        ActorAction::Continue
    }

    pub(super) fn handle_update_task_state(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        allocation_id: AllocationId,
        state: TaskState,
        result: oneshot::Sender<PersistentResult<TaskAck>>,
    ) -> ActorAction {
        let update = RegistryUpdate::UpdateTaskState {
            task_id,
            allocation_id,
            state,
        };
        self.enqueue(ctx, update, UpdateReply::Ack(result));
        ActorAction::Continue
    }

    pub(super) fn handle_proposal_settled(
        &mut self,
        ctx: &mut ActorContext<Self>,
        outcome: PersistentResult<ProposeOutcome>,
    ) -> ActorAction {
        let Some(proposal) = self.proposal.take() else {
            return ActorAction::warn("registry proposal settled without a proposal in flight");
        };
        match outcome {
            Ok(ProposeOutcome::Committed { version }) => {
                debug!("registry update committed at version {version}");
                if let Some(pending) = self.queue.pop_front() {
                    pending.reply.send(Ok(proposal.result));
                }
            }
            Ok(ProposeOutcome::Conflict { current_version }) => {
                // The update stays at the front of the queue and is applied again
                // to the latest snapshot.
                info!(
                    "registry update conflicted: expected version {} but found {current_version}",
                    proposal.expected_version
                );
                if let Some(pending) = self.queue.front_mut() {
                    pending.attempt += 1;
                }
            }
            Err(e) => {
                warn!("failed to propose registry update: {e}");
                if let Some(pending) = self.queue.pop_front() {
                    pending.reply.send(Err(e));
                }
            }
        }
        self.process_queue(ctx);
        ActorAction::Continue
    }

    pub(super) fn handle_fault_signal(
        &mut self,
        ctx: &mut ActorContext<Self>,
        signal: Option<FaultSignal>,
    ) -> ActorAction {
        match signal {
            Some(FaultSignal::Disconnected { node_id, reason }) => {
                info!("node {node_id} is considered faulty: {reason}");
                self.enqueue(ctx, RegistryUpdate::Reallocate, UpdateReply::None);
            }
            Some(FaultSignal::Reconnected { node_id }) => {
                info!("node {node_id} is considered live again");
                self.enqueue(ctx, RegistryUpdate::Reallocate, UpdateReply::None);
            }
            None => {}
        }
        ActorAction::Continue
    }

    fn allocation<'a>(
        &'a self,
        topology: &'a Topology,
    ) -> Allocation<'a, impl Fn(&NodeId) -> bool + 'a> {
        Allocation {
            topology,
            handlers: &self.options.handlers,
            is_faulty: move |node_id: &NodeId| self.fault_detector.is_disconnected(node_id),
            completed_task_retention: self.options.completed_task_retention,
        }
    }

    fn enqueue(&mut self, ctx: &mut ActorContext<Self>, update: RegistryUpdate, reply: UpdateReply) {
        self.queue.push_back(PendingUpdate {
            update,
            reply,
            attempt: 0,
        });
        self.process_queue(ctx);
    }

    /// Applies queued updates until one of them needs a proposal.
    fn process_queue(&mut self, ctx: &mut ActorContext<Self>) {
        if self.proposal.is_some() {
            return;
        }
        while let Some(pending) = self.queue.front() {
            let snapshot = self.options.store.current_snapshot();
            if !snapshot.topology.is_master(&self.options.node_id) {
                if let Some(pending) = self.queue.pop_front() {
                    pending
                        .reply
                        .send(Err(PersistentError::NotMaster(self.options.node_id.clone())));
                }
                continue;
            }
            let mut tasks = snapshot.tasks.clone();
            let result = self
                .allocation(&snapshot.topology)
                .apply(&mut tasks, &pending.update);
            let attempt = pending.attempt;
            match result {
                Ok(result) if tasks != snapshot.tasks => {
                    self.propose(ctx, snapshot.version, tasks, attempt);
                    self.proposal = Some(Proposal {
                        expected_version: snapshot.version,
                        result,
                    });
                    return;
                }
                result => {
                    if let Some(pending) = self.queue.pop_front() {
                        pending.reply.send(result);
                    }
                }
            }
        }
    }

    fn propose(
        &self,
        ctx: &mut ActorContext<Self>,
        expected_version: u64,
        tasks: TaskRegistry,
        attempt: usize,
    ) {
        let span = Span::root("AllocatorActor::propose", SpanContext::random())
            .with_property(|| (SpanAttribute::CLUSTER_NODE_ID, self.options.node_id.to_string()))
            .with_property(|| (SpanAttribute::REGISTRY_VERSION, expected_version.to_string()))
            .with_property(|| (SpanAttribute::REGISTRY_PROPOSAL_ATTEMPT, attempt.to_string()));
        let store = Arc::clone(&self.options.store);
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let outcome = store
                .propose_update(expected_version, tasks)
                .in_span(span)
                .await;
            let _ = handle.send(AllocatorEvent::ProposalSettled { outcome }).await;
        });
    }
}
