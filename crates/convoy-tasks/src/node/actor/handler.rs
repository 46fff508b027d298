use std::sync::Arc;

use convoy_server::actor::{ActorAction, ActorContext, ActorHandle};
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::allocator::{AllocatorActor, AllocatorEvent, AllocatorOptions};
use crate::cluster::ClusterSnapshot;
use crate::error::{PersistentError, PersistentResult};
use crate::execution::{ExecutionState, ExecutionTermination};
use crate::fault_detection::FaultSignal;
use crate::id::{ExecutionKey, NodeId, TaskId};
use crate::node::actor::{FinishedExecution, NodeActor};
use crate::node::{ExecutionInfo, NodeEvent, NodeStatus, ReconcileReport};
use crate::notifier::TaskAck;
use crate::transport::{TransportRequest, TransportResponse};

impl NodeActor {
    pub(super) fn handle_cluster_changed(
        &mut self,
        ctx: &mut ActorContext<Self>,
        snapshot: Arc<ClusterSnapshot>,
    ) -> ActorAction {
        if self
            .snapshot
            .as_ref()
            .is_some_and(|x| snapshot.version <= x.version)
        {
            return ActorAction::Continue;
        }
        self.snapshot = Some(Arc::clone(&snapshot));
        self.update_mastership(&snapshot);
        self.update_master_detector(ctx, &snapshot);
        let report = self.reconcile(ctx, &snapshot);
        if !report.is_empty() {
            debug!(
                "node {} reconciled version {}: {report:?}",
                self.options.node_id, snapshot.version
            );
        }
        ActorAction::Continue
    }

    pub(super) fn handle_reconcile(
        &mut self,
        ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<ReconcileReport>,
    ) -> ActorAction {
        let report = match self.snapshot.clone() {
            Some(snapshot) => self.reconcile(ctx, &snapshot),
            None => ReconcileReport::default(),
        };
        let _ = result.send(report);
        ActorAction::Continue
    }

    pub(super) fn handle_execution_terminated(
        &mut self,
        ctx: &mut ActorContext<Self>,
        key: ExecutionKey,
        termination: ExecutionTermination,
    ) -> ActorAction {
        let Some(execution) = self.executions.shift_remove(&key) else {
            return ActorAction::warn(format!("{key} is not running"));
        };
        let ExecutionTermination { failure, notified } = termination;
        info!(
            "{key} terminated{}",
            failure
                .as_ref()
                .map(|x| format!(" with failure: {x}"))
                .unwrap_or_default()
        );
        if !self.is_referenced(&key) {
            return ActorAction::Continue;
        }
        self.finished.insert(
            key.clone(),
            FinishedExecution {
                task_type: execution.task_type().to_string(),
                failure,
                notified,
            },
        );
        if !notified {
            if self.master_reachable {
                self.resend_completion_if_needed(ctx, &key);
            } else {
                let delay = self.options.fault_detection.ping_interval;
                ctx.send_with_delay(NodeEvent::RetryCompletion { key }, delay);
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_completion_resent(
        &mut self,
        ctx: &mut ActorContext<Self>,
        key: ExecutionKey,
        result: PersistentResult<TaskAck>,
    ) -> ActorAction {
        self.resending.remove(&key);
        match result {
            Ok(ack) => {
                if ack.is_applied() {
                    info!("completion of {key} is applied");
                } else {
                    debug!("completion of {key} is no longer needed: {ack:?}");
                }
                if let Some(finished) = self.finished.get_mut(&key) {
                    finished.notified = true;
                }
                ActorAction::Continue
            }
            Err(e) => {
                let delay = self.options.fault_detection.ping_interval;
                ctx.send_with_delay(NodeEvent::RetryCompletion { key: key.clone() }, delay);
                ActorAction::warn(format!(
                    "failed to send completion of {key} again, retrying in {delay:?}: {e}"
                ))
            }
        }
    }

    pub(super) fn handle_retry_completion(
        &mut self,
        ctx: &mut ActorContext<Self>,
        key: ExecutionKey,
    ) -> ActorAction {
        self.resend_completion_if_needed(ctx, &key);
        ActorAction::Continue
    }

    pub(super) fn handle_cancel_execution(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_id: TaskId,
        reason: String,
        result: oneshot::Sender<bool>,
    ) -> ActorAction {
        let cancelled = self
            .executions
            .values()
            .filter(|x| x.key().task_id == task_id)
            .fold(false, |acc, x| x.cancel(reason.clone()) || acc);
        let _ = result.send(cancelled);
        ActorAction::Continue
    }

    pub(super) fn handle_master_request(
        &mut self,
        ctx: &mut ActorContext<Self>,
        request: TransportRequest,
        result: oneshot::Sender<PersistentResult<TransportResponse>>,
    ) -> ActorAction {
        let node_id = self.options.node_id.clone();
        let Some(allocator) = self.allocator.clone() else {
            let _ = result.send(Err(PersistentError::NotMaster(node_id)));
            return ActorAction::Continue;
        };
        ctx.spawn(async move {
            let response = forward_to_allocator(allocator, node_id, request).await;
            let _ = result.send(response);
        });
        ActorAction::Continue
    }

    pub(super) fn handle_master_signal(
        &mut self,
        ctx: &mut ActorContext<Self>,
        signal: Option<FaultSignal>,
    ) -> ActorAction {
        match signal {
            Some(FaultSignal::Disconnected { node_id, reason }) => {
                warn!("master {node_id} is unreachable: {reason}");
                self.master_reachable = false;
            }
            Some(FaultSignal::Reconnected { node_id }) => {
                info!("master {node_id} is reachable again");
                self.master_reachable = true;
                if let Some(snapshot) = self.snapshot.clone() {
                    self.reconcile(ctx, &snapshot);
                }
            }
            None => {}
        }
        ActorAction::Continue
    }

    pub(super) fn list_executions(&self) -> Vec<ExecutionInfo> {
        let running = self.executions.values().map(|execution| ExecutionInfo {
            key: execution.key().clone(),
            task_type: execution.task_type().to_string(),
            state: execution.state(),
            failure: execution.failure().map(|x| x.to_string()),
        });
        let finished = self.finished.iter().map(|(key, finished)| ExecutionInfo {
            key: key.clone(),
            task_type: finished.task_type.clone(),
            state: ExecutionState::Completed,
            failure: finished.failure.clone(),
        });
        running.chain(finished).collect()
    }

    pub(super) fn describe(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.options.node_id.clone(),
            master: self.master.clone(),
            is_master: self.allocator.is_some(),
            master_reachable: self.master_reachable,
            registry_version: self.snapshot.as_ref().map(|x| x.version),
            executions: self.list_executions(),
        }
    }

    /// Starts the allocator when this node becomes the master and stops it otherwise.
    fn update_mastership(&mut self, snapshot: &ClusterSnapshot) {
        let is_master = snapshot.topology.is_master(&self.options.node_id);
        if is_master {
            if self.allocator.as_ref().is_some_and(|x| !x.is_stopped()) {
                return;
            }
            info!("node {} is the master", self.options.node_id);
            let options = AllocatorOptions::new(&self.options);
            self.allocator = Some(ActorHandle::<AllocatorActor>::new(options));
        } else if let Some(allocator) = self.allocator.take() {
            info!("node {} is no longer the master", self.options.node_id);
            tokio::spawn(async move {
                let _ = allocator.send(AllocatorEvent::Shutdown).await;
            });
        }
    }

    fn update_master_detector(&mut self, ctx: &mut ActorContext<Self>, snapshot: &ClusterSnapshot) {
        let master = snapshot.topology.master().cloned();
        if master == self.master {
            return;
        }
        match &master {
            Some(node_id) => info!("node {} follows master {node_id}", self.options.node_id),
            None => warn!("node {} has no master", self.options.node_id),
        }
        self.master_detector.set_targets(ctx, master.clone());
        self.master_reachable = master.is_some();
        self.master = master;
    }
}

async fn forward_to_allocator(
    allocator: ActorHandle<AllocatorActor>,
    node_id: NodeId,
    request: TransportRequest,
) -> PersistentResult<TransportResponse> {
    let not_master = || PersistentError::NotMaster(node_id.clone());
    match request {
        TransportRequest::Ping { .. } => Ok(TransportResponse::Pong),
        TransportRequest::CreateTask {
            task_id,
            task_type,
            params,
        } => {
            let (tx, rx) = oneshot::channel();
            let event = AllocatorEvent::CreateTask {
                task_id,
                task_type,
                params,
                result: tx,
            };
            allocator.send(event).await.map_err(|_| not_master())?;
            Ok(TransportResponse::Task(rx.await.map_err(|_| not_master())??))
        }
        TransportRequest::RemoveTask { task_id } => {
            let (tx, rx) = oneshot::channel();
            let event = AllocatorEvent::RemoveTask {
                task_id,
                result: tx,
            };
            allocator.send(event).await.map_err(|_| not_master())?;
            Ok(TransportResponse::Task(rx.await.map_err(|_| not_master())??))
        }
        TransportRequest::CompleteTask {
            task_id,
            allocation_id,
            failure,
        } => {
            let (tx, rx) = oneshot::channel();
            let event = AllocatorEvent::CompleteTask {
                task_id,
                allocation_id,
                failure,
                result: tx,
            };
            allocator.send(event).await.map_err(|_| not_master())?;
            Ok(TransportResponse::Ack(rx.await.map_err(|_| not_master())??))
        }
        TransportRequest::UpdateTaskState {
            task_id,
            allocation_id,
            state,
        } => {
            let (tx, rx) = oneshot::channel();
            let event = AllocatorEvent::UpdateTaskState {
                task_id,
                allocation_id,
                state,
                result: tx,
            };
            allocator.send(event).await.map_err(|_| not_master())?;
            Ok(TransportResponse::Ack(rx.await.map_err(|_| not_master())??))
        }
    }
}
