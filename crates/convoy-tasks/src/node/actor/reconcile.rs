use std::sync::Arc;

use convoy_server::actor::ActorContext;
use log::{info, warn};

use crate::cluster::ClusterSnapshot;
use crate::execution::TaskExecution;
use crate::id::{ExecutionKey, NodeId};
use crate::node::actor::{ExecutionReporter, NodeActor};
use crate::node::{NodeEvent, ReconcileReport};
use crate::task::{PersistentTask, TaskContext};

impl NodeActor {
    /// Brings the executions on this node in line with the snapshot.
    /// Running the pass again on the same snapshot starts and cancels nothing.
    pub(super) fn reconcile(
        &mut self,
        ctx: &mut ActorContext<Self>,
        snapshot: &ClusterSnapshot,
    ) -> ReconcileReport {
        let node_id = self.options.node_id.clone();
        let mut report = ReconcileReport::default();

        for task in snapshot.tasks_assigned_to(&node_id) {
            let key = task.execution_key();
            if self.executions.contains_key(&key) {
                continue;
            }
            if self.finished.contains_key(&key) {
                if self.resend_completion_if_needed(ctx, &key) {
                    report.resent.push(key);
                }
                continue;
            }
            self.start_execution(ctx, task);
            report.started.push(key);
        }

        for (key, execution) in self.executions.iter() {
            if !is_current(snapshot, &node_id, key) && execution.mark_as_cancelled() {
                report.cancelled.push(key.clone());
            }
        }

        self.finished
            .retain(|key, _| is_current(snapshot, &node_id, key));
        report
    }

    pub(super) fn is_referenced(&self, key: &ExecutionKey) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|x| is_current(x, &self.options.node_id, key))
    }

    fn start_execution(&mut self, ctx: &mut ActorContext<Self>, task: &PersistentTask) {
        let key = task.execution_key();
        let reporter = ExecutionReporter {
            handle: ctx.handle().clone(),
        };
        let execution = TaskExecution::new(
            key.clone(),
            task.task_type.clone(),
            Arc::clone(&self.notifier),
            Arc::new(reporter),
        );
        self.executions.insert(key.clone(), Arc::clone(&execution));
        match self.options.handlers.get(&task.task_type) {
            Some(handler) => {
                info!("starting {key} on node {}", self.options.node_id);
                let context = TaskContext::new(task, Arc::clone(&execution));
                ctx.spawn(execution.run(handler, context));
            }
            None => {
                let failure = format!("no handler registered for task type [{}]", task.task_type);
                warn!("cannot start {key}: {failure}");
                ctx.spawn(async move {
                    execution.mark_as_failed(failure).await;
                });
            }
        }
    }

    /// Sends the completion of a finished execution again unless it has been acknowledged,
    /// is already being sent, or the registry no longer references the execution.
    pub(super) fn resend_completion_if_needed(
        &mut self,
        ctx: &mut ActorContext<Self>,
        key: &ExecutionKey,
    ) -> bool {
        let Some(finished) = self.finished.get(key) else {
            return false;
        };
        if finished.notified || self.resending.contains(key) || !self.is_referenced(key) {
            return false;
        }
        let failure = finished.failure.clone();
        self.resend_completion(ctx, key.clone(), failure);
        true
    }

    fn resend_completion(
        &mut self,
        ctx: &mut ActorContext<Self>,
        key: ExecutionKey,
        failure: Option<String>,
    ) {
        info!("sending completion of {key} again");
        self.resending.insert(key.clone());
        let notifier = Arc::clone(&self.notifier);
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let result = notifier
                .send_completion(&key.task_id, key.allocation_id, failure)
                .await;
            let _ = handle
                .send(NodeEvent::CompletionResent { key, result })
                .await;
        });
    }
}

/// Whether the registry still assigns the execution to the node.
fn is_current(snapshot: &ClusterSnapshot, node_id: &NodeId, key: &ExecutionKey) -> bool {
    snapshot
        .task(&key.task_id)
        .is_some_and(|x| x.allocation_id == key.allocation_id && x.is_assigned_to(node_id))
}
