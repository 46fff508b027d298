use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::error::{PersistentError, PersistentResult};
use crate::id::{AllocationId, NodeId, TaskId};
use crate::notifier::{CompletionNotifier, TaskAck, TaskPredicate};
use crate::store::RegistryStore;
use crate::task::{PersistentTask, TaskParams, TaskState};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// Sends task requests to whichever node currently holds the master role.
pub struct PersistentTasksClient {
    node_id: NodeId,
    store: Arc<dyn RegistryStore>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl PersistentTasksClient {
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn RegistryStore>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            store,
            transport,
            timeout,
        }
    }

    pub async fn create_task(
        &self,
        task_id: TaskId,
        task_type: String,
        params: TaskParams,
    ) -> PersistentResult<PersistentTask> {
        let request = TransportRequest::CreateTask {
            task_id,
            task_type,
            params,
        };
        match self.send_to_master(request).await? {
            TransportResponse::Task(task) => Ok(task),
            x => Err(unexpected_response(x)),
        }
    }

    pub async fn remove_task(&self, task_id: TaskId) -> PersistentResult<PersistentTask> {
        match self
            .send_to_master(TransportRequest::RemoveTask { task_id })
            .await?
        {
            TransportResponse::Task(task) => Ok(task),
            x => Err(unexpected_response(x)),
        }
    }

    async fn send_ack_request(&self, request: TransportRequest) -> PersistentResult<TaskAck> {
        match self.send_to_master(request).await? {
            TransportResponse::Ack(ack) => Ok(ack),
            x => Err(unexpected_response(x)),
        }
    }

    async fn send_to_master(&self, request: TransportRequest) -> PersistentResult<TransportResponse> {
        let master = self
            .store
            .current_snapshot()
            .topology
            .master()
            .cloned()
            .ok_or(PersistentError::NoMaster)?;
        debug!(
            "node {} sending {} request to master {master}",
            self.node_id,
            request.name()
        );
        let name = request.name();
        let result = match tokio::time::timeout(self.timeout, self.transport.send(&master, request))
            .await
        {
            Ok(x) => x,
            Err(_) => Err(PersistentError::Timeout(format!(
                "{name} request to master {master}"
            ))),
        };
        match result {
            Ok(x) => Ok(x),
            Err(e) => {
                let current = self.store.current_snapshot().topology.master().cloned();
                if current.as_ref() != Some(&master) {
                    Err(PersistentError::MasterChanged {
                        from: master,
                        to: current,
                    })
                } else {
                    Err(e)
                }
            }
        }
    }
}

fn unexpected_response(response: TransportResponse) -> PersistentError {
    PersistentError::internal(format!("unexpected response: {response:?}"))
}

#[async_trait]
impl CompletionNotifier for PersistentTasksClient {
    async fn update_state(
        &self,
        task_id: &TaskId,
        allocation_id: AllocationId,
        state: TaskState,
    ) -> PersistentResult<TaskAck> {
        self.send_ack_request(TransportRequest::UpdateTaskState {
            task_id: task_id.clone(),
            allocation_id,
            state,
        })
        .await
    }

    async fn send_completion(
        &self,
        task_id: &TaskId,
        allocation_id: AllocationId,
        failure: Option<String>,
    ) -> PersistentResult<TaskAck> {
        self.send_ack_request(TransportRequest::CompleteTask {
            task_id: task_id.clone(),
            allocation_id,
            failure,
        })
        .await
    }

    async fn wait_for_condition(
        &self,
        task_id: &TaskId,
        predicate: &TaskPredicate,
        timeout: Option<Duration>,
    ) -> PersistentResult<Option<PersistentTask>> {
        // Subscribe before reading the current snapshot so that no commit is missed.
        let mut subscription = self.store.subscribe();
        let snapshot = self.store.current_snapshot();
        let task = snapshot.task(task_id);
        if predicate(task) {
            return Ok(task.cloned());
        }
        let wait = async {
            while let Some(snapshot) = subscription.recv().await {
                let task = snapshot.task(task_id);
                if predicate(task) {
                    return Ok(task.cloned());
                }
            }
            Err(PersistentError::internal("the registry store is closed"))
        };
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(x) => x,
                Err(_) => Err(PersistentError::Timeout(format!(
                    "waiting for task {task_id} after {timeout:?}"
                ))),
            },
            None => wait.await,
        }
    }
}
