//! The composition root of a cluster node.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use convoy_common::config::AppConfig;
use convoy_server::actor::ActorHandle;
use convoy_server::RetryStrategy;
use log::info;
use tokio::sync::oneshot;

use crate::cluster::NodeInfo;
use crate::error::{PersistentError, PersistentResult};
use crate::execution::DEFAULT_CANCEL_REASON;
use crate::fault_detection::FaultDetectionOptions;
use crate::id::{NodeId, TaskId};
use crate::node::{ExecutionInfo, NodeActor, NodeEvent, NodeRequestHandler, NodeStatus, ReconcileReport};
use crate::notifier::PersistentTasksClient;
use crate::service::PersistentTasksService;
use crate::store::RegistryStore;
use crate::task::HandlerRegistry;
use crate::transport::{RequestHandler, Transport};

#[readonly::make]
#[derive(Clone)]
pub struct ClusterNodeOptions {
    pub node_id: NodeId,
    pub attributes: BTreeMap<String, String>,
    /// The number of completed tasks kept in the registry history.
    pub completed_task_retention: usize,
    pub notifier_timeout: Duration,
    pub rpc_retry_strategy: RetryStrategy,
    pub fault_detection: FaultDetectionOptions,
    pub store: Arc<dyn RegistryStore>,
    pub transport: Arc<dyn Transport>,
    pub handlers: Arc<HandlerRegistry>,
}

impl ClusterNodeOptions {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn RegistryStore>,
        transport: Arc<dyn Transport>,
        handlers: HandlerRegistry,
    ) -> PersistentResult<Self> {
        if config.cluster.node_id.is_empty() {
            return Err(PersistentError::invalid("the cluster node ID must not be empty"));
        }
        Ok(Self {
            node_id: NodeId::from(config.cluster.node_id.as_str()),
            attributes: config.cluster.attributes.clone(),
            completed_task_retention: config.persistent_tasks.completed_task_retention,
            notifier_timeout: Duration::from_secs(config.persistent_tasks.notifier_timeout_secs),
            rpc_retry_strategy: (&config.rpc.retry_strategy).into(),
            fault_detection: (&config.fault_detection).into(),
            store,
            transport,
            handlers: Arc::new(handlers),
        })
    }

    /// Replaces the node ID, e.g. when several nodes share one configuration.
    pub fn with_node_id(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = node_id.into();
        self
    }
}

/// A running cluster node.
/// The node reconciles its executions with the registry, and hosts the allocator
/// whenever the topology names it as the master.
pub struct ClusterNode {
    options: ClusterNodeOptions,
    handle: ActorHandle<NodeActor>,
    service: PersistentTasksService,
}

impl ClusterNode {
    pub fn start(options: ClusterNodeOptions) -> Self {
        info!("starting cluster node {}", options.node_id);
        let client = PersistentTasksClient::new(
            options.node_id.clone(),
            Arc::clone(&options.store),
            Arc::clone(&options.transport),
            options.notifier_timeout,
        );
        let service = PersistentTasksService::new(
            Arc::new(client),
            Arc::clone(&options.store),
            options.rpc_retry_strategy.clone(),
        );
        let handle = ActorHandle::<NodeActor>::new(options.clone());
        Self {
            options,
            handle,
            service,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.options.node_id
    }

    /// The topology entry that the membership layer registers for this node.
    pub fn node_info(&self) -> NodeInfo {
        self.options
            .attributes
            .iter()
            .fold(NodeInfo::new(self.options.node_id.clone()), |info, (k, v)| {
                info.with_attribute(k.as_str(), v.as_str())
            })
    }

    /// The handler to install on the transport for requests addressed to this node.
    pub fn request_handler(&self) -> Arc<dyn RequestHandler> {
        Arc::new(NodeRequestHandler::new(
            self.options.node_id.clone(),
            self.handle.clone(),
        ))
    }

    pub fn service(&self) -> &PersistentTasksService {
        &self.service
    }

    /// Runs a reconciliation pass against the latest snapshot seen by the node.
    pub async fn reconcile(&self) -> PersistentResult<ReconcileReport> {
        self.ask(|result| NodeEvent::Reconcile { result }).await
    }

    pub async fn list_executions(&self) -> PersistentResult<Vec<ExecutionInfo>> {
        self.ask(|result| NodeEvent::ListExecutions { result }).await
    }

    pub async fn status(&self) -> PersistentResult<NodeStatus> {
        self.ask(|result| NodeEvent::DescribeNode { result }).await
    }

    /// Cancels the running execution of the task on this node.
    /// The completion is still reported to the master.
    /// Returns `false` if no execution of the task is running here.
    pub async fn cancel_execution(
        &self,
        task_id: TaskId,
        reason: Option<String>,
    ) -> PersistentResult<bool> {
        let reason = reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        self.ask(|result| NodeEvent::CancelExecution {
            task_id,
            reason,
            result,
        })
        .await
    }

    pub async fn shutdown(self) {
        info!("stopping cluster node {}", self.options.node_id);
        let _ = self.handle.send(NodeEvent::Shutdown).await;
        self.handle.wait_for_stop().await;
    }

    async fn ask<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> NodeEvent,
    ) -> PersistentResult<T> {
        let (tx, rx) = oneshot::channel();
        self.handle.send(event(tx)).await?;
        Ok(rx.await?)
    }
}
