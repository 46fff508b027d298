#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use convoy_common::config::AppConfig;
use convoy_tasks::cluster::{NodeInfo, Topology};
use convoy_tasks::id::{AllocationId, NodeId, TaskId};
use convoy_tasks::node::ExecutionInfo;
use convoy_tasks::store::{MemoryRegistryStore, RegistryStore};
use convoy_tasks::task::{
    AllocationCandidates, Assignment, HandlerRegistry, PersistentTask, TaskContext, TaskHandler,
    TaskStatus,
};
use convoy_tasks::transport::{LocalTransport, Transport};
use convoy_tasks::{ClusterNode, ClusterNodeOptions};
use tokio::sync::watch;

pub const TEST_TASK_TYPE: &str = "test";

/// Lets a test decide when and how each task body finishes.
pub struct TaskControl {
    outcomes: Mutex<HashMap<TaskId, Result<(), String>>>,
    runs: Mutex<Vec<(NodeId, TaskId, AllocationId)>>,
    generation: watch::Sender<u64>,
}

impl TaskControl {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            outcomes: Mutex::new(HashMap::new()),
            runs: Mutex::new(vec![]),
            generation,
        }
    }

    pub fn finish(&self, task_id: &str, outcome: Result<(), String>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(TaskId::from(task_id), outcome);
        self.generation.send_modify(|x| *x += 1);
    }

    /// The executions started so far, in start order.
    pub fn runs(&self) -> Vec<(NodeId, TaskId, AllocationId)> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self, task_id: &str) -> usize {
        self.runs()
            .iter()
            .filter(|(_, id, _)| id.as_str() == task_id)
            .count()
    }

    fn outcome(&self, task_id: &TaskId) -> Option<Result<(), String>> {
        self.outcomes.lock().unwrap().get(task_id).cloned()
    }
}

/// Runs until the test finishes the task or the execution is cancelled.
/// Tasks are only placed on nodes with the `worker` role.
pub struct TestHandler {
    node_id: NodeId,
    control: Arc<TaskControl>,
}

#[async_trait]
impl TaskHandler for TestHandler {
    fn task_type(&self) -> &str {
        TEST_TASK_TYPE
    }

    async fn run(&self, ctx: TaskContext) -> Result<(), String> {
        self.control.runs.lock().unwrap().push((
            self.node_id.clone(),
            ctx.task_id().clone(),
            ctx.allocation_id(),
        ));
        let mut generation = self.control.generation.subscribe();
        loop {
            if let Some(outcome) = self.control.outcome(ctx.task_id()) {
                return outcome;
            }
            tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    return Err(ctx.cancel_reason().unwrap_or("cancelled").to_string());
                }
                result = generation.changed() => {
                    if result.is_err() {
                        return Err("the test is over".to_string());
                    }
                }
            }
        }
    }

    fn select_node(&self, _task: &PersistentTask, candidates: &AllocationCandidates) -> Assignment {
        candidates
            .filter(|node| node.attributes.get("role").is_some_and(|x| x == "worker"))
            .least_loaded()
    }
}

pub struct TestCluster {
    pub store: Arc<MemoryRegistryStore>,
    pub transport: Arc<LocalTransport>,
    pub control: Arc<TaskControl>,
    pub nodes: Vec<ClusterNode>,
}

type StoreWrapper = Box<dyn FnOnce(Arc<MemoryRegistryStore>) -> Arc<dyn RegistryStore>>;

pub struct TestClusterBuilder {
    master: String,
    workers: Vec<String>,
    without_handler: HashSet<String>,
    config: AppConfig,
    wrap_store: Option<StoreWrapper>,
}

impl TestClusterBuilder {
    pub fn without_handler_on(mut self, node_id: &str) -> Self {
        self.without_handler.insert(node_id.to_string());
        self
    }

    /// Lets the nodes see the store through a wrapper, e.g. to inject failures.
    pub fn wrap_store(
        mut self,
        f: impl FnOnce(Arc<MemoryRegistryStore>) -> Arc<dyn RegistryStore> + 'static,
    ) -> Self {
        self.wrap_store = Some(Box::new(f));
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut AppConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Starts the nodes and waits until each of them has seen the registry.
    pub async fn build(self) -> TestCluster {
        let _ = convoy_telemetry::init_telemetry();
        let mut topology = Topology::new()
            .with_node(NodeInfo::new(self.master.as_str()).with_attribute("role", "master"))
            .with_master(self.master.as_str());
        for worker in &self.workers {
            topology.add_node(NodeInfo::new(worker.as_str()).with_attribute("role", "worker"));
        }
        let store = Arc::new(MemoryRegistryStore::new(topology));
        let node_store = match self.wrap_store {
            Some(wrap) => wrap(Arc::clone(&store)),
            None => Arc::clone(&store) as Arc<dyn RegistryStore>,
        };
        let transport = Arc::new(LocalTransport::new());
        let control = Arc::new(TaskControl::new());
        let mut nodes = vec![];
        for node_id in std::iter::once(&self.master).chain(self.workers.iter()) {
            let mut handlers = HandlerRegistry::new();
            if !self.without_handler.contains(node_id) {
                handlers.register(Arc::new(TestHandler {
                    node_id: NodeId::from(node_id.as_str()),
                    control: Arc::clone(&control),
                }));
            }
            let options = ClusterNodeOptions::new(
                &self.config,
                Arc::clone(&node_store),
                Arc::clone(&transport) as Arc<dyn Transport>,
                handlers,
            )
            .unwrap()
            .with_node_id(node_id.as_str());
            let node = ClusterNode::start(options);
            transport.connect(node.node_id().clone(), node.request_handler());
            nodes.push(node);
        }
        let cluster = TestCluster {
            store,
            transport,
            control,
            nodes,
        };
        let c = &cluster;
        wait_until(|| async move {
            for node in c.nodes.iter() {
                if node.status().await.unwrap().registry_version.is_none() {
                    return false;
                }
            }
            true
        })
        .await;
        cluster
    }
}

impl TestCluster {
    /// A cluster whose first node is the master and the remaining nodes are workers.
    pub fn builder(master: &str, workers: &[&str]) -> TestClusterBuilder {
        let mut config = AppConfig::default_config().unwrap();
        config.fault_detection.ping_timeout_secs = 1;
        config.persistent_tasks.notifier_timeout_secs = 5;
        TestClusterBuilder {
            master: master.to_string(),
            workers: workers.iter().map(|x| x.to_string()).collect(),
            without_handler: HashSet::new(),
            config,
            wrap_store: None,
        }
    }

    pub fn node(&self, node_id: &str) -> &ClusterNode {
        self.nodes
            .iter()
            .find(|x| x.node_id().as_str() == node_id)
            .unwrap()
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.store
            .current_snapshot()
            .task_status(&TaskId::from(task_id))
    }

    pub async fn executions(&self, node_id: &str) -> Vec<ExecutionInfo> {
        self.node(node_id).list_executions().await.unwrap()
    }

    pub async fn wait_for_assignment(&self, task_id: &str, node_id: &str, allocation_id: u64) {
        wait_until(|| async move {
            matches!(
                self.status(task_id),
                Some(TaskStatus::Assigned { node_id: ref n, allocation_id: a, .. })
                    if n.as_str() == node_id && a == AllocationId::from(allocation_id)
            )
        })
        .await;
    }

    pub async fn wait_for_run(&self, task_id: &str, count: usize) {
        wait_until(|| async move { self.control.run_count(task_id) >= count }).await;
    }

    pub async fn shutdown(self) {
        for node in self.nodes {
            node.shutdown().await;
        }
    }
}

/// Polls the condition until it holds, panicking after a generous deadline.
pub async fn wait_until<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "the condition does not hold before the deadline"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
