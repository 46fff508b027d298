mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{wait_until, TestCluster, TEST_TASK_TYPE};
use convoy_tasks::cluster::ClusterSnapshot;
use convoy_tasks::error::PersistentResult;
use convoy_tasks::execution::ExecutionState;
use convoy_tasks::id::{AllocationId, NodeId, TaskId};
use convoy_tasks::notifier::{CompletionNotifier, PersistentTasksClient, TaskAck};
use convoy_tasks::store::{MemoryRegistryStore, ProposeOutcome, RegistryStore, RegistrySubscription};
use convoy_tasks::task::{TaskOutcome, TaskRegistry, TaskStatus};
use convoy_tasks::transport::Transport;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn test_stale_completion_after_reassignment_is_ignored() {
    let cluster = TestCluster::builder("m", &["a", "b"]).build().await;
    let c = &cluster;
    let service = c.node("m").service();

    service
        .create_task("reindex-42", TEST_TASK_TYPE, json!(null))
        .await
        .unwrap();
    c.wait_for_assignment("reindex-42", "a", 1).await;
    c.wait_for_run("reindex-42", 1).await;

    c.transport.disconnect(&NodeId::from("a"));
    c.wait_for_assignment("reindex-42", "b", 2).await;
    c.wait_for_run("reindex-42", 2).await;

    // A completion from the execution under the first allocation arrives late.
    let client = PersistentTasksClient::new(
        NodeId::from("a"),
        Arc::clone(&c.store) as Arc<dyn RegistryStore>,
        Arc::clone(&c.transport) as Arc<dyn Transport>,
        Duration::from_secs(5),
    );
    let ack = client
        .send_completion(&TaskId::from("reindex-42"), AllocationId::from(1), None)
        .await
        .unwrap();
    assert!(matches!(ack, TaskAck::Ignored(_)));
    let ack = client
        .update_state(
            &TaskId::from("reindex-42"),
            AllocationId::from(1),
            json!({"progress": 50}),
        )
        .await
        .unwrap();
    assert!(matches!(ack, TaskAck::Ignored(_)));
    assert_eq!(
        c.status("reindex-42"),
        Some(TaskStatus::Assigned {
            node_id: NodeId::from("b"),
            allocation_id: AllocationId::from(2),
            state: None,
        })
    );

    // The node that lost the task withdraws its execution without reporting it.
    wait_until(|| async move { c.executions("a").await.is_empty() }).await;
    let executions = c.executions("b").await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].state, ExecutionState::Started);
    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_missed_heartbeats_trigger_reassignment() {
    let cluster = TestCluster::builder("m", &["a", "b"]).build().await;
    let c = &cluster;
    let service = c.node("m").service();

    service
        .create_task("t", TEST_TASK_TYPE, json!(null))
        .await
        .unwrap();
    c.wait_for_assignment("t", "a", 1).await;
    c.wait_for_run("t", 1).await;

    let start = tokio::time::Instant::now();
    c.transport.set_unresponsive(&NodeId::from("a"), true);
    c.wait_for_assignment("t", "b", 2).await;
    let elapsed = start.elapsed();
    // Three pings must time out one after another before the node is considered lost.
    assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    c.wait_for_run("t", 2).await;
    assert_eq!(
        c.control.runs().last(),
        Some(&(NodeId::from("b"), TaskId::from("t"), AllocationId::from(2)))
    );
    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_is_idempotent() {
    let cluster = TestCluster::builder("m", &["a"]).build().await;
    let c = &cluster;
    let service = c.node("m").service();

    service
        .create_task("t", TEST_TASK_TYPE, json!(null))
        .await
        .unwrap();
    c.wait_for_run("t", 1).await;

    let node = c.node("a");
    for _ in 0..2 {
        let report = node.reconcile().await.unwrap();
        assert!(report.is_empty(), "{report:?}");
    }
    assert_eq!(c.executions("a").await.len(), 1);
    assert_eq!(c.control.run_count("t"), 1);
    cluster.shutdown().await;
}

/// Moves the registry forward right before the next proposals are applied.
struct ConflictingStore {
    inner: Arc<MemoryRegistryStore>,
    conflicts: Arc<AtomicUsize>,
}

#[async_trait]
impl RegistryStore for ConflictingStore {
    fn current_snapshot(&self) -> Arc<ClusterSnapshot> {
        self.inner.current_snapshot()
    }

    async fn propose_update(
        &self,
        expected_version: u64,
        tasks: TaskRegistry,
    ) -> PersistentResult<ProposeOutcome> {
        let conflict = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| x.checked_sub(1))
            .is_ok();
        if conflict {
            self.inner.update_topology(|_| {});
        }
        self.inner.propose_update(expected_version, tasks).await
    }

    fn subscribe(&self) -> RegistrySubscription {
        self.inner.subscribe()
    }
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_proposal_is_retried() {
    let conflicts = Arc::new(AtomicUsize::new(0));
    let remaining = Arc::clone(&conflicts);
    let cluster = TestCluster::builder("m", &["a"])
        .wrap_store(move |inner| {
            Arc::new(ConflictingStore {
                inner,
                conflicts: remaining,
            })
        })
        .build()
        .await;
    let service = cluster.node("m").service();

    conflicts.store(2, Ordering::SeqCst);
    let version = cluster.store.current_snapshot().version;
    let task = service
        .create_task("t", TEST_TASK_TYPE, json!(null))
        .await
        .unwrap();
    assert_eq!(conflicts.load(Ordering::SeqCst), 0);
    assert_eq!(task.allocation_id, AllocationId::from(1));
    // Two topology updates plus the one committed proposal.
    assert_eq!(cluster.store.current_snapshot().version, version + 3);
    assert_eq!(service.list_tasks().len(), 1);
    cluster.wait_for_run("t", 1).await;
    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_master_failover() {
    let cluster = TestCluster::builder("m", &["a", "b"]).build().await;
    let c = &cluster;

    c.node("b")
        .service()
        .create_task("t1", TEST_TASK_TYPE, json!(null))
        .await
        .unwrap();
    c.wait_for_assignment("t1", "a", 1).await;
    c.wait_for_run("t1", 1).await;

    c.store
        .update_topology(|topology| topology.set_master(Some(NodeId::from("a"))));
    wait_until(|| async move {
        let old = c.node("m").status().await.unwrap();
        let new = c.node("a").status().await.unwrap();
        !old.is_master && new.is_master
    })
    .await;
    let status = c.node("b").status().await.unwrap();
    assert_eq!(status.master, Some(NodeId::from("a")));
    assert!(!status.is_master);

    c.node("b")
        .service()
        .create_task("t2", TEST_TASK_TYPE, json!(null))
        .await
        .unwrap();
    c.wait_for_assignment("t2", "b", 2).await;
    c.wait_for_run("t2", 1).await;
    // The running task keeps its allocation across the failover.
    c.wait_for_assignment("t1", "a", 1).await;
    assert_eq!(c.control.run_count("t1"), 1);

    c.control.finish("t1", Ok(()));
    wait_until(|| async move { c.status("t1").is_some_and(|x| x.is_completed()) }).await;
    cluster.shutdown().await;
}

async fn start_single_task(cluster: &TestCluster) {
    cluster
        .node("m")
        .service()
        .create_task("t", TEST_TASK_TYPE, json!(null))
        .await
        .unwrap();
    cluster.wait_for_run("t", 1).await;
}

async fn wait_for_success(cluster: &TestCluster) {
    wait_until(|| async move { cluster.status("t").is_some_and(|x| x.is_completed()) }).await;
    assert_eq!(
        cluster.status("t"),
        Some(TaskStatus::Completed {
            outcome: TaskOutcome::Succeeded
        })
    );
    assert_eq!(cluster.control.run_count("t"), 1);
    wait_until(|| async move { cluster.executions("a").await.is_empty() }).await;
}

#[tokio::test(start_paused = true)]
async fn test_completion_lost_while_master_recovers_is_sent_again() {
    let cluster = TestCluster::builder("m", &["a"]).build().await;
    let c = &cluster;
    let master = NodeId::from("m");
    start_single_task(c).await;

    c.transport.set_unresponsive(&master, true);
    c.control.finish("t", Ok(()));
    // The master is reachable again while the completion request is still pending.
    wait_until(|| async move {
        let status = c.node("a").status().await.unwrap();
        !status.master_reachable
            && status.executions.len() == 1
            && status.executions[0].state == ExecutionState::Completed
    })
    .await;
    c.transport.connect(master, c.node("m").request_handler());
    assert!(matches!(c.status("t"), Some(TaskStatus::Assigned { .. })));

    wait_for_success(c).await;
    assert!(c.node("a").status().await.unwrap().master_reachable);
    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_completion_lost_during_long_master_stall_is_sent_again() {
    let cluster = TestCluster::builder("m", &["a"]).build().await;
    let c = &cluster;
    let master = NodeId::from("m");
    start_single_task(c).await;

    c.transport.set_unresponsive(&master, true);
    c.control.finish("t", Ok(()));
    // Longer than both the notifier timeout and the master detection window.
    tokio::time::sleep(Duration::from_secs(20)).await;
    let status = c.node("a").status().await.unwrap();
    assert!(!status.master_reachable);
    assert_eq!(status.executions.len(), 1);
    assert_eq!(status.executions[0].state, ExecutionState::Completed);
    assert!(matches!(c.status("t"), Some(TaskStatus::Assigned { .. })));

    c.transport.connect(master, c.node("m").request_handler());
    wait_for_success(c).await;
    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_completion_is_retried_until_master_answers() {
    let cluster = TestCluster::builder("m", &["a"]).build().await;
    let c = &cluster;
    let master = NodeId::from("m");
    start_single_task(c).await;

    c.transport.set_unresponsive(&master, true);
    c.control.finish("t", Ok(()));
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(matches!(c.status("t"), Some(TaskStatus::Assigned { .. })));

    // The master answers again without a new connection, so only the retries can deliver.
    c.transport.set_unresponsive(&master, false);
    wait_for_success(c).await;
    cluster.shutdown().await;
}
