use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;

use crate::cluster::{ClusterSnapshot, Topology};
use crate::error::PersistentResult;
use crate::store::{ListenerSet, ProposeOutcome, RegistryStore, RegistrySubscription};
use crate::task::TaskRegistry;

/// An in-process registry store.
/// Every commit bumps the version and is published to all subscribers while the
/// store lock is held, so that subscribers observe commits in order.
pub struct MemoryRegistryStore {
    snapshot: Mutex<Arc<ClusterSnapshot>>,
    listeners: Arc<ListenerSet>,
}

impl MemoryRegistryStore {
    pub fn new(topology: Topology) -> Self {
        let snapshot = ClusterSnapshot {
            version: 0,
            topology,
            tasks: TaskRegistry::new(),
        };
        Self {
            snapshot: Mutex::new(Arc::new(snapshot)),
            listeners: ListenerSet::new(),
        }
    }

    /// Applies a membership change and publishes the resulting snapshot.
    /// Returns the new version.
    pub fn update_topology(&self, f: impl FnOnce(&mut Topology)) -> u64 {
        let mut current = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        let mut topology = current.topology.clone();
        f(&mut topology);
        let snapshot = ClusterSnapshot {
            version: current.version + 1,
            topology,
            tasks: current.tasks.clone(),
        };
        debug!("topology updated at version {}", snapshot.version);
        self.commit(&mut current, snapshot)
    }

    /// The number of live registry subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn commit(&self, current: &mut Arc<ClusterSnapshot>, snapshot: ClusterSnapshot) -> u64 {
        let version = snapshot.version;
        let snapshot = Arc::new(snapshot);
        self.listeners.publish(&snapshot);
        *current = snapshot;
        version
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    fn current_snapshot(&self) -> Arc<ClusterSnapshot> {
        let current = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current)
    }

    async fn propose_update(
        &self,
        expected_version: u64,
        tasks: TaskRegistry,
    ) -> PersistentResult<ProposeOutcome> {
        let mut current = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if current.version != expected_version {
            return Ok(ProposeOutcome::Conflict {
                current_version: current.version,
            });
        }
        let snapshot = ClusterSnapshot {
            version: current.version + 1,
            topology: current.topology.clone(),
            tasks,
        };
        let version = self.commit(&mut current, snapshot);
        Ok(ProposeOutcome::Committed { version })
    }

    fn subscribe(&self) -> RegistrySubscription {
        self.listeners.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cluster::NodeInfo;
    use crate::id::TaskId;

    #[tokio::test]
    async fn test_propose_update_compare_and_set() {
        let store = MemoryRegistryStore::new(Topology::new().with_node(NodeInfo::new("a")));
        let mut subscription = store.subscribe();
        let mut tasks = TaskRegistry::new();
        assert!(tasks
            .add_task(TaskId::from("t"), "test".to_string(), json!(null))
            .is_ok());

        let outcome = store.propose_update(0, tasks.clone()).await;
        assert_eq!(outcome.ok(), Some(ProposeOutcome::Committed { version: 1 }));
        let outcome = store.propose_update(0, TaskRegistry::new()).await;
        assert_eq!(
            outcome.ok(),
            Some(ProposeOutcome::Conflict { current_version: 1 })
        );
        assert_eq!(store.current_snapshot().tasks, tasks);

        let version = store.update_topology(|t| t.set_master(Some("a".into())));
        assert_eq!(version, 2);
        let versions = [subscription.recv().await, subscription.recv().await]
            .into_iter()
            .map(|x| x.map(|s| s.version))
            .collect::<Vec<_>>();
        assert_eq!(versions, vec![Some(1), Some(2)]);
    }
}
