use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use log::debug;
use tokio::sync::mpsc;

use crate::cluster::ClusterSnapshot;

#[derive(Default)]
struct ListenerSetState {
    next_id: u64,
    listeners: IndexMap<u64, mpsc::UnboundedSender<Arc<ClusterSnapshot>>>,
}

/// The registered subscriptions of a registry store.
#[derive(Default)]
pub struct ListenerSet {
    state: Mutex<ListenerSetState>,
}

impl ListenerSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>) -> RegistrySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.insert(id, tx);
        RegistrySubscription {
            id,
            receiver: rx,
            listeners: Arc::downgrade(self),
        }
    }

    pub fn publish(&self, snapshot: &Arc<ClusterSnapshot>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .listeners
            .retain(|_, listener| listener.send(Arc::clone(snapshot)).is_ok());
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.listeners.shift_remove(&id).is_some() {
            debug!("registry subscription {id} removed");
        }
    }
}

/// A stream of committed snapshots. Dropping it unregisters the listener.
pub struct RegistrySubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Arc<ClusterSnapshot>>,
    listeners: Weak<ListenerSet>,
}

impl RegistrySubscription {
    /// Waits for the next committed snapshot.
    /// Returns [None] once the store is gone.
    pub async fn recv(&mut self) -> Option<Arc<ClusterSnapshot>> {
        self.receiver.recv().await
    }
}

impl Drop for RegistrySubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_receives_in_order_and_unsubscribes() {
        let listeners = ListenerSet::new();
        let mut subscription = listeners.subscribe();
        assert_eq!(listeners.len(), 1);
        for version in 1..=3 {
            listeners.publish(&Arc::new(ClusterSnapshot {
                version,
                ..Default::default()
            }));
        }
        for version in 1..=3 {
            let snapshot = subscription.recv().await;
            assert_eq!(snapshot.map(|x| x.version), Some(version));
        }
        drop(subscription);
        assert!(listeners.is_empty());
    }
}
