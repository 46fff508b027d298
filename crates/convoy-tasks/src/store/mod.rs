mod memory;
mod subscription;

use std::sync::Arc;

use async_trait::async_trait;
use convoy_server::actor::{Actor, ActorContext};
pub use memory::MemoryRegistryStore;
pub use subscription::{ListenerSet, RegistrySubscription};

use crate::cluster::ClusterSnapshot;
use crate::error::PersistentResult;
use crate::task::TaskRegistry;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProposeOutcome {
    Committed { version: u64 },
    /// The registry moved past the expected version and nothing was written.
    Conflict { current_version: u64 },
}

/// The replicated store that holds the authoritative cluster state.
#[async_trait]
pub trait RegistryStore: Send + Sync + 'static {
    fn current_snapshot(&self) -> Arc<ClusterSnapshot>;

    /// Replaces the task registry if the store is still at the expected version.
    async fn propose_update(
        &self,
        expected_version: u64,
        tasks: TaskRegistry,
    ) -> PersistentResult<ProposeOutcome>;

    /// Subscribes to every snapshot committed after this call, in commit order.
    fn subscribe(&self) -> RegistrySubscription;
}

/// Delivers the current snapshot and then every committed snapshot to the actor.
/// The actor must ignore snapshots older than the ones it has already seen,
/// since the current snapshot may also be delivered through the subscription.
pub(crate) fn forward_snapshots<T: Actor>(
    ctx: &mut ActorContext<T>,
    store: &dyn RegistryStore,
    message: fn(Arc<ClusterSnapshot>) -> T::Message,
) {
    let mut subscription = store.subscribe();
    let snapshot = store.current_snapshot();
    let handle = ctx.handle().clone();
    ctx.spawn(async move {
        if handle.send(message(snapshot)).await.is_err() {
            return;
        }
        while let Some(snapshot) = subscription.recv().await {
            if handle.send(message(snapshot)).await.is_err() {
                break;
            }
        }
    });
}
