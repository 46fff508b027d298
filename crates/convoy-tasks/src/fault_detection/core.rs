use std::collections::HashSet;
use std::sync::Arc;

use convoy_server::actor::{Actor, ActorContext};
use log::{debug, info, warn};

use crate::error::{PersistentError, PersistentResult};
use crate::fault_detection::{
    FaultDetector, FaultDetectorMessage, FaultSignal, FaultTarget, TargetState,
};
use crate::id::NodeId;
use crate::transport::{ConnectionEvent, TransportRequest, TransportResponse};

impl FaultDetector {
    /// Forwards transport connection events to the hosting actor.
    pub fn start<T>(&self, ctx: &mut ActorContext<T>)
    where
        T: Actor,
        T::Message: FaultDetectorMessage,
    {
        if !self.options.register_connection_listener {
            return;
        }
        let mut events = self.transport.subscribe_connections();
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            while let Some(event) = events.recv().await {
                if handle
                    .send(T::Message::connection_event(event))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Replaces the set of watched nodes.
    /// New targets start a detection cycle and removed targets stop being pinged.
    pub fn set_targets<T>(&mut self, ctx: &mut ActorContext<T>, targets: impl IntoIterator<Item = NodeId>)
    where
        T: Actor,
        T::Message: FaultDetectorMessage,
    {
        let targets = targets
            .into_iter()
            .filter(|x| x != &self.local_node)
            .collect::<HashSet<_>>();
        self.targets.retain(|node_id, _| {
            let keep = targets.contains(node_id);
            if !keep {
                debug!("node {node_id} is no longer watched");
            }
            keep
        });
        for node_id in targets {
            if !self.targets.contains_key(&node_id) {
                self.start_cycle(ctx, node_id);
            }
        }
    }

    pub fn is_disconnected(&self, node_id: &NodeId) -> bool {
        self.targets
            .get(node_id)
            .is_some_and(|x| matches!(x.state, TargetState::Disconnected))
    }

    pub fn targets(&self) -> impl Iterator<Item = &NodeId> {
        self.targets.keys()
    }

    pub fn handle_ping<T>(&mut self, ctx: &mut ActorContext<T>, node_id: NodeId, epoch: u64)
    where
        T: Actor,
        T::Message: FaultDetectorMessage,
    {
        if !self.is_probing(&node_id, epoch) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let request = TransportRequest::Ping {
            from: self.local_node.clone(),
        };
        let timeout = self.options.ping_timeout;
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.send(&node_id, request)).await
            {
                Ok(Ok(TransportResponse::Pong)) => Ok(()),
                Ok(Ok(x)) => Err(PersistentError::internal(format!(
                    "unexpected ping response: {x:?}"
                ))),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(PersistentError::Timeout(format!(
                    "ping to node {node_id} after {timeout:?}"
                ))),
            };
            let _ = handle
                .send(T::Message::ping_result(node_id, epoch, result))
                .await;
        });
    }

    pub fn handle_ping_result<T>(
        &mut self,
        ctx: &mut ActorContext<T>,
        node_id: NodeId,
        epoch: u64,
        result: PersistentResult<()>,
    ) -> Option<FaultSignal>
    where
        T: Actor,
        T::Message: FaultDetectorMessage,
    {
        let target = self.targets.get_mut(&node_id)?;
        if target.epoch != epoch {
            return None;
        }
        let failures = match &mut target.state {
            TargetState::Probing { failures } => failures,
            TargetState::Disconnected => return None,
        };
        match result {
            Ok(()) => {
                *failures = 0;
                ctx.send_with_delay(T::Message::ping(node_id, epoch), self.options.ping_interval);
                None
            }
            Err(e) => {
                *failures += 1;
                let count = *failures;
                if count < self.options.ping_retries {
                    debug!("ping {count} to node {node_id} failed: {e}");
                    ctx.send(T::Message::ping(node_id, epoch));
                    return None;
                }
                target.state = TargetState::Disconnected;
                warn!("node {node_id} failed {count} consecutive pings: {e}");
                Some(FaultSignal::Disconnected {
                    node_id,
                    reason: format!("failed {count} consecutive pings: {e}"),
                })
            }
        }
    }

    pub fn handle_connection_event<T>(
        &mut self,
        ctx: &mut ActorContext<T>,
        event: ConnectionEvent,
    ) -> Option<FaultSignal>
    where
        T: Actor,
        T::Message: FaultDetectorMessage,
    {
        match event {
            ConnectionEvent::Closed(node_id) => {
                let target = self.targets.get_mut(&node_id)?;
                if matches!(target.state, TargetState::Disconnected) {
                    return None;
                }
                target.state = TargetState::Disconnected;
                warn!("connection to node {node_id} is closed");
                Some(FaultSignal::Disconnected {
                    node_id,
                    reason: "connection closed".to_string(),
                })
            }
            ConnectionEvent::Connected(node_id) => {
                if !self.is_disconnected(&node_id) {
                    return None;
                }
                info!("node {node_id} reconnected");
                self.start_cycle(ctx, node_id.clone());
                Some(FaultSignal::Reconnected { node_id })
            }
        }
    }

    fn is_probing(&self, node_id: &NodeId, epoch: u64) -> bool {
        self.targets.get(node_id).is_some_and(|x| {
            x.epoch == epoch && matches!(x.state, TargetState::Probing { .. })
        })
    }

    fn start_cycle<T>(&mut self, ctx: &mut ActorContext<T>, node_id: NodeId)
    where
        T: Actor,
        T::Message: FaultDetectorMessage,
    {
        self.last_epoch += 1;
        let epoch = self.last_epoch;
        debug!("watching node {node_id} in epoch {epoch}");
        self.targets.insert(
            node_id.clone(),
            FaultTarget {
                epoch,
                state: TargetState::Probing { failures: 0 },
            },
        );
        ctx.send_with_delay(T::Message::ping(node_id, epoch), self.options.ping_interval);
    }
}
