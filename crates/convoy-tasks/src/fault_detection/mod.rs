mod core;
mod options;

use std::collections::HashMap;
use std::sync::Arc;

pub use options::FaultDetectionOptions;

use crate::error::PersistentResult;
use crate::id::NodeId;
use crate::transport::{ConnectionEvent, Transport};

/// Detects unreachable nodes by pinging them and by listening to the transport.
/// The detector is owned by an actor, and ping timers and results are delivered
/// to that actor as messages.
pub struct FaultDetector {
    options: FaultDetectionOptions,
    local_node: NodeId,
    transport: Arc<dyn Transport>,
    targets: HashMap<NodeId, FaultTarget>,
    /// The last connection epoch handed out to any target.
    last_epoch: u64,
}

impl FaultDetector {
    pub fn new(
        local_node: NodeId,
        transport: Arc<dyn Transport>,
        options: FaultDetectionOptions,
    ) -> Self {
        Self {
            options,
            local_node,
            transport,
            targets: HashMap::new(),
            last_epoch: 0,
        }
    }
}

struct FaultTarget {
    epoch: u64,
    state: TargetState,
}

enum TargetState {
    Probing { failures: usize },
    /// Probing has stopped until a new connection starts another detection cycle.
    Disconnected,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FaultSignal {
    Disconnected { node_id: NodeId, reason: String },
    Reconnected { node_id: NodeId },
}

pub trait FaultDetectorMessage {
    fn ping(node_id: NodeId, epoch: u64) -> Self;
    fn ping_result(node_id: NodeId, epoch: u64, result: PersistentResult<()>) -> Self;
    fn connection_event(event: ConnectionEvent) -> Self;
}
