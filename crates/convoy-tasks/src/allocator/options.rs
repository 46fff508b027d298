//! A dedicated module for allocator options to ensure readonly access.
use std::sync::Arc;

use crate::cluster_node::ClusterNodeOptions;
use crate::fault_detection::FaultDetectionOptions;
use crate::id::NodeId;
use crate::store::RegistryStore;
use crate::task::HandlerRegistry;
use crate::transport::Transport;

#[readonly::make]
pub struct AllocatorOptions {
    pub node_id: NodeId,
    pub completed_task_retention: usize,
    pub fault_detection: FaultDetectionOptions,
    pub store: Arc<dyn RegistryStore>,
    pub transport: Arc<dyn Transport>,
    pub handlers: Arc<HandlerRegistry>,
}

impl AllocatorOptions {
    pub fn new(options: &ClusterNodeOptions) -> Self {
        Self {
            node_id: options.node_id.clone(),
            completed_task_retention: options.completed_task_retention,
            fault_detection: options.fault_detection.clone(),
            store: Arc::clone(&options.store),
            transport: Arc::clone(&options.transport),
            handlers: Arc::clone(&options.handlers),
        }
    }
}
