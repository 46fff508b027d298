pub mod allocator;
pub mod cluster;
pub mod cluster_node;
pub mod error;
pub mod execution;
pub mod fault_detection;
pub mod id;
pub mod node;
pub mod notifier;
pub mod service;
pub mod store;
pub mod task;
pub mod transport;

pub use cluster_node::{ClusterNode, ClusterNodeOptions};
pub use error::{PersistentError, PersistentResult};
pub use service::PersistentTasksService;
