mod definition;
mod handler;
mod registry;

pub use definition::{
    Assignment, CompletedTask, PersistentTask, TaskOutcome, TaskParams, TaskState, TaskStatus,
};
pub use handler::{AllocationCandidate, AllocationCandidates, HandlerRegistry, TaskContext, TaskHandler};
pub use registry::{RegistryUpdateOutcome, TaskRegistry};
