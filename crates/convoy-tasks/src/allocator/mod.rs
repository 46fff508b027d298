mod actor;
mod allocation;
mod event;
mod options;

pub use actor::AllocatorActor;
pub use event::AllocatorEvent;
pub use options::AllocatorOptions;
