mod core;
mod handler;

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::allocator::allocation::{RegistryUpdate, UpdateResult};
use crate::allocator::AllocatorOptions;
use crate::error::{PersistentError, PersistentResult};
use crate::fault_detection::FaultDetector;
use crate::notifier::TaskAck;
use crate::task::PersistentTask;

/// The master-side owner of task assignments.
/// Registry updates are applied one at a time: at most one proposal is in flight,
/// and a conflicting proposal is recomputed against the latest snapshot.
pub struct AllocatorActor {
    options: AllocatorOptions,
    fault_detector: FaultDetector,
    /// The update at the front is the one being proposed when a proposal is in flight.
    queue: VecDeque<PendingUpdate>,
    proposal: Option<Proposal>,
    last_seen_version: Option<u64>,
}

struct PendingUpdate {
    update: RegistryUpdate,
    reply: UpdateReply,
    attempt: usize,
}

struct Proposal {
    expected_version: u64,
    result: UpdateResult,
}

enum UpdateReply {
    None,
    Task(oneshot::Sender<PersistentResult<PersistentTask>>),
    Ack(oneshot::Sender<PersistentResult<TaskAck>>),
}

impl UpdateReply {
    fn send(self, result: PersistentResult<UpdateResult>) {
        match self {
            UpdateReply::None => {}
            UpdateReply::Task(sender) => {
                let result = result.and_then(|x| match x {
                    UpdateResult::Task(task) => Ok(task),
                    x => Err(PersistentError::internal(format!(
                        "unexpected update result: {x:?}"
                    ))),
                });
                let _ = sender.send(result);
            }
            UpdateReply::Ack(sender) => {
                let result = result.and_then(|x| match x {
                    UpdateResult::Ack(ack) => Ok(ack),
                    x => Err(PersistentError::internal(format!(
                        "unexpected update result: {x:?}"
                    ))),
                });
                let _ = sender.send(result);
            }
        }
    }
}
