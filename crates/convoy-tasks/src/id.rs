use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PersistentError, PersistentResult};

macro_rules! define_name_id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_name_id_type!(TaskId);
define_name_id_type!(NodeId);

/// The generation of a task assignment.
/// The value 0 means the task has never been assigned.
#[derive(
    Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AllocationId(u64);

impl AllocationId {
    pub const NONE: AllocationId = AllocationId(0);

    pub fn next(self) -> PersistentResult<Self> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or_else(|| PersistentError::internal("allocation ID overflow"))
    }
}

impl From<u64> for AllocationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<AllocationId> for u64 {
    fn from(id: AllocationId) -> Self {
        id.0
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of one node-local execution of a task.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub task_id: TaskId,
    pub allocation_id: AllocationId,
}

impl ExecutionKey {
    pub fn new(task_id: TaskId, allocation_id: AllocationId) -> Self {
        Self {
            task_id,
            allocation_id,
        }
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} allocation {}",
            self.task_id, self.allocation_id
        )
    }
}
