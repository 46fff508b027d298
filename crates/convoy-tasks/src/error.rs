use std::sync::PoisonError;

use convoy_server::actor::ActorError;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinError;

use crate::id::{NodeId, TaskId};

pub type PersistentResult<T> = Result<T, PersistentError>;

#[derive(Debug, Clone, Error)]
pub enum PersistentError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("no master node is known")]
    NoMaster,
    #[error("node {0} is not the master")]
    NotMaster(NodeId),
    #[error("the master changed from {from} to {}", .to.as_ref().map(|x| x.as_str()).unwrap_or("none"))]
    MasterChanged { from: NodeId, to: Option<NodeId> },
    #[error("connection to node {0} is closed")]
    ConnectionClosed(NodeId),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl PersistentError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PersistentError::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PersistentError::InternalError(message.into())
    }

    /// Errors caused by the master moving or the network dropping a request.
    /// The same request is expected to succeed once it reaches the current master.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PersistentError::NoMaster
                | PersistentError::NotMaster(_)
                | PersistentError::MasterChanged { .. }
                | PersistentError::ConnectionClosed(_)
        )
    }
}

impl From<ActorError> for PersistentError {
    fn from(error: ActorError) -> Self {
        PersistentError::InternalError(error.to_string())
    }
}

impl From<oneshot::error::RecvError> for PersistentError {
    fn from(error: oneshot::error::RecvError) -> Self {
        PersistentError::InternalError(error.to_string())
    }
}

impl From<JoinError> for PersistentError {
    fn from(error: JoinError) -> Self {
        PersistentError::InternalError(error.to_string())
    }
}

impl<T> From<PoisonError<T>> for PersistentError {
    fn from(error: PoisonError<T>) -> Self {
        PersistentError::InternalError(error.to_string())
    }
}
