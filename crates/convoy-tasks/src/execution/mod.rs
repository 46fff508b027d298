use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use convoy_telemetry::common::SpanAttribute;
use fastrace::collector::SpanContext;
use fastrace::future::FutureExt as _;
use fastrace::Span;
use futures::FutureExt;
use log::{debug, info, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};
pub use tokio_util::sync::CancellationToken;

use crate::error::PersistentResult;
use crate::id::ExecutionKey;
use crate::notifier::{CompletionNotifier, TaskAck};
use crate::task::{TaskContext, TaskHandler, TaskState};

/// The cancel reason that turns a failure after local cancellation into a success.
pub const DEFAULT_CANCEL_REASON: &str = "by user request";

#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExecutionState {
    Started = 0,
    /// The allocation was withdrawn by the master and the completion will not be reported.
    PendingCancel = 1,
    Completed = 2,
}

impl ExecutionState {
    fn decode(value: u8) -> Self {
        // Only valid discriminants are ever stored.
        Self::try_from(value).unwrap_or(ExecutionState::Completed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTermination {
    pub failure: Option<String>,
    /// Whether the completion reached the master or no notification was due.
    pub notified: bool,
}

/// Receives the terminal transition of an execution after its notification has settled.
#[async_trait]
pub trait ExecutionObserver: Send + Sync + 'static {
    async fn on_terminated(&self, key: ExecutionKey, termination: ExecutionTermination);
}

pub struct TaskExecution {
    key: ExecutionKey,
    task_type: String,
    state: AtomicU8,
    failure: OnceLock<String>,
    cancel_reason: OnceLock<String>,
    cancellation: CancellationToken,
    notifier: Arc<dyn CompletionNotifier>,
    observer: Arc<dyn ExecutionObserver>,
}

impl TaskExecution {
    pub fn new(
        key: ExecutionKey,
        task_type: String,
        notifier: Arc<dyn CompletionNotifier>,
        observer: Arc<dyn ExecutionObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            task_type,
            state: AtomicU8::new(ExecutionState::Started.into()),
            failure: OnceLock::new(),
            cancel_reason: OnceLock::new(),
            cancellation: CancellationToken::new(),
            notifier,
            observer,
        })
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn state(&self) -> ExecutionState {
        ExecutionState::decode(self.state.load(Ordering::Acquire))
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(|x| x.as_str())
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.get().map(|x| x.as_str())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Withdraws the execution on behalf of the master.
    /// Returns `false` if the execution has already completed or been withdrawn.
    pub fn mark_as_cancelled(&self) -> bool {
        let result = self.state.compare_exchange(
            ExecutionState::Started.into(),
            ExecutionState::PendingCancel.into(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if result.is_err() {
            return false;
        }
        info!("cancelling {}", self.key);
        self.cancellation.cancel();
        true
    }

    /// Cancels the execution locally. The completion is still reported to the master.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self.state() != ExecutionState::Started {
            return false;
        }
        let reason = reason.into();
        info!("cancelling {}: {reason}", self.key);
        let _ = self.cancel_reason.set(reason);
        self.cancellation.cancel();
        true
    }

    pub async fn mark_as_completed(&self) -> bool {
        self.complete_and_notify_if_needed(None).await
    }

    pub async fn mark_as_failed(&self, failure: String) -> bool {
        if self.cancel_reason() == Some(DEFAULT_CANCEL_REASON) {
            debug!("{} stopped after cancellation: {failure}", self.key);
            self.complete_and_notify_if_needed(None).await
        } else {
            self.complete_and_notify_if_needed(Some(failure)).await
        }
    }

    pub async fn update_state(&self, state: TaskState) -> PersistentResult<TaskAck> {
        self.notifier
            .update_state(&self.key.task_id, self.key.allocation_id, state)
            .await
    }

    /// Returns `true` if this call performed the terminal transition.
    async fn complete_and_notify_if_needed(&self, failure: Option<String>) -> bool {
        let previous = ExecutionState::decode(
            self.state
                .swap(ExecutionState::Completed.into(), Ordering::AcqRel),
        );
        if previous == ExecutionState::Completed {
            warn!("{} is already completed", self.key);
            return false;
        }
        if let Some(failure) = &failure {
            warn!("{} failed: {failure}", self.key);
            let _ = self.failure.set(failure.clone());
        }
        let notified = match previous {
            ExecutionState::PendingCancel => {
                debug!("{} was cancelled, completion is not reported", self.key);
                true
            }
            _ => {
                let result = self
                    .notifier
                    .send_completion(&self.key.task_id, self.key.allocation_id, failure.clone())
                    .await;
                match result {
                    Ok(TaskAck::Applied(_)) => {
                        debug!("completion of {} is applied", self.key);
                        true
                    }
                    Ok(TaskAck::Ignored(reason)) => {
                        info!("completion of {} is ignored: {reason}", self.key);
                        true
                    }
                    Err(e) => {
                        warn!("failed to report completion of {}: {e}", self.key);
                        false
                    }
                }
            }
        };
        self.observer
            .on_terminated(self.key.clone(), ExecutionTermination { failure, notified })
            .await;
        true
    }

    /// Runs the task body and records its outcome.
    pub(crate) async fn run(self: Arc<Self>, handler: Arc<dyn TaskHandler>, context: TaskContext) {
        let span = Span::root("TaskExecution::run", SpanContext::random())
            .with_property(|| (SpanAttribute::TASK_ID, self.key.task_id.to_string()))
            .with_property(|| {
                (
                    SpanAttribute::TASK_ALLOCATION_ID,
                    self.key.allocation_id.to_string(),
                )
            })
            .with_property(|| (SpanAttribute::TASK_TYPE, self.task_type.clone()));
        let result = AssertUnwindSafe(handler.run(context))
            .catch_unwind()
            .in_span(span)
            .await;
        match result {
            Ok(Ok(())) => {
                self.mark_as_completed().await;
            }
            Ok(Err(e)) => {
                self.mark_as_failed(e).await;
            }
            Err(_) => {
                self.mark_as_failed("the task panicked".to_string()).await;
            }
        }
    }
}
