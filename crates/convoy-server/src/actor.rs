use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{error, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

const ACTOR_CHANNEL_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("the actor has stopped")]
    Stopped,
}

impl<T> From<mpsc::error::SendError<T>> for ActorError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        ActorError::Stopped
    }
}

/// An actor owns its state exclusively and processes one message at a time.
/// Asynchronous work is spawned through the [`ActorContext`] and reports back
/// to the actor with messages, so that `receive` never blocks.
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;

    fn new(options: Self::Options) -> Self;
    fn start(&mut self, ctx: &mut ActorContext<Self>);
    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction;
    fn stop(self, ctx: &mut ActorContext<Self>);
}

pub enum ActorAction {
    Continue,
    /// Logs the message as a warning and continues processing.
    Warn(String),
    /// Logs the message as an error and stops the actor.
    Fail(String),
    Stop,
}

impl ActorAction {
    pub fn warn(message: impl fmt::Display) -> Self {
        ActorAction::Warn(message.to_string())
    }

    pub fn fail(message: impl fmt::Display) -> Self {
        ActorAction::Fail(message.to_string())
    }
}

pub struct ActorContext<T: Actor> {
    handle: ActorHandle<T>,
    tasks: JoinSet<()>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: ActorHandle<T>) -> Self {
        Self {
            handle,
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    /// Sends a message to the actor itself.
    /// The message is delivered after the current message has been processed.
    pub fn send(&mut self, message: T::Message) {
        let handle = self.handle.clone();
        self.spawn(async move {
            let _ = handle.send(message).await;
        });
    }

    /// Sends a message to the actor itself after the given delay.
    /// The delayed message is dropped if the actor stops before the delay elapses.
    pub fn send_with_delay(&mut self, message: T::Message, delay: Duration) {
        let handle = self.handle.clone();
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(message).await;
        });
    }

    /// Spawns a background task tied to the lifetime of the actor.
    /// All such tasks are aborted when the actor stops.
    pub fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.spawn(task);
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("actor task panicked: {e}");
                }
            }
        }
    }
}

pub struct ActorHandle<T>
where
    T: Actor,
{
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T> Clone for ActorHandle<T>
where
    T: Actor,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub fn new(options: T::Options) -> Self {
        let (tx, mut rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let mut actor = T::new(options);
        let out = Self {
            sender: tx,
            stopped: stopped_rx,
        };
        let mut ctx = ActorContext::new(out.clone());
        tokio::spawn(async move {
            actor.start(&mut ctx);
            while let Some(message) = rx.recv().await {
                let action = actor.receive(&mut ctx, message);
                ctx.reap();
                match action {
                    ActorAction::Continue => {}
                    ActorAction::Warn(message) => {
                        warn!("{message}");
                    }
                    ActorAction::Fail(message) => {
                        error!("{message}");
                        break;
                    }
                    ActorAction::Stop => {
                        break;
                    }
                }
            }
            // No more messages are accepted once the loop ends.
            rx.close();
            actor.stop(&mut ctx);
            ctx.tasks.shutdown().await;
            let _ = stopped_tx.send(true);
        });
        out
    }

    pub async fn send(&self, message: T::Message) -> Result<(), ActorError> {
        self.sender.send(message).await.map_err(ActorError::from)
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow() || self.sender.is_closed()
    }

    pub async fn wait_for_stop(mut self) {
        // We ignore the receiver error since the sender must have been dropped in this case,
        // which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    struct TestActor {
        ticks: usize,
    }

    enum TestMessage {
        Echo {
            value: String,
            reply: oneshot::Sender<String>,
        },
        Tick,
        CountTicks {
            reply: oneshot::Sender<usize>,
        },
        ScheduleTick {
            delay: Duration,
        },
        Stop,
    }

    impl Actor for TestActor {
        type Message = TestMessage;
        type Options = ();

        fn new(_options: Self::Options) -> Self {
            Self { ticks: 0 }
        }

        fn start(&mut self, _: &mut ActorContext<Self>) {}

        fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction {
            match message {
                TestMessage::Echo { value, reply } => {
                    let _ = reply.send(value.to_uppercase());
                }
                TestMessage::Tick => {
                    self.ticks += 1;
                }
                TestMessage::CountTicks { reply } => {
                    let _ = reply.send(self.ticks);
                }
                TestMessage::ScheduleTick { delay } => {
                    ctx.send_with_delay(TestMessage::Tick, delay);
                }
                TestMessage::Stop => return ActorAction::Stop,
            }
            ActorAction::Continue
        }

        fn stop(self, _: &mut ActorContext<Self>) {}
    }

    async fn count_ticks(handle: &ActorHandle<TestActor>) -> usize {
        let (tx, rx) = oneshot::channel();
        let _ = handle.send(TestMessage::CountTicks { reply: tx }).await;
        rx.await.unwrap_or_default()
    }

    #[tokio::test]
    async fn test_actor_handle_send() {
        let handle = ActorHandle::<TestActor>::new(());
        let (tx, rx) = oneshot::channel();
        let result = handle
            .send(TestMessage::Echo {
                value: "hello".to_string(),
                reply: tx,
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(rx.await, Ok("HELLO".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_send_with_delay() {
        let handle = ActorHandle::<TestActor>::new(());
        let _ = handle
            .send(TestMessage::ScheduleTick {
                delay: Duration::from_secs(5),
            })
            .await;
        assert_eq!(count_ticks(&handle).await, 0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count_ticks(&handle).await, 1);
    }

    #[tokio::test]
    async fn test_actor_handle_wait_for_stop() {
        let handle = ActorHandle::<TestActor>::new(());
        let result = handle.send(TestMessage::Stop).await;
        assert!(result.is_ok());

        handle.clone().wait_for_stop().await;
        // Multiple handles should be able to wait for the actor to stop.
        handle.clone().wait_for_stop().await;
        assert!(handle.is_stopped());
        assert!(matches!(
            handle.send(TestMessage::Tick).await,
            Err(ActorError::Stopped)
        ));
    }
}
