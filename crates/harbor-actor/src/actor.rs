use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

const ACTOR_CHANNEL_SIZE: usize = 8;

/// A single-threaded unit of state. All messages to one actor are processed
/// sequentially, so `receive` can mutate state without further synchronization.
/// `receive` must not await; long-running work belongs in [`ActorContext::spawn`]
/// with its result delivered back as another message.
#[async_trait]
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;

    fn name() -> &'static str;

    fn new(options: Self::Options) -> Self;

    async fn start(&mut self, _ctx: &mut ActorContext<Self>) {}

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction;

    async fn stop(self, _ctx: &mut ActorContext<Self>) {}
}

pub enum ActorAction {
    Continue,
    Stop,
}

impl ActorAction {
    pub fn warn(message: impl Display) -> Self {
        warn!("{message}");
        Self::Continue
    }

    pub fn fail(message: impl Display) -> Self {
        error!("{message}");
        Self::Stop
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
    pub async fn send(&self, message: T::Message) -> Result<(), mpsc::error::SendError<T::Message>> {
        self.sender.send(message).await
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub async fn wait_for_stop(mut self) {
        // We ignore the receiver error since the sender must have been dropped
        // in this case, which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }
}

pub struct ActorContext<T>
where
    T: Actor,
{
    handle: ActorHandle<T>,
    queue: VecDeque<T::Message>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: ActorHandle<T>) -> Self {
        Self {
            handle,
            queue: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    /// Sends a message to the actor itself. Messages sent this way are
    /// processed before anything still waiting in the mailbox.
    pub fn send(&mut self, message: T::Message) {
        self.queue.push_back(message);
    }

    /// Sends a message to the actor itself after a delay. Delivery is
    /// best-effort since the actor may stop before the delay elapses.
    pub fn send_with_delay(&mut self, message: T::Message, delay: Duration) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send(message).await;
        });
    }

    pub fn spawn(&mut self, future: impl Future<Output = ()> + Send + 'static) -> JoinHandle<()> {
        tokio::spawn(future)
    }
}

pub struct ActorSystem {
    tasks: JoinSet<()>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<T: Actor>(&mut self, options: T::Options) -> ActorHandle<T> {
        let (tx, rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let actor = T::new(options);
        let handle = ActorHandle {
            sender: tx,
            stopped: stopped_rx,
        };
        let ctx = ActorContext::new(handle.clone());
        self.tasks.spawn(run_actor(actor, ctx, rx, stopped_tx));
        handle
    }

    /// Waits for all actors spawned in this system to stop.
    pub async fn join(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

async fn run_actor<T: Actor>(
    mut actor: T,
    mut ctx: ActorContext<T>,
    mut receiver: mpsc::Receiver<T::Message>,
    stopped: watch::Sender<bool>,
) {
    debug!("actor {} started", T::name());
    actor.start(&mut ctx).await;
    loop {
        // Self-sent messages take priority over the mailbox.
        let message = match ctx.queue.pop_front() {
            Some(x) => x,
            None => match receiver.recv().await {
                Some(x) => x,
                None => break,
            },
        };
        match actor.receive(&mut ctx, message) {
            ActorAction::Continue => {}
            ActorAction::Stop => break,
        }
    }
    receiver.close();
    actor.stop(&mut ctx).await;
    debug!("actor {} stopped", T::name());
    let _ = stopped.send(true);
}
