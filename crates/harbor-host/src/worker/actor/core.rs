use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use harbor_actor::actor::{Actor, ActorAction, ActorContext};
use log::debug;

use crate::worker::actor::{Handshake, WorkerActor};
use crate::worker::event::WorkerEvent;
use crate::worker::options::WorkerOptions;

#[async_trait]
impl Actor for WorkerActor {
    type Message = WorkerEvent;
    type Options = WorkerOptions;

    fn name() -> &'static str {
        "WorkerActor"
    }

    fn new(options: WorkerOptions) -> Self {
        Self {
            id: options.id,
            app: options.app,
            version: options.version,
            shared: options.shared,
            outbox: Some(options.outbox),
            inbox: Some(options.inbox),
            link: options.link,
            handshake: Handshake::Awaiting { waiters: vec![] },
            pending: HashMap::new(),
            manifest_waiters: VecDeque::new(),
            terminating: false,
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        debug!(
            "worker {} for app ({}) version ({}) starting",
            self.id, self.app, self.version
        );
        // Pump envelopes from the execution context into the mailbox. The
        // pump ending is the only exit signal; there is no health check.
        if let Some(mut inbox) = self.inbox.take() {
            let handle = ctx.handle().clone();
            ctx.spawn(async move {
                while let Some(envelope) = inbox.recv().await {
                    if handle.send(WorkerEvent::FromRuntime(envelope)).await.is_err() {
                        return;
                    }
                }
                let _ = handle.send(WorkerEvent::RuntimeGone).await;
            });
        }
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: WorkerEvent) -> ActorAction {
        match message {
            WorkerEvent::Execute { call, result } => self.handle_execute(ctx, call, result),
            WorkerEvent::AwaitReady { result } => self.handle_await_ready(result),
            WorkerEvent::FetchManifest { result } => self.handle_fetch_manifest(result),
            WorkerEvent::FromRuntime(envelope) => self.handle_envelope(ctx, envelope),
            WorkerEvent::RuntimeGone => self.handle_runtime_gone(),
            WorkerEvent::CallExpired { execute_id } => self.handle_call_expired(execute_id),
            WorkerEvent::Shutdown => self.handle_shutdown(),
        }
    }

    async fn stop(mut self, _ctx: &mut ActorContext<Self>) {
        self.shared.set_exited();
        self.fail_pending();
        self.fail_waiters_on_exit();
        debug!("worker {} for app ({}) stopped", self.id, self.app);
    }
}
