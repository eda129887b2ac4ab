use std::mem;
use std::sync::Arc;

use harbor_actor::actor::{ActorAction, ActorContext};
use log::{debug, error, warn};
use tokio::sync::oneshot;

use crate::app::{CallInfo, HandlerManifest};
use crate::error::{ErrorDescription, HostError, HostResult};
use crate::id::ExecuteId;
use crate::protocol::{CallResult, ConfigBody, Envelope, ErrorBody, ExecuteBody, InitBody, ResultBody};
use crate::rpc;
use crate::stream;
use crate::transport::Payload;
use crate::worker::actor::{Handshake, PendingCall, WorkerActor};
use crate::worker::event::WorkerEvent;
use crate::worker::{ExecuteCall, Outcome};

impl WorkerActor {
    pub(super) fn handle_execute(
        &mut self,
        ctx: &mut ActorContext<Self>,
        call: ExecuteCall,
        result: oneshot::Sender<HostResult<Outcome>>,
    ) -> ActorAction {
        let ExecuteCall {
            handler,
            execute_id,
            params,
        } = call;
        if self.shared.exited() || self.outbox.is_none() {
            let _ = result.send(Err(self.exited_error()));
            return ActorAction::Continue;
        }
        if self.pending.contains_key(&execute_id) {
            let _ = result.send(Err(HostError::invalid(format!(
                "execute id {execute_id} is already in flight"
            ))));
            return ActorAction::Continue;
        }
        let kind = params.kind();
        let info = CallInfo {
            app: self.app.clone(),
            handler: handler.clone(),
            kind,
            execute_id,
        };
        if let Err(e) = self.shared.record_call(&info) {
            let _ = result.send(Err(e));
            return ActorAction::Continue;
        }
        let envelope = Envelope::Execute(ExecuteBody {
            app: self.app.clone(),
            handler: Some(handler),
            execute_id,
            kind,
            params,
        });
        let sent = match &self.outbox {
            Some(outbox) => outbox.send(envelope).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.set_exited();
            let _ = result.send(Err(self.exited_error()));
            return ActorAction::Continue;
        }
        let timer = {
            let handle = ctx.handle().clone();
            let window = self.shared.call_timeout();
            ctx.spawn(async move {
                tokio::time::sleep(window).await;
                let _ = handle.send(WorkerEvent::CallExpired { execute_id }).await;
            })
        };
        self.pending.insert(
            execute_id,
            PendingCall {
                info,
                reply: Some(result),
                sink: None,
                timer,
            },
        );
        ActorAction::Continue
    }

    pub(super) fn handle_call_expired(&mut self, execute_id: ExecuteId) -> ActorAction {
        // A terminal message and the timer can race; losing the race is
        // not an error.
        let Some(mut entry) = self.pending.remove(&execute_id) else {
            return ActorAction::Continue;
        };
        let error = HostError::CallTimeout {
            window: self.shared.call_timeout(),
            call: entry.info.clone(),
        };
        warn!("worker {}: {error}", self.id);
        if let Some(reply) = entry.reply.take() {
            let _ = reply.send(Err(error));
        } else if let Some(sink) = entry.sink.take() {
            sink.write(Err(error));
            sink.complete();
        }
        ActorAction::Continue
    }

    pub(super) fn handle_envelope(
        &mut self,
        ctx: &mut ActorContext<Self>,
        envelope: Envelope,
    ) -> ActorAction {
        match envelope {
            Envelope::Init(body) => self.handle_init(body),
            Envelope::Result(body) => self.handle_result(body),
            Envelope::Error(body) => self.handle_error(body),
            Envelope::Execute(body) => self.handle_upcall(ctx, body),
            Envelope::Config(body) => self.handle_config_reply(body),
        }
    }

    fn handle_init(&mut self, body: InitBody) -> ActorAction {
        let manifest = Arc::new(body.handlers);
        match mem::replace(&mut self.handshake, Handshake::Ready(manifest.clone())) {
            Handshake::Awaiting { waiters } => {
                debug!(
                    "worker {} for app ({}) is ready with {} handlers",
                    self.id,
                    self.app,
                    manifest.len()
                );
                for waiter in waiters {
                    let _ = waiter.send(Ok(manifest.clone()));
                }
                ActorAction::Continue
            }
            previous => {
                self.handshake = previous;
                ActorAction::warn(format!(
                    "worker {} sent an init message after its handshake",
                    self.id
                ))
            }
        }
    }

    fn handle_result(&mut self, body: ResultBody) -> ActorAction {
        let ResultBody {
            execute_id, result, ..
        } = body;
        let CallResult {
            data,
            is_complete,
            is_stream,
            request,
            response,
        } = result;

        if !is_stream {
            let Some(mut entry) = self.pending.remove(&execute_id) else {
                debug!("worker {}: dropping stale result [{execute_id}]", self.id);
                return ActorAction::Continue;
            };
            entry.timer.abort();
            let outcome = Outcome {
                data,
                request,
                response,
                stream: None,
            };
            if let Some(reply) = entry.reply.take() {
                let _ = reply.send(Ok(outcome));
            }
            return ActorAction::Continue;
        }

        let Some(entry) = self.pending.get_mut(&execute_id) else {
            debug!(
                "worker {}: dropping stale stream chunk [{execute_id}]",
                self.id
            );
            return ActorAction::Continue;
        };
        if entry.sink.is_none() {
            // The first chunk resolves the caller with the stream handle;
            // everything after flows through the sink.
            let (sink, stream) = stream::call_stream();
            let outcome = Outcome {
                data: Payload::Empty,
                request,
                response,
                stream: Some(stream),
            };
            if let Some(reply) = entry.reply.take() {
                let _ = reply.send(Ok(outcome));
            }
            entry.sink = Some(sink);
        }
        if !is_complete && !data.is_empty() {
            if let Some(sink) = &entry.sink {
                sink.write(data.into_bytes());
            }
        }
        if is_complete {
            if let Some(entry) = self.pending.remove(&execute_id) {
                entry.timer.abort();
                if let Some(sink) = entry.sink {
                    sink.complete();
                }
            }
        }
        ActorAction::Continue
    }

    fn handle_error(&mut self, body: ErrorBody) -> ActorAction {
        let ErrorBody {
            execute_id, error, ..
        } = body;
        let Some(execute_id) = execute_id else {
            // An error with no correlation id concerns the worker itself,
            // which before the handshake means a failed application load.
            return self.fail_handshake(error);
        };
        let Some(mut entry) = self.pending.remove(&execute_id) else {
            debug!("worker {}: dropping stale error [{execute_id}]", self.id);
            return ActorAction::Continue;
        };
        entry.timer.abort();
        let error = HostError::ApplicationError(error);
        if let Some(reply) = entry.reply.take() {
            let _ = reply.send(Err(error));
        } else if let Some(sink) = entry.sink.take() {
            sink.write(Err(error));
            sink.complete();
        }
        ActorAction::Continue
    }

    fn fail_handshake(&mut self, error: ErrorDescription) -> ActorAction {
        match mem::replace(&mut self.handshake, Handshake::Failed(error.clone())) {
            Handshake::Awaiting { waiters } => {
                warn!(
                    "worker {} for app ({}) failed to initialize: {error}",
                    self.id, self.app
                );
                for waiter in waiters {
                    let _ = waiter.send(Err(HostError::InitError(error.to_string())));
                }
            }
            previous => {
                self.handshake = previous;
                warn!(
                    "worker {} reported an error outside any call: {error}",
                    self.id
                );
            }
        }
        ActorAction::Continue
    }

    fn handle_upcall(&mut self, ctx: &mut ActorContext<Self>, body: ExecuteBody) -> ActorAction {
        // Serving a nested call must not block this actor; a same-app
        // target may round-robin right back to this worker.
        let Some(outbox) = self.outbox.clone() else {
            return ActorAction::Continue;
        };
        debug!(
            "worker {} relaying rpc upcall to app ({}) [{}]",
            self.id, body.app, body.execute_id
        );
        ctx.spawn(rpc::serve_upcall(self.link.clone(), outbox, body));
        ActorAction::Continue
    }

    fn handle_config_reply(&mut self, body: ConfigBody) -> ActorAction {
        let Some(manifest) = body.handlers else {
            return ActorAction::warn(format!(
                "worker {} sent a config request to the host",
                self.id
            ));
        };
        match self.manifest_waiters.pop_front() {
            Some(waiter) => {
                let _ = waiter.send(Ok(manifest));
                ActorAction::Continue
            }
            None => ActorAction::warn(format!(
                "worker {} sent a config reply nobody asked for",
                self.id
            )),
        }
    }

    pub(super) fn handle_await_ready(
        &mut self,
        result: oneshot::Sender<HostResult<Arc<HandlerManifest>>>,
    ) -> ActorAction {
        if self.shared.exited() {
            let _ = result.send(Err(HostError::InitError(self.exited_error().to_string())));
            return ActorAction::Continue;
        }
        match &mut self.handshake {
            Handshake::Awaiting { waiters } => waiters.push(result),
            Handshake::Ready(manifest) => {
                let _ = result.send(Ok(manifest.clone()));
            }
            Handshake::Failed(error) => {
                let _ = result.send(Err(HostError::InitError(error.to_string())));
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_fetch_manifest(
        &mut self,
        result: oneshot::Sender<HostResult<HandlerManifest>>,
    ) -> ActorAction {
        let request = Envelope::Config(ConfigBody { handlers: None });
        let sent = match &self.outbox {
            Some(outbox) => outbox.send(request).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.set_exited();
            let _ = result.send(Err(self.exited_error()));
            return ActorAction::Continue;
        }
        self.manifest_waiters.push_back(result);
        ActorAction::Continue
    }

    pub(super) fn handle_runtime_gone(&mut self) -> ActorAction {
        self.shared.set_exited();
        if self.terminating {
            debug!("worker {} runtime finished", self.id);
        } else {
            error!(
                "worker {} for app ({}) exited unexpectedly",
                self.id, self.app
            );
        }
        ActorAction::Stop
    }

    pub(super) fn handle_shutdown(&mut self) -> ActorAction {
        debug!("worker {} shutting down", self.id);
        self.terminating = true;
        // Closing the channel asks the execution context to wind down;
        // its exit comes back as RuntimeGone.
        self.outbox = None;
        if self.shared.exited() {
            return ActorAction::Stop;
        }
        ActorAction::Continue
    }

    /// Fails every in-flight call with an exit diagnostic that names the
    /// call itself.
    pub(super) fn fail_pending(&mut self) {
        for (_, mut entry) in self.pending.drain() {
            entry.timer.abort();
            let error = HostError::WorkerExited {
                app: self.app.clone(),
                last_call: Some(entry.info.clone()),
            };
            if let Some(reply) = entry.reply.take() {
                let _ = reply.send(Err(error));
            } else if let Some(sink) = entry.sink.take() {
                sink.write(Err(error));
                sink.complete();
            }
        }
    }

    pub(super) fn fail_waiters_on_exit(&mut self) {
        let error = ErrorDescription::new(
            "WorkerExitedError",
            format!("worker for app ({}) exited before its handshake", self.app),
        );
        match mem::replace(&mut self.handshake, Handshake::Failed(error.clone())) {
            Handshake::Awaiting { waiters } => {
                for waiter in waiters {
                    let _ = waiter.send(Err(HostError::InitError(error.to_string())));
                }
            }
            previous => self.handshake = previous,
        }
        for waiter in self.manifest_waiters.drain(..) {
            let _ = waiter.send(Err(HostError::WorkerExited {
                app: self.app.clone(),
                last_call: self.shared.last_call(),
            }));
        }
    }

    fn exited_error(&self) -> HostError {
        HostError::WorkerExited {
            app: self.app.clone(),
            last_call: self.shared.last_call(),
        }
    }
}
