use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::app::{AppName, CallKind};
use crate::error::{ErrorDescription, HostError, HostResult};
use crate::id::ExecuteId;
use crate::pool::PoolLink;
use crate::protocol::{CallResult, Envelope, ErrorBody, ExecuteBody, ResultBody};
use crate::transport::{CallParams, Payload};
use crate::worker::ExecuteCall;

/// Splits an RPC target of the form `appName.handlerName`. Both parts
/// must be word characters only.
pub fn parse_target(target: &str) -> HostResult<(AppName, String)> {
    let Some((app, handler)) = target.split_once('.') else {
        return Err(HostError::InvalidRpcTarget(target.to_string()));
    };
    if app.is_empty() || handler.is_empty() || !is_word(app) || !is_word(handler) {
        return Err(HostError::InvalidRpcTarget(target.to_string()));
    }
    Ok((app.into(), handler.to_string()))
}

fn is_word(value: &str) -> bool {
    value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

type RpcWaiters = Arc<Mutex<HashMap<ExecuteId, oneshot::Sender<Result<Payload, ErrorDescription>>>>>;

/// Lets code running inside one application's worker invoke an `rpc`
/// handler of another application through the host. Cross-application
/// calls stay inside the host process; nothing goes over a network.
#[derive(Clone)]
pub struct RpcBridge {
    app: AppName,
    host: mpsc::UnboundedSender<Envelope>,
    waiters: RpcWaiters,
}

impl RpcBridge {
    pub(crate) fn new(app: AppName, host: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            app,
            host,
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn app(&self) -> &AppName {
        &self.app
    }

    /// Calls `target` with `params` and resolves with the value the
    /// remote handler computed. Fails fast on a malformed target, before
    /// anything crosses the boundary.
    pub async fn invoke(
        &self,
        target: &str,
        params: impl Into<Payload> + Send,
    ) -> HostResult<Payload> {
        let (target_app, handler) = parse_target(target)?;
        let execute_id = ExecuteId::generate();
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock()?.insert(execute_id, sender);
        debug!(
            "app ({}) invoking rpc target ({target_app}.{handler}) [{execute_id}]",
            self.app
        );
        let envelope = Envelope::Execute(ExecuteBody {
            app: target_app,
            handler: Some(handler),
            execute_id,
            kind: CallKind::Rpc,
            params: CallParams::Rpc(params.into()),
        });
        if self.host.send(envelope).is_err() {
            self.waiters.lock()?.remove(&execute_id);
            return Err(HostError::internal("worker host channel has closed"));
        }
        match receiver.await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(description)) => Err(HostError::ApplicationError(description)),
            Err(_) => Err(HostError::internal("rpc reply channel has closed")),
        }
    }

    /// Resolves one outstanding invocation. `false` means the id belongs
    /// to no outstanding invocation of this bridge.
    pub(crate) fn resolve(
        &self,
        execute_id: &ExecuteId,
        outcome: Result<Payload, ErrorDescription>,
    ) -> bool {
        let waiter = self
            .waiters
            .lock()
            .ok()
            .and_then(|mut waiters| waiters.remove(execute_id));
        match waiter {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Serves one RPC upcall from a worker: acquires a worker for the target
/// application through the pool and posts the outcome back down into the
/// calling runtime. Runs detached so the worker actor never blocks on a
/// nested call.
pub(crate) async fn serve_upcall(
    link: PoolLink,
    origin: mpsc::UnboundedSender<Envelope>,
    body: ExecuteBody,
) {
    let execute_id = body.execute_id;
    let envelope = match execute_upcall(link, body).await {
        Ok(data) => Envelope::Result(ResultBody {
            execute_id,
            kind: CallKind::Rpc,
            result: CallResult::complete(data),
        }),
        Err(error) => Envelope::Error(ErrorBody {
            execute_id: Some(execute_id),
            kind: Some(CallKind::Rpc),
            error: ErrorDescription::from(&error),
        }),
    };
    // The calling runtime may have exited while the call was in flight.
    let _ = origin.send(envelope);
}

async fn execute_upcall(link: PoolLink, body: ExecuteBody) -> HostResult<Payload> {
    let ExecuteBody {
        app,
        handler,
        execute_id,
        kind,
        params,
    } = body;
    if kind != CallKind::Rpc {
        return Err(HostError::invalid(format!(
            "worker-to-host execute must be rpc, got {kind}"
        )));
    }
    let Some(handler) = handler else {
        return Err(HostError::invalid("rpc execute requires a handler name"));
    };
    let version = link.resolve_version(&app).await?;
    let worker = link.get_worker(app.clone(), version).await?;
    let manifest = worker.declared_handlers()?;
    let Some(declaration) = manifest.get(&handler) else {
        return Err(HostError::HandlerNotFound { app, handler });
    };
    if declaration.kind != CallKind::Rpc {
        return Err(HostError::invalid(format!(
            "handler ({app}.{handler}) is declared as {}, not rpc",
            declaration.kind
        )));
    }
    let outcome = worker
        .execute(ExecuteCall {
            handler,
            execute_id,
            params,
        })
        .await?;
    // A streaming target is flattened into a single binary payload; the
    // call window still bounds the whole exchange.
    match outcome.stream {
        Some(stream) => Ok(Payload::Binary(stream.collect_bytes().await?)),
        None => Ok(outcome.data),
    }
}
