use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::app::{AppName, CallKind, HandlerManifest};
use crate::error::{ErrorDescription, HostError, HostResult};
use crate::protocol::{
    CallResult, ConfigBody, Envelope, ErrorBody, ExecuteBody, InitBody, ResultBody,
};
use crate::rpc::RpcBridge;
use crate::sandbox::{AppDescriptor, AppInstance, HandlerCall, HandlerOutcome, Sandbox};
use crate::transport::{CallParams, Payload};

pub(crate) struct RuntimeOptions {
    pub descriptor: AppDescriptor,
    pub sandbox: Arc<dyn Sandbox>,
    /// Envelopes from the host half.
    pub inbox: mpsc::UnboundedReceiver<Envelope>,
    /// Envelopes toward the host half. Dropping it is the exit signal
    /// the host observes.
    pub host: mpsc::UnboundedSender<Envelope>,
}

/// The sandbox-facing half of a worker: loads the application instance,
/// announces itself, then serves envelopes until the host closes the
/// channel. Handlers run as independent tasks, so a slow call never
/// blocks the envelope loop.
pub(crate) async fn run(options: RuntimeOptions) {
    let RuntimeOptions {
        descriptor,
        sandbox,
        mut inbox,
        host,
    } = options;
    let instance = match sandbox.load(&descriptor).await {
        Ok(x) => x,
        Err(e) => {
            warn!(
                "failed to load app ({}) version ({}): {e}",
                descriptor.app, descriptor.version
            );
            let _ = host.send(Envelope::Error(ErrorBody {
                execute_id: None,
                kind: None,
                error: ErrorDescription::from(&e),
            }));
            return;
        }
    };
    let manifest = instance.handlers();
    if host
        .send(Envelope::Init(InitBody {
            handlers: manifest.clone(),
        }))
        .is_err()
    {
        return;
    }
    let bridge = RpcBridge::new(descriptor.app.clone(), host.clone());
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            envelope = inbox.recv() => {
                let Some(envelope) = envelope else {
                    // Host closed the channel: orderly shutdown.
                    break;
                };
                match envelope {
                    Envelope::Execute(body) => {
                        tasks.spawn(serve_call(
                            instance.clone(),
                            bridge.clone(),
                            host.clone(),
                            manifest.clone(),
                            descriptor.app.clone(),
                            body,
                        ));
                    }
                    Envelope::Result(body) => {
                        if !bridge.resolve(&body.execute_id, Ok(body.result.data)) {
                            debug!(
                                "app ({}): stale rpc result [{}]",
                                descriptor.app, body.execute_id
                            );
                        }
                    }
                    Envelope::Error(body) => match body.execute_id {
                        Some(id) => {
                            if !bridge.resolve(&id, Err(body.error)) {
                                debug!("app ({}): stale rpc error [{id}]", descriptor.app);
                            }
                        }
                        None => warn!(
                            "app ({}): error envelope without a correlation id",
                            descriptor.app
                        ),
                    },
                    Envelope::Config(ConfigBody { handlers: None }) => {
                        let reply = Envelope::Config(ConfigBody {
                            handlers: Some(instance.handlers()),
                        });
                        if host.send(reply).is_err() {
                            break;
                        }
                    }
                    Envelope::Config(_) => {
                        warn!("app ({}): unexpected config payload", descriptor.app);
                    }
                    Envelope::Init(_) => {
                        warn!("app ({}): unexpected init envelope", descriptor.app);
                    }
                }
            }
            Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        // A panicked handler leaves the instance in an
                        // unknown state; exiting here is the crash signal
                        // the host acts on.
                        error!(
                            "app ({}): handler panicked, shutting down the execution context",
                            descriptor.app
                        );
                        return;
                    }
                }
            }
        }
    }
    tasks.abort_all();
}

async fn serve_call(
    instance: Arc<dyn AppInstance>,
    bridge: RpcBridge,
    host: mpsc::UnboundedSender<Envelope>,
    manifest: HandlerManifest,
    app: AppName,
    body: ExecuteBody,
) {
    let ExecuteBody {
        handler,
        execute_id,
        kind,
        params,
        ..
    } = body;
    match invoke(instance, bridge, &manifest, app, handler, kind, params).await {
        Ok(HandlerOutcome::Complete {
            data,
            request,
            response,
        }) => {
            let result = CallResult::complete(data).with_transport(request, response);
            let _ = host.send(Envelope::Result(ResultBody {
                execute_id,
                kind,
                result,
            }));
        }
        Ok(HandlerOutcome::Stream {
            mut stream,
            mut request,
            mut response,
        }) => {
            while let Some(chunk) = stream.next().await {
                let envelope = match chunk {
                    Ok(chunk) => {
                        // Transport snapshots ride the first message only.
                        let result = CallResult::stream_chunk(Payload::Binary(chunk))
                            .with_transport(request.take(), response.take());
                        Envelope::Result(ResultBody {
                            execute_id,
                            kind,
                            result,
                        })
                    }
                    Err(e) => {
                        let _ = host.send(Envelope::Error(ErrorBody {
                            execute_id: Some(execute_id),
                            kind: Some(kind),
                            error: ErrorDescription::from(&e),
                        }));
                        return;
                    }
                };
                if host.send(envelope).is_err() {
                    return;
                }
            }
            let result = CallResult::stream_end().with_transport(request.take(), response.take());
            let _ = host.send(Envelope::Result(ResultBody {
                execute_id,
                kind,
                result,
            }));
        }
        Err(e) => {
            let _ = host.send(Envelope::Error(ErrorBody {
                execute_id: Some(execute_id),
                kind: Some(kind),
                error: ErrorDescription::from(&e),
            }));
        }
    }
}

async fn invoke(
    instance: Arc<dyn AppInstance>,
    bridge: RpcBridge,
    manifest: &HandlerManifest,
    app: AppName,
    handler: Option<String>,
    kind: CallKind,
    params: CallParams,
) -> HostResult<HandlerOutcome> {
    let Some(handler) = handler else {
        return Err(HostError::invalid("execute envelope without a handler name"));
    };
    let Some(declaration) = manifest.get(&handler) else {
        return Err(HostError::HandlerNotFound { app, handler });
    };
    if declaration.kind != kind {
        return Err(HostError::invalid(format!(
            "handler ({app}.{handler}) is declared as {} but was called as {kind}",
            declaration.kind
        )));
    }
    instance
        .invoke(HandlerCall {
            handler,
            params,
            rpc: bridge,
        })
        .await
}
