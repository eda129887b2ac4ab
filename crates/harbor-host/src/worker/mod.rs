use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use harbor_actor::actor::{ActorHandle, ActorSystem};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::app::{AppConfig, AppName, CallInfo, CallKind, HandlerManifest, VersionTag};
use crate::error::{HostError, HostResult};
use crate::id::{ExecuteId, WorkerId};
use crate::pool::PoolLink;
use crate::route::RouteTable;
use crate::sandbox::{AppDescriptor, Sandbox};
use crate::stream::CallStream;
use crate::transport::{CallParams, Payload, RequestSnapshot, ResponseSnapshot};
use crate::worker::actor::WorkerActor;
use crate::worker::event::WorkerEvent;
use crate::worker::options::WorkerOptions;
use crate::worker::runtime::RuntimeOptions;

pub(crate) mod actor;
pub(crate) mod event;
pub(crate) mod options;
pub(crate) mod runtime;

/// One call to dispatch into a worker.
#[derive(Debug)]
pub struct ExecuteCall {
    pub handler: String,
    pub execute_id: ExecuteId,
    pub params: CallParams,
}

impl ExecuteCall {
    pub fn new(handler: impl Into<String>, params: CallParams) -> Self {
        Self {
            handler: handler.into(),
            execute_id: ExecuteId::generate(),
            params,
        }
    }

    pub fn kind(&self) -> CallKind {
        self.params.kind()
    }
}

/// What a call produced. `stream` is set for chunked responses; `data`
/// carries the complete value otherwise.
#[derive(Debug)]
pub struct Outcome {
    pub data: Payload,
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
    pub stream: Option<CallStream>,
}

/// State shared between the worker actor and every handle to it, so the
/// pool can judge a worker without a message round trip.
pub(crate) struct WorkerShared {
    created_at: Instant,
    call_timeout: Duration,
    recycle_window: Duration,
    active_at: Mutex<Instant>,
    exited: AtomicBool,
    last_call: Mutex<Option<CallInfo>>,
    routes: OnceLock<Arc<RouteTable>>,
    manifest: OnceLock<Arc<HandlerManifest>>,
}

impl WorkerShared {
    pub(crate) fn new(config: &AppConfig) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            call_timeout: config.call_timeout,
            recycle_window: config.recycle_window,
            active_at: Mutex::new(now),
            exited: AtomicBool::new(false),
            last_call: Mutex::new(None),
            routes: OnceLock::new(),
            manifest: OnceLock::new(),
        }
    }

    pub(crate) fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub(crate) fn recycle_window(&self) -> Duration {
        self.recycle_window
    }

    /// Marks the worker active and remembers the call for diagnostics.
    pub(crate) fn record_call(&self, info: &CallInfo) -> HostResult<()> {
        *self.active_at.lock()? = Instant::now();
        *self.last_call.lock()? = Some(info.clone());
        Ok(())
    }

    pub(crate) fn active_at(&self) -> HostResult<Instant> {
        Ok(*self.active_at.lock()?)
    }

    pub(crate) fn last_call(&self) -> Option<CallInfo> {
        self.last_call.lock().ok().and_then(|x| x.clone())
    }

    pub(crate) fn set_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    pub(crate) fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

/// Host-side face of one worker. Cheap to clone; all clones refer to the
/// same underlying worker.
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    app: AppName,
    version: VersionTag,
    actor: ActorHandle<WorkerActor>,
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn app(&self) -> &AppName {
        &self.app
    }

    pub fn version(&self) -> &VersionTag {
        &self.version
    }

    pub fn created_at(&self) -> Instant {
        self.shared.created_at
    }

    pub fn active_at(&self) -> HostResult<Instant> {
        self.shared.active_at()
    }

    pub fn last_call(&self) -> Option<CallInfo> {
        self.shared.last_call()
    }

    pub fn exited(&self) -> bool {
        self.shared.exited()
    }

    /// An exited worker is always recyclable; a live one only once it has
    /// been idle for at least the recycle window.
    pub fn recyclable(&self) -> bool {
        if self.shared.exited() {
            return true;
        }
        self.shared
            .active_at()
            .is_ok_and(|x| x.elapsed() >= self.shared.recycle_window())
    }

    pub(crate) fn attach(&self, routes: Arc<RouteTable>, manifest: Arc<HandlerManifest>) {
        let _ = self.shared.routes.set(routes);
        let _ = self.shared.manifest.set(manifest);
    }

    /// Route table of this worker's application version, shared by all
    /// workers of the version.
    pub fn route_table(&self) -> HostResult<Arc<RouteTable>> {
        self.shared
            .routes
            .get()
            .cloned()
            .ok_or_else(|| HostError::internal("worker has no route table attached"))
    }

    /// Handler declarations cached at registration time.
    pub fn declared_handlers(&self) -> HostResult<Arc<HandlerManifest>> {
        self.shared
            .manifest
            .get()
            .cloned()
            .ok_or_else(|| HostError::internal("worker has no handler manifest attached"))
    }

    /// Dispatches one call and resolves with its outcome. Concurrent
    /// callers do not serialize behind each other's handlers.
    pub async fn execute(&self, call: ExecuteCall) -> HostResult<Outcome> {
        let (sender, receiver) = oneshot::channel();
        if self
            .actor
            .send(WorkerEvent::Execute {
                call,
                result: sender,
            })
            .await
            .is_err()
        {
            return Err(self.exited_error());
        }
        receiver.await.map_err(|_| self.exited_error())?
    }

    /// Waits for the worker handshake, bounded by the call window.
    pub(crate) async fn initialize(&self) -> HostResult<Arc<HandlerManifest>> {
        let (sender, receiver) = oneshot::channel();
        if self
            .actor
            .send(WorkerEvent::AwaitReady { result: sender })
            .await
            .is_err()
        {
            return Err(HostError::InitError(format!(
                "worker {} stopped before its handshake",
                self.id
            )));
        }
        let window = self.shared.call_timeout();
        match tokio::time::timeout(window, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::InitError(format!(
                "worker {} dropped its handshake",
                self.id
            ))),
            Err(_) => Err(HostError::InitError(format!(
                "worker {} handshake timed out after {window:?}",
                self.id
            ))),
        }
    }

    /// Asks the live execution context for its handler declarations. The
    /// cached copy in [`WorkerHandle::declared_handlers`] answers without
    /// a round trip; this form observes what the context reports now.
    pub async fn fetch_manifest(&self) -> HostResult<HandlerManifest> {
        let (sender, receiver) = oneshot::channel();
        if self
            .actor
            .send(WorkerEvent::FetchManifest { result: sender })
            .await
            .is_err()
        {
            return Err(self.exited_error());
        }
        receiver.await.map_err(|_| self.exited_error())?
    }

    /// Best-effort termination; a worker that is already gone is fine.
    pub async fn terminate(&self) {
        let _ = self.actor.send(WorkerEvent::Shutdown).await;
    }

    fn exited_error(&self) -> HostError {
        HostError::WorkerExited {
            app: self.app.clone(),
            last_call: self.shared.last_call(),
        }
    }
}

/// Starts both halves of a worker and waits for its handshake. On
/// failure the worker is torn down before the error is returned, so a
/// half-initialized worker never escapes.
pub(crate) async fn launch(
    system: &Arc<tokio::sync::Mutex<ActorSystem>>,
    link: PoolLink,
    sandbox: Arc<dyn Sandbox>,
    id: WorkerId,
    descriptor: AppDescriptor,
    config: &AppConfig,
) -> HostResult<(WorkerHandle, Arc<HandlerManifest>)> {
    let app = descriptor.app.clone();
    let version = descriptor.version.clone();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(WorkerShared::new(config));
    let actor = {
        let mut system = system.lock().await;
        system.spawn::<WorkerActor>(WorkerOptions {
            id,
            app: app.clone(),
            version: version.clone(),
            shared: shared.clone(),
            outbox: outbox_tx,
            inbox: host_rx,
            link,
        })
    };
    tokio::spawn(runtime::run(RuntimeOptions {
        descriptor,
        sandbox,
        inbox: outbox_rx,
        host: host_tx,
    }));
    let worker = WorkerHandle {
        id,
        app,
        version,
        actor,
        shared,
    };
    match worker.initialize().await {
        Ok(manifest) => Ok((worker, manifest)),
        Err(e) => {
            worker.terminate().await;
            Err(e)
        }
    }
}
