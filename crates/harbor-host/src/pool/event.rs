use std::sync::Arc;

use harbor_actor::actor::ActorSystem;
use tokio::sync::{oneshot, Mutex};

use crate::app::{AppConfig, AppName, HandlerManifest, VersionTag};
use crate::error::HostResult;
use crate::id::WorkerId;
use crate::pool::PoolSnapshot;
use crate::worker::WorkerHandle;

pub(crate) enum PoolEvent {
    /// Resolves with a worker for the application version, creating or
    /// growing its pool as the size check dictates.
    AcquireWorker {
        app: AppName,
        version: VersionTag,
        system: Arc<Mutex<ActorSystem>>,
        result: oneshot::Sender<HostResult<WorkerHandle>>,
    },
    /// A spawned worker launch has finished, either way.
    WorkerInitialized {
        app: AppName,
        version: VersionTag,
        system: Arc<Mutex<ActorSystem>>,
        result: HostResult<InitializedWorker>,
    },
    /// A recycle probe for one worker has come due.
    ProbeRecyclableWorker {
        app: AppName,
        version: VersionTag,
        worker_id: WorkerId,
    },
    Snapshot {
        result: oneshot::Sender<PoolSnapshot>,
    },
    Shutdown,
}

pub(crate) struct InitializedWorker {
    pub worker: WorkerHandle,
    pub manifest: Arc<HandlerManifest>,
    pub config: AppConfig,
}
