mod actor;
mod event;
mod options;
mod set;

pub use options::PoolOptions;

use std::collections::HashMap;
use std::sync::Arc;

use harbor_actor::actor::{ActorHandle, ActorSystem};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};

use crate::app::{AppName, VersionResolver, VersionTag};
use crate::error::{HostError, HostResult};
use crate::pool::actor::PoolActor;
use crate::pool::event::PoolEvent;
use crate::worker::WorkerHandle;

/// Worker counts per application version, observed at one instant.
/// Entries still creating their first worker count as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub apps: HashMap<AppName, HashMap<VersionTag, usize>>,
}

impl PoolSnapshot {
    pub fn worker_count(&self, app: &AppName, version: &VersionTag) -> usize {
        self.apps
            .get(app)
            .and_then(|x| x.get(version))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_workers(&self) -> usize {
        self.apps.values().flat_map(|x| x.values()).sum()
    }
}

/// Line into the pool actor carried by every worker, so RPC calls
/// between applications acquire their target through the same pool
/// that serves external requests.
#[derive(Clone)]
pub(crate) struct PoolLink {
    handle: ActorHandle<PoolActor>,
    system: Arc<Mutex<ActorSystem>>,
    version_resolver: Arc<dyn VersionResolver>,
}

impl PoolLink {
    pub(crate) fn new(
        handle: ActorHandle<PoolActor>,
        system: Arc<Mutex<ActorSystem>>,
        version_resolver: Arc<dyn VersionResolver>,
    ) -> Self {
        Self {
            handle,
            system,
            version_resolver,
        }
    }

    pub(crate) async fn get_worker(
        &self,
        app: AppName,
        version: VersionTag,
    ) -> HostResult<WorkerHandle> {
        let (sender, receiver) = oneshot::channel();
        self.handle
            .send(PoolEvent::AcquireWorker {
                app,
                version,
                system: self.system.clone(),
                result: sender,
            })
            .await
            .map_err(|_| pool_stopped())?;
        receiver.await.map_err(|_| pool_stopped())?
    }

    pub(crate) async fn resolve_version(&self, app: &AppName) -> HostResult<VersionTag> {
        self.version_resolver.resolve_version(app).await
    }
}

/// The work pool. Cloning shares the underlying actor; the pool stays
/// up until [`WorkPool::close`].
#[derive(Clone)]
pub struct WorkPool {
    system: Arc<Mutex<ActorSystem>>,
    handle: ActorHandle<PoolActor>,
    options: PoolOptions,
}

impl WorkPool {
    pub fn new(options: PoolOptions) -> Self {
        let mut system = ActorSystem::new();
        let handle = system.spawn::<PoolActor>(options.clone());
        Self {
            system: Arc::new(Mutex::new(system)),
            handle,
            options,
        }
    }

    pub(crate) fn link(&self) -> PoolLink {
        PoolLink::new(
            self.handle.clone(),
            self.system.clone(),
            self.options.version_resolver.clone(),
        )
    }

    /// Worker for one application version. The pool decides between an
    /// existing worker and a fresh one; callers never pick.
    pub async fn get_worker(
        &self,
        app: &AppName,
        version: &VersionTag,
    ) -> HostResult<WorkerHandle> {
        self.link().get_worker(app.clone(), version.clone()).await
    }

    pub async fn resolve_version(&self, app: &AppName) -> HostResult<VersionTag> {
        self.options.version_resolver.resolve_version(app).await
    }

    /// Starts one worker for every application directory found on disk,
    /// so the first request hits a warm pool. Failing to start any of
    /// them fails the whole preparation.
    pub async fn prepare(&self) -> HostResult<()> {
        let mut entries = tokio::fs::read_dir(&self.options.apps_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                warn!(
                    "skipping an app directory with a non-UTF-8 name: {:?}",
                    entry.file_name()
                );
                continue;
            };
            let app = AppName::from(name);
            let version = self.resolve_version(&app).await?;
            info!("preparing a worker for app ({app}) version ({version})");
            self.get_worker(&app, &version).await?;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> HostResult<PoolSnapshot> {
        let (sender, receiver) = oneshot::channel();
        self.handle
            .send(PoolEvent::Snapshot { result: sender })
            .await
            .map_err(|_| pool_stopped())?;
        receiver.await.map_err(|_| pool_stopped())
    }

    pub async fn worker_count(&self, app: &AppName, version: &VersionTag) -> HostResult<usize> {
        Ok(self.snapshot().await?.worker_count(app, version))
    }

    /// Terminates every worker and stops the pool. Resolves once every
    /// actor in the system has wound down.
    pub async fn close(&self) -> HostResult<()> {
        let _ = self.handle.send(PoolEvent::Shutdown).await;
        self.handle.clone().wait_for_stop().await;
        self.system.lock().await.join().await;
        Ok(())
    }
}

fn pool_stopped() -> HostError {
    HostError::internal("work pool has stopped")
}
