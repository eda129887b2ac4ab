use std::collections::hash_map::Entry;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use harbor_actor::actor::{ActorAction, ActorContext, ActorSystem};
use log::{info, warn};
use tokio::sync::{oneshot, Mutex};

use crate::app::{AppConfig, AppName, VersionTag};
use crate::error::{HostError, HostResult};
use crate::id::WorkerId;
use crate::pool::actor::{PoolActor, VersionEntry, VersionState, Waiter};
use crate::pool::event::{InitializedWorker, PoolEvent};
use crate::pool::options::PoolOptions;
use crate::pool::set::WorkerSet;
use crate::pool::{PoolLink, PoolSnapshot};
use crate::route::RouteTable;
use crate::sandbox::AppDescriptor;
use crate::worker;

/// Probes fire a hair past the window so a worker idle for exactly the
/// window is already seen as recyclable.
const RECYCLE_PROBE_SLACK: Duration = Duration::from_millis(1);

impl PoolActor {
    pub(super) fn handle_acquire_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        app: AppName,
        version: VersionTag,
        system: Arc<Mutex<ActorSystem>>,
        result: Waiter,
    ) -> ActorAction {
        if app.is_empty() {
            let _ = result.send(Err(HostError::invalid("application name must not be empty")));
            return ActorAction::Continue;
        }
        enum Spawn {
            No,
            Create,
            Grow(AppConfig),
        }
        let spawn = {
            let versions = self.pool.entry(app.clone()).or_default();
            match versions.entry(version.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(VersionEntry::Creating {
                        waiters: vec![result],
                    });
                    Spawn::Create
                }
                Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    VersionEntry::Creating { waiters } => {
                        waiters.push(result);
                        Spawn::No
                    }
                    VersionEntry::Ready(state) => {
                        if state.set.has_capacity() {
                            // Every acquire below capacity grows the pool;
                            // the waiter is answered once the grow lands.
                            state.grow_waiters.push_back(result);
                            if state.growing {
                                Spawn::No
                            } else {
                                state.growing = true;
                                Spawn::Grow(state.config.clone())
                            }
                        } else {
                            Self::reply_with_next(state, result);
                            Spawn::No
                        }
                    }
                },
            }
        };
        match spawn {
            Spawn::No => {}
            Spawn::Create => self.spawn_launch(ctx, app, version, system, None),
            Spawn::Grow(config) => self.spawn_launch(ctx, app, version, system, Some(config)),
        }
        ActorAction::Continue
    }

    pub(super) fn handle_worker_initialized(
        &mut self,
        ctx: &mut ActorContext<Self>,
        app: AppName,
        version: VersionTag,
        system: Arc<Mutex<ActorSystem>>,
        result: HostResult<InitializedWorker>,
    ) -> ActorAction {
        let Some(entry) = self.pool.get_mut(&app).and_then(|x| x.get_mut(&version)) else {
            return Self::discard_orphan(ctx, &app, &version, result);
        };
        match entry {
            VersionEntry::Creating { waiters } => {
                let waiters = mem::take(waiters);
                match result {
                    Ok(initialized) => {
                        let InitializedWorker {
                            worker,
                            manifest,
                            config,
                        } = initialized;
                        let routes = match RouteTable::build(&manifest) {
                            Ok(x) => Arc::new(x),
                            Err(e) => {
                                self.remove_version_entry(&app, &version);
                                let error = HostError::InitError(format!(
                                    "app ({app}) declared invalid routes: {e}"
                                ));
                                warn!("{error}");
                                for waiter in waiters {
                                    let _ = waiter.send(Err(error.clone()));
                                }
                                ctx.spawn(async move { worker.terminate().await });
                                return ActorAction::Continue;
                            }
                        };
                        worker.attach(routes.clone(), manifest.clone());
                        let mut set = WorkerSet::new(config.max_workers);
                        let window = config.recycle_window;
                        set.add(worker.clone());
                        Self::schedule_recycle_probe(
                            ctx,
                            app.clone(),
                            version.clone(),
                            worker.id(),
                            window,
                        );
                        info!(
                            "created the worker pool for app ({app}) version ({version}) with capacity {}",
                            set.max_size()
                        );
                        let mut state = VersionState {
                            config,
                            manifest,
                            routes,
                            set,
                            growing: false,
                            grow_waiters: VecDeque::new(),
                        };
                        let mut waiters = waiters.into_iter();
                        if let Some(first) = waiters.next() {
                            Self::reply_with_next(&mut state, first);
                        }
                        // Everyone else re-runs the size check in order.
                        state.grow_waiters.extend(waiters);
                        *entry = VersionEntry::Ready(state);
                        self.pump_acquires(ctx, app, version, system);
                    }
                    Err(e) => {
                        warn!("failed to start app ({app}) version ({version}): {e}");
                        self.remove_version_entry(&app, &version);
                        for waiter in waiters {
                            let _ = waiter.send(Err(e.clone()));
                        }
                    }
                }
            }
            VersionEntry::Ready(state) => {
                state.growing = false;
                match result {
                    Ok(initialized) => {
                        let worker = initialized.worker;
                        if state.set.has_capacity() {
                            worker.attach(state.routes.clone(), state.manifest.clone());
                            let window = state.config.recycle_window;
                            state.set.add(worker.clone());
                            Self::schedule_recycle_probe(
                                ctx,
                                app.clone(),
                                version.clone(),
                                worker.id(),
                                window,
                            );
                            info!(
                                "grew the app ({app}) version ({version}) pool to {} of {}",
                                state.set.len(),
                                state.set.max_size()
                            );
                        } else {
                            warn!(
                                "discarding surplus worker {} for app ({app}) version ({version})",
                                worker.id()
                            );
                            ctx.spawn(async move { worker.terminate().await });
                        }
                        if let Some(waiter) = state.grow_waiters.pop_front() {
                            Self::reply_with_next(state, waiter);
                        }
                    }
                    Err(e) => {
                        warn!("failed to grow the app ({app}) version ({version}) pool: {e}");
                        if let Some(waiter) = state.grow_waiters.pop_front() {
                            let _ = waiter.send(Err(e));
                        }
                    }
                }
                self.pump_acquires(ctx, app, version, system);
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_probe_recyclable_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        app: AppName,
        version: VersionTag,
        worker_id: WorkerId,
    ) -> ActorAction {
        let Some(VersionEntry::Ready(state)) =
            self.pool.get_mut(&app).and_then(|x| x.get_mut(&version))
        else {
            return ActorAction::Continue;
        };
        let Some(worker) = state.set.get(worker_id) else {
            return ActorAction::Continue;
        };
        if !worker.recyclable() {
            let window = state.config.recycle_window;
            Self::schedule_recycle_probe(ctx, app, version, worker_id, window);
            return ActorAction::Continue;
        }
        let crashed = worker.exited();
        let Some(worker) = state.set.remove(worker_id) else {
            return ActorAction::Continue;
        };
        if crashed {
            warn!("evicting crashed worker {worker_id} from app ({app}) version ({version})");
        } else {
            info!("recycling idle worker {worker_id} from app ({app}) version ({version})");
        }
        let empty = state.set.is_empty();
        let growing = state.growing;
        ctx.spawn(async move { worker.terminate().await });
        // An empty entry survives while a grow is in flight; the incoming
        // worker lands in it.
        if empty && !growing {
            self.remove_version_entry(&app, &version);
            info!("removed the empty worker pool for app ({app}) version ({version})");
        }
        ActorAction::Continue
    }

    pub(super) fn handle_snapshot(&mut self, result: oneshot::Sender<PoolSnapshot>) -> ActorAction {
        let mut snapshot = PoolSnapshot::default();
        for (app, versions) in &self.pool {
            for (version, entry) in versions {
                let count = match entry {
                    VersionEntry::Creating { .. } => 0,
                    VersionEntry::Ready(state) => state.set.len(),
                };
                snapshot
                    .apps
                    .entry(app.clone())
                    .or_default()
                    .insert(version.clone(), count);
            }
        }
        let _ = result.send(snapshot);
        ActorAction::Continue
    }

    /// Answers queued waiters in order, starting a new grow if one of
    /// them still sees spare capacity.
    fn pump_acquires(
        &mut self,
        ctx: &mut ActorContext<Self>,
        app: AppName,
        version: VersionTag,
        system: Arc<Mutex<ActorSystem>>,
    ) {
        let grow_config = {
            let Some(VersionEntry::Ready(state)) =
                self.pool.get_mut(&app).and_then(|x| x.get_mut(&version))
            else {
                return;
            };
            if state.growing {
                return;
            }
            let mut grow = None;
            while let Some(waiter) = state.grow_waiters.pop_front() {
                if state.set.has_capacity() {
                    state.growing = true;
                    state.grow_waiters.push_front(waiter);
                    grow = Some(state.config.clone());
                    break;
                }
                Self::reply_with_next(state, waiter);
            }
            grow
        };
        if let Some(config) = grow_config {
            self.spawn_launch(ctx, app, version, system, Some(config));
        }
    }

    fn spawn_launch(
        &mut self,
        ctx: &mut ActorContext<Self>,
        app: AppName,
        version: VersionTag,
        system: Arc<Mutex<ActorSystem>>,
        config: Option<AppConfig>,
    ) {
        let worker_id = match self.worker_ids.next() {
            Ok(x) => x,
            Err(e) => {
                ctx.send(PoolEvent::WorkerInitialized {
                    app,
                    version,
                    system,
                    result: Err(e),
                });
                return;
            }
        };
        let options = self.options.clone();
        let link = PoolLink::new(
            ctx.handle().clone(),
            system.clone(),
            options.version_resolver.clone(),
        );
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let result = launch_worker(
                options,
                link,
                system.clone(),
                worker_id,
                app.clone(),
                version.clone(),
                config,
            )
            .await;
            let event = PoolEvent::WorkerInitialized {
                app,
                version,
                system,
                result,
            };
            if let Err(error) = handle.send(event).await {
                // The pool stopped while the launch was in flight; the
                // fresh worker would otherwise leak.
                if let PoolEvent::WorkerInitialized {
                    result: Ok(initialized),
                    ..
                } = error.0
                {
                    initialized.worker.terminate().await;
                }
            }
        });
    }

    fn reply_with_next(state: &mut VersionState, waiter: Waiter) {
        match state.set.next() {
            Some(worker) => {
                let _ = waiter.send(Ok(worker));
            }
            None => {
                let _ = waiter.send(Err(HostError::internal("worker set is unexpectedly empty")));
            }
        }
    }

    fn schedule_recycle_probe(
        ctx: &mut ActorContext<PoolActor>,
        app: AppName,
        version: VersionTag,
        worker_id: WorkerId,
        window: Duration,
    ) {
        ctx.send_with_delay(
            PoolEvent::ProbeRecyclableWorker {
                app,
                version,
                worker_id,
            },
            window + RECYCLE_PROBE_SLACK,
        );
    }

    fn discard_orphan(
        ctx: &mut ActorContext<PoolActor>,
        app: &AppName,
        version: &VersionTag,
        result: HostResult<InitializedWorker>,
    ) -> ActorAction {
        if let Ok(initialized) = result {
            warn!(
                "discarding worker {} for app ({app}) version ({version}) with no pool entry",
                initialized.worker.id()
            );
            ctx.spawn(async move { initialized.worker.terminate().await });
        }
        ActorAction::Continue
    }

    fn remove_version_entry(&mut self, app: &AppName, version: &VersionTag) {
        if let Some(versions) = self.pool.get_mut(app) {
            versions.remove(version);
            if versions.is_empty() {
                self.pool.remove(app);
            }
        }
    }
}

async fn launch_worker(
    options: PoolOptions,
    link: PoolLink,
    system: Arc<Mutex<ActorSystem>>,
    worker_id: WorkerId,
    app: AppName,
    version: VersionTag,
    config: Option<AppConfig>,
) -> HostResult<InitializedWorker> {
    let app_dir = options.apps_dir.join(app.as_str());
    if tokio::fs::metadata(&app_dir).await.is_err() {
        return Err(HostError::UnknownApp { app });
    }
    let config = match config {
        Some(x) => x,
        None => options.config_provider.config(&app).await?,
    };
    let entry_dir = if version.is_default() {
        app_dir
    } else {
        app_dir.join(version.as_str())
    };
    let descriptor = AppDescriptor::new(app.clone(), version.clone(), entry_dir, &config);
    info!("starting worker {worker_id} for app ({app}) version ({version})");
    let (worker, manifest) = worker::launch(
        &system,
        link,
        options.sandbox.clone(),
        worker_id,
        descriptor,
        &config,
    )
    .await?;
    Ok(InitializedWorker {
        worker,
        manifest,
        config,
    })
}
