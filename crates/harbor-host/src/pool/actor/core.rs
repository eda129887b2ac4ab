use std::collections::HashMap;

use async_trait::async_trait;
use harbor_actor::actor::{Actor, ActorAction, ActorContext};
use log::debug;

use crate::error::HostError;
use crate::id::WorkerIdGenerator;
use crate::pool::actor::{PoolActor, VersionEntry};
use crate::pool::event::PoolEvent;
use crate::pool::options::PoolOptions;

#[async_trait]
impl Actor for PoolActor {
    type Message = PoolEvent;
    type Options = PoolOptions;

    fn name() -> &'static str {
        "PoolActor"
    }

    fn new(options: PoolOptions) -> Self {
        Self {
            options,
            pool: HashMap::new(),
            worker_ids: WorkerIdGenerator::new(),
        }
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: PoolEvent) -> ActorAction {
        match message {
            PoolEvent::AcquireWorker {
                app,
                version,
                system,
                result,
            } => self.handle_acquire_worker(ctx, app, version, system, result),
            PoolEvent::WorkerInitialized {
                app,
                version,
                system,
                result,
            } => self.handle_worker_initialized(ctx, app, version, system, result),
            PoolEvent::ProbeRecyclableWorker {
                app,
                version,
                worker_id,
            } => self.handle_probe_recyclable_worker(ctx, app, version, worker_id),
            PoolEvent::Snapshot { result } => self.handle_snapshot(result),
            PoolEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(self, _ctx: &mut ActorContext<Self>) {
        for (app, versions) in self.pool {
            for (version, entry) in versions {
                match entry {
                    VersionEntry::Creating { waiters } => {
                        for waiter in waiters {
                            let _ = waiter.send(Err(HostError::internal("work pool has stopped")));
                        }
                    }
                    VersionEntry::Ready(state) => {
                        for waiter in state.grow_waiters {
                            let _ = waiter.send(Err(HostError::internal("work pool has stopped")));
                        }
                        for worker in state.set.into_workers() {
                            debug!(
                                "terminating worker {} for app ({app}) version ({version})",
                                worker.id()
                            );
                            worker.terminate().await;
                        }
                    }
                }
            }
        }
    }
}
