use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::app::{AppConfig, AppName, HandlerManifest, VersionTag};
use crate::error::HostResult;
use crate::id::WorkerIdGenerator;
use crate::pool::options::PoolOptions;
use crate::pool::set::WorkerSet;
use crate::route::RouteTable;
use crate::worker::WorkerHandle;

mod core;
mod handler;

type Waiter = oneshot::Sender<HostResult<WorkerHandle>>;

/// Owns every worker pool in the host. All bookkeeping happens inside
/// `receive`, so a lookup and the registration that follows from it can
/// never interleave with another request.
pub(crate) struct PoolActor {
    options: PoolOptions,
    pool: HashMap<AppName, HashMap<VersionTag, VersionEntry>>,
    worker_ids: WorkerIdGenerator,
}

enum VersionEntry {
    /// First worker still initializing; acquires queue here until the
    /// launch resolves.
    Creating { waiters: Vec<Waiter> },
    Ready(VersionState),
}

struct VersionState {
    config: AppConfig,
    manifest: Arc<HandlerManifest>,
    routes: Arc<RouteTable>,
    set: WorkerSet,
    /// At most one grow per entry is in flight; waiters queued behind it
    /// re-run the size check one at a time when it lands.
    growing: bool,
    grow_waiters: VecDeque<Waiter>,
}
