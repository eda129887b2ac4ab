use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::app::{AppName, CallInfo, HandlerManifest, VersionTag};
use crate::error::{ErrorDescription, HostResult};
use crate::id::{ExecuteId, WorkerId};
use crate::pool::PoolLink;
use crate::protocol::Envelope;
use crate::stream::CallStreamSink;
use crate::worker::{Outcome, WorkerShared};

mod core;
mod handler;

/// Host half of one worker. Owns the call registry and the handshake
/// state; the execution context lives behind a pair of envelope channels.
pub(crate) struct WorkerActor {
    id: WorkerId,
    app: AppName,
    version: VersionTag,
    shared: Arc<WorkerShared>,
    /// `None` once an orderly shutdown has begun; closing the channel is
    /// the shutdown signal the execution context observes.
    outbox: Option<mpsc::UnboundedSender<Envelope>>,
    inbox: Option<mpsc::UnboundedReceiver<Envelope>>,
    link: PoolLink,
    handshake: Handshake,
    pending: HashMap<ExecuteId, PendingCall>,
    manifest_waiters: VecDeque<oneshot::Sender<HostResult<HandlerManifest>>>,
    terminating: bool,
}

enum Handshake {
    Awaiting {
        waiters: Vec<oneshot::Sender<HostResult<Arc<HandlerManifest>>>>,
    },
    Ready(Arc<HandlerManifest>),
    Failed(ErrorDescription),
}

/// One in-flight call. `reply` resolves the caller; for chunked results
/// it is consumed by the first chunk and `sink` carries the rest. The
/// timer is cancelled when the call reaches a terminal state.
struct PendingCall {
    info: CallInfo,
    reply: Option<oneshot::Sender<HostResult<Outcome>>>,
    sink: Option<CallStreamSink>,
    timer: JoinHandle<()>,
}
