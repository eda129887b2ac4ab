use std::sync::Arc;

use tokio::sync::oneshot;

use crate::app::HandlerManifest;
use crate::error::HostResult;
use crate::id::ExecuteId;
use crate::protocol::Envelope;
use crate::worker::{ExecuteCall, Outcome};

pub(crate) enum WorkerEvent {
    /// Dispatches one call into the execution context.
    Execute {
        call: ExecuteCall,
        result: oneshot::Sender<HostResult<Outcome>>,
    },
    /// Resolves once the worker handshake has finished, either way.
    AwaitReady {
        result: oneshot::Sender<HostResult<Arc<HandlerManifest>>>,
    },
    /// Asks the live execution context for its handler declarations.
    FetchManifest {
        result: oneshot::Sender<HostResult<HandlerManifest>>,
    },
    /// An envelope produced by the execution context.
    FromRuntime(Envelope),
    /// The execution context has exited; orderly or not.
    RuntimeGone,
    /// The per-call timer for `execute_id` has elapsed.
    CallExpired { execute_id: ExecuteId },
    /// Begins an orderly worker shutdown.
    Shutdown,
}
