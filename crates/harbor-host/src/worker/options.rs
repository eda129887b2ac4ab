use std::sync::Arc;

use tokio::sync::mpsc;

use crate::app::{AppName, VersionTag};
use crate::id::WorkerId;
use crate::pool::PoolLink;
use crate::protocol::Envelope;
use crate::worker::WorkerShared;

pub(crate) struct WorkerOptions {
    pub id: WorkerId,
    pub app: AppName,
    pub version: VersionTag,
    pub shared: Arc<WorkerShared>,
    /// Envelopes from the host half into the execution context.
    pub outbox: mpsc::UnboundedSender<Envelope>,
    /// Envelopes from the execution context into the host half.
    pub inbox: mpsc::UnboundedReceiver<Envelope>,
    pub link: PoolLink,
}
