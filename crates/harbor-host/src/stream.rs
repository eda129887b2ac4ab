use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::HostResult;

/// Consumer half of a chunked call result. Chunks arrive in production
/// order; the stream ends once the producer marks the response complete.
/// The channel is unbounded, so a slow consumer buffers rather than
/// slowing the producer down.
#[derive(Debug)]
pub struct CallStream {
    receiver: mpsc::UnboundedReceiver<HostResult<Bytes>>,
}

pub(crate) fn call_stream() -> (CallStreamSink, CallStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (CallStreamSink { sender }, CallStream { receiver })
}

impl CallStream {
    /// Next chunk, or `None` once the stream has completed.
    pub async fn next_chunk(&mut self) -> Option<HostResult<Bytes>> {
        self.receiver.recv().await
    }

    /// Applies `on_chunk` to every chunk and resolves once the terminal
    /// marker has been observed, or fails on the first chunk error.
    pub async fn drain(mut self, mut on_chunk: impl FnMut(Bytes)) -> HostResult<()> {
        while let Some(chunk) = self.receiver.recv().await {
            on_chunk(chunk?);
        }
        Ok(())
    }

    /// Concatenates all chunks into one buffer.
    pub async fn collect_bytes(self) -> HostResult<Bytes> {
        let mut buffer = BytesMut::new();
        self.drain(|chunk| buffer.extend_from_slice(&chunk)).await?;
        Ok(buffer.freeze())
    }
}

impl Stream for CallStream {
    type Item = HostResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CallStreamSink {
    sender: mpsc::UnboundedSender<HostResult<Bytes>>,
}

impl CallStreamSink {
    /// Writing to a consumer that has gone away is not an error.
    pub(crate) fn write(&self, chunk: HostResult<Bytes>) {
        let _ = self.sender.send(chunk);
    }

    /// Ends the stream. Dropping the sink has the same effect; this form
    /// marks the intent at the call site.
    pub(crate) fn complete(self) {}
}
