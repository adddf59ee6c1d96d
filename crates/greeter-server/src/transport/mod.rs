//! Boundary to the byte-moving layer.
//!
//! A transport never calls back into sessions. Every operation it is asked to
//! arm finishes by posting exactly one tag to an event source; the dispatch
//! loops take it from there. Reads and writes armed on a stream that has
//! already finished complete at once with `ok = false`.

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use greeter_core::{GreetingReply, GreetingRequest, SessionId, Tag};

use crate::queue::EventQueues;

pub use memory::{MemoryTransport, TransportOp};
pub use tcp::TcpTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Arm one pending accept for `session`.
    ///
    /// When a peer connects, `connected` is posted on the notification queue
    /// with `ok = true`. Once the stream later ends (peer hang-up, I/O error,
    /// cancellation), `finished` is posted there exactly once. A slot still
    /// waiting at shutdown gets `connected` with `ok = false` instead.
    /// Reads and writes of the stream complete on the call queue.
    fn request_stream(
        &self,
        session: SessionId,
        connected: Tag,
        finished: Tag,
        queues: &EventQueues,
    );

    /// Arm one read on a connected stream.
    fn read(&self, session: SessionId, tag: Tag);

    /// The message delivered by the last successful read, if not yet taken.
    fn take_request(&self, session: SessionId) -> Option<GreetingRequest>;

    /// Arm one write on a connected stream.
    fn write(&self, session: SessionId, reply: GreetingReply, tag: Tag);

    /// Best-effort abort of a connected stream's pending operations.
    ///
    /// Must only be called for sessions that have seen their `connected`
    /// event: cancelling a slot that was never wired to a connection is a
    /// contract violation on some transports.
    fn try_cancel(&self, session: SessionId);

    /// Stop accepting, fail every in-flight operation through the event
    /// sources and wait until all of those completions are posted.
    async fn shutdown(&self);
}
