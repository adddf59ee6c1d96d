//! Newline-delimited JSON over TCP.
//!
//! Each inbound line is one `GreetingRequest`, each outbound line one
//! `GreetingReply`. End of input, I/O errors and malformed lines all end the
//! stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use greeter_core::{GreetingReply, GreetingRequest, ServerError, SessionId, Tag};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::Transport;
use crate::queue::EventQueues;

const MAX_LINE_LENGTH: usize = 64 * 1024;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// An armed accept waiting for the next peer.
struct PendingAccept {
    session: SessionId,
    connected: Tag,
    finished: Tag,
    queues: EventQueues,
}

/// A connected peer bound to one session.
struct Stream {
    session: SessionId,
    peer: SocketAddr,
    finished: Tag,
    queues: EventQueues,
    reader: tokio::sync::Mutex<FramedRead<OwnedReadHalf, LinesCodec>>,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    inbound: Mutex<Option<GreetingRequest>>,
    cancel: CancellationToken,
    done: AtomicBool,
}

struct Inner {
    streams: DashMap<SessionId, Arc<Stream>>,
    /// Event sources seen at `request_stream`, kept so operations armed on a
    /// finished stream can still fail through them.
    queues: Mutex<Option<EventQueues>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Inner {
    fn stream(&self, session: SessionId) -> Option<Arc<Stream>> {
        self.streams.get(&session).map(|entry| Arc::clone(entry.value()))
    }

    /// Complete an operation whose stream is already gone.
    fn fail_detached(&self, session: SessionId, tag: Tag) {
        debug!(session_id = %session, tag = %tag, "operation armed on a finished stream");
        if let Some(queues) = self.queues.lock().as_ref() {
            queues.call.post(tag, false);
        }
    }

    fn open(&self, slot: PendingAccept, socket: TcpStream, peer: SocketAddr) {
        if let Err(e) = socket.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "set_nodelay failed");
        }
        let (read_half, write_half) = socket.into_split();
        let stream = Arc::new(Stream {
            session: slot.session,
            peer,
            finished: slot.finished,
            queues: slot.queues,
            reader: tokio::sync::Mutex::new(FramedRead::new(
                read_half,
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            )),
            writer: tokio::sync::Mutex::new(FramedWrite::new(write_half, LinesCodec::new())),
            inbound: Mutex::new(None),
            cancel: self.shutdown.child_token(),
            done: AtomicBool::new(false),
        });
        self.streams.insert(slot.session, Arc::clone(&stream));
        info!(session_id = %slot.session, peer = %peer, "peer connected");
        stream.queues.notification.post(slot.connected, true);
    }

    /// End the stream once: abort its pending operations and post `finished`.
    fn finish(&self, stream: &Stream) {
        if stream.done.swap(true, Ordering::AcqRel) {
            return;
        }
        stream.cancel.cancel();
        self.streams.remove(&stream.session);
        debug!(session_id = %stream.session, peer = %stream.peer, "stream finished");
        stream.queues.notification.post(stream.finished, true);
    }
}

/// TCP listener plus the streams it has handed to sessions.
pub struct TcpTransport {
    local_addr: SocketAddr,
    accepts: mpsc::UnboundedSender<PendingAccept>,
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Bind `addr` and start accepting as soon as a slot is armed.
    pub async fn bind(addr: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let inner = Arc::new(Inner {
            streams: DashMap::new(),
            queues: Mutex::new(None),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });
        let (accepts, slots) = mpsc::unbounded_channel();
        inner
            .tracker
            .spawn(accept_loop(Arc::clone(&inner), listener, slots));

        info!(addr = %local_addr, "transport listening");
        Ok(Self {
            local_addr,
            accepts,
            inner,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of peers currently bound to sessions.
    pub fn connection_count(&self) -> usize {
        self.inner.streams.len()
    }
}

/// Pairs each armed slot with the next incoming connection.
async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    mut slots: mpsc::UnboundedReceiver<PendingAccept>,
) {
    'slots: loop {
        let slot = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            slot = slots.recv() => match slot {
                Some(slot) => slot,
                None => break,
            },
        };

        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {
                    slot.queues.notification.post(slot.connected, false);
                    break 'slots;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        inner.open(slot, socket, peer);
                        continue 'slots;
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }
    }

    // Slots armed after shutdown never see a peer.
    slots.close();
    while let Ok(slot) = slots.try_recv() {
        slot.queues.notification.post(slot.connected, false);
    }
    debug!("accept loop exited");
}

#[async_trait]
impl Transport for TcpTransport {
    fn request_stream(
        &self,
        session: SessionId,
        connected: Tag,
        finished: Tag,
        queues: &EventQueues,
    ) {
        self.inner
            .queues
            .lock()
            .get_or_insert_with(|| queues.clone());
        let slot = PendingAccept {
            session,
            connected,
            finished,
            queues: queues.clone(),
        };
        if let Err(mpsc::error::SendError(slot)) = self.accepts.send(slot) {
            slot.queues.notification.post(slot.connected, false);
        }
    }

    fn read(&self, session: SessionId, tag: Tag) {
        let Some(stream) = self.inner.stream(session) else {
            self.inner.fail_detached(session, tag);
            return;
        };
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let line = {
                let mut reader = stream.reader.lock().await;
                tokio::select! {
                    _ = stream.cancel.cancelled() => None,
                    line = reader.next() => line,
                }
            };
            let ok = match line {
                Some(Ok(line)) => match serde_json::from_str::<GreetingRequest>(&line) {
                    Ok(request) => {
                        *stream.inbound.lock() = Some(request);
                        true
                    }
                    Err(e) => {
                        debug!(session_id = %stream.session, error = %e, "malformed request line");
                        false
                    }
                },
                Some(Err(e)) => {
                    debug!(session_id = %stream.session, error = %e, "read failed");
                    false
                }
                None => false,
            };
            stream.queues.call.post(tag, ok);
            if !ok {
                inner.finish(&stream);
            }
        });
    }

    fn take_request(&self, session: SessionId) -> Option<GreetingRequest> {
        self.inner
            .streams
            .get(&session)
            .and_then(|stream| stream.inbound.lock().take())
    }

    fn write(&self, session: SessionId, reply: GreetingReply, tag: Tag) {
        let Some(stream) = self.inner.stream(session) else {
            self.inner.fail_detached(session, tag);
            return;
        };
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let ok = match serde_json::to_string(&reply) {
                Ok(line) => {
                    let mut writer = stream.writer.lock().await;
                    tokio::select! {
                        _ = stream.cancel.cancelled() => false,
                        sent = writer.send(line) => match sent {
                            Ok(()) => true,
                            Err(e) => {
                                debug!(session_id = %stream.session, error = %e, "write failed");
                                false
                            }
                        },
                    }
                }
                Err(e) => {
                    warn!(session_id = %stream.session, error = %e, "failed to serialize reply");
                    false
                }
            };
            stream.queues.call.post(tag, ok);
            if !ok {
                inner.finish(&stream);
            }
        });
    }

    fn try_cancel(&self, session: SessionId) {
        if let Some(stream) = self.inner.stream(session) {
            info!(session_id = %session, peer = %stream.peer, "cancelling stream");
            self.inner.finish(&stream);
        }
    }

    async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        // Idle streams have no task to notice the cancellation.
        let remaining: Vec<Arc<Stream>> = self
            .inner
            .streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for stream in remaining {
            self.inner.finish(&stream);
        }
        info!(addr = %self.local_addr, "transport shut down");
    }
}
