use std::fmt;
use std::sync::Arc;

use greeter_core::{EventKind, GreetingReply, SessionId, Tag};
use parking_lot::Mutex;

use crate::queue::EventQueues;
use crate::transport::Transport;

/// Connection status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Armed for the next accept, no peer yet.
    WaitConnect,
    Connected,
    /// Terminal.
    Closed,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WaitConnect => "wait_connect",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the dispatcher must do after a session handled an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The session just connected; arm a fresh slot for the next peer.
    SpawnNext,
    /// The session reached `Closed` and must leave the registry.
    Close,
}

/// Shared handle held by the registry and by every in-flight dispatch.
pub type SharedSession = Arc<Mutex<Session>>;

/// One stream's state machine.
///
/// Every method assumes the caller holds the session's lock. None of them
/// block: they record state and arm the next transport operation.
pub struct Session {
    id: SessionId,
    status: SessionStatus,
    write_in_flight: bool,
    peer_name: Option<String>,
    requests_received: u64,
    replies_sent: u64,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub fn new(id: SessionId, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            status: SessionStatus::WaitConnect,
            write_in_flight: false,
            peer_name: None,
            requests_received: 0,
            replies_sent: 0,
            transport,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    pub fn requests_received(&self) -> u64 {
        self.requests_received
    }

    pub fn replies_sent(&self) -> u64 {
        self.replies_sent
    }

    pub fn has_write_in_flight(&self) -> bool {
        self.write_in_flight
    }

    fn tag(&self, kind: EventKind) -> Tag {
        Tag::encode(self.id, kind)
    }

    /// Ask the transport for the next incoming connection.
    pub fn arm(&self, queues: &EventQueues) {
        self.transport.request_stream(
            self.id,
            self.tag(EventKind::Connected),
            self.tag(EventKind::Finished),
            queues,
        );
    }

    /// React to one successful completion.
    pub fn process(&mut self, event: EventKind) -> Step {
        if self.status == SessionStatus::Closed {
            tracing::debug!(session_id = %self.id, event = %event, "event on closed session");
            return Step::Continue;
        }
        match event {
            EventKind::Connected => {
                if self.status != SessionStatus::WaitConnect {
                    tracing::warn!(
                        session_id = %self.id,
                        status = %self.status,
                        "duplicate connect event"
                    );
                    return Step::Continue;
                }
                self.status = SessionStatus::Connected;
                tracing::debug!(session_id = %self.id, "session connected");
                self.transport.read(self.id, self.tag(EventKind::ReadDone));
                Step::SpawnNext
            }
            EventKind::ReadDone => {
                if let Some(request) = self.transport.take_request(self.id) {
                    tracing::debug!(
                        session_id = %self.id,
                        name = %request.name,
                        "request received"
                    );
                    self.requests_received += 1;
                    self.peer_name = Some(request.name);
                }
                self.transport.read(self.id, self.tag(EventKind::ReadDone));
                Step::Continue
            }
            EventKind::WriteDone => {
                self.write_in_flight = false;
                Step::Continue
            }
            EventKind::Finished => {
                self.mark_closed();
                Step::Close
            }
        }
    }

    /// Push one greeting. Returns whether a write was armed.
    ///
    /// No-op unless connected with no write outstanding.
    pub fn reply(&mut self, greeting: &str) -> bool {
        if self.status != SessionStatus::Connected || self.write_in_flight {
            return false;
        }
        self.replies_sent += 1;
        let reply = GreetingReply::compose(greeting, self.peer_name.as_deref(), self.replies_sent);
        self.write_in_flight = true;
        self.transport
            .write(self.id, reply, self.tag(EventKind::WriteDone));
        true
    }

    /// Ask the transport to abort this stream. Only connected sessions are
    /// ever cancelled; an unconnected slot has no stream behind it.
    pub fn try_cancel(&self) -> bool {
        match self.status {
            SessionStatus::Connected => {
                self.transport.try_cancel(self.id);
                true
            }
            SessionStatus::WaitConnect | SessionStatus::Closed => false,
        }
    }

    pub fn mark_closed(&mut self) {
        self.status = SessionStatus::Closed;
        self.write_in_flight = false;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("write_in_flight", &self.write_in_flight)
            .field("peer_name", &self.peer_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, TransportOp};
    use greeter_core::GreetingRequest;

    fn setup() -> (Arc<MemoryTransport>, EventQueues, Session) {
        let transport = Arc::new(MemoryTransport::new());
        let queues = EventQueues::new();
        let session = Session::new(SessionId::new(1), transport.clone());
        session.arm(&queues);
        (transport, queues, session)
    }

    #[test]
    fn starts_waiting_and_arms_accept() {
        let (transport, _queues, session) = setup();
        assert_eq!(session.status(), SessionStatus::WaitConnect);
        assert_eq!(transport.ops(), vec![TransportOp::RequestStream(SessionId::new(1))]);
    }

    #[test]
    fn connect_starts_reading_and_asks_for_next_slot() {
        let (transport, _queues, mut session) = setup();
        transport.connect(session.id());
        assert_eq!(session.process(EventKind::Connected), Step::SpawnNext);
        assert_eq!(session.status(), SessionStatus::Connected);
        assert!(transport.has_pending_read(session.id()));
    }

    #[test]
    fn duplicate_connect_is_ignored() {
        let (transport, _queues, mut session) = setup();
        transport.connect(session.id());
        session.process(EventKind::Connected);
        assert_eq!(session.process(EventKind::Connected), Step::Continue);
    }

    #[test]
    fn read_done_stores_name_and_rearms() {
        let (transport, _queues, mut session) = setup();
        let id = session.id();
        transport.connect(id);
        session.process(EventKind::Connected);
        transport.deliver(id, GreetingRequest { name: "grace".into() });

        assert_eq!(session.process(EventKind::ReadDone), Step::Continue);
        assert_eq!(session.peer_name(), Some("grace"));
        assert_eq!(session.requests_received(), 1);
        assert!(transport.has_pending_read(id));
    }

    #[test]
    fn reply_requires_connection() {
        let (transport, _queues, mut session) = setup();
        assert!(!session.reply("hello"));
        assert!(transport.writes(session.id()).is_empty());
    }

    #[test]
    fn one_write_in_flight_at_a_time() {
        let (transport, _queues, mut session) = setup();
        let id = session.id();
        transport.connect(id);
        session.process(EventKind::Connected);

        assert!(session.reply("hello"));
        assert!(!session.reply("hello"));
        assert_eq!(transport.writes(id).len(), 1);

        session.process(EventKind::WriteDone);
        assert!(session.reply("hello"));
        let writes = transport.writes(id);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].sequence, 2);
        assert_eq!(session.replies_sent(), 2);
    }

    #[test]
    fn reply_uses_received_name() {
        let (transport, _queues, mut session) = setup();
        let id = session.id();
        transport.connect(id);
        session.process(EventKind::Connected);
        transport.deliver(id, GreetingRequest { name: "lin".into() });
        session.process(EventKind::ReadDone);

        session.reply("hi");
        assert_eq!(transport.writes(id)[0].message, "hi, lin");
    }

    #[test]
    fn finished_closes() {
        let (transport, _queues, mut session) = setup();
        transport.connect(session.id());
        session.process(EventKind::Connected);
        assert_eq!(session.process(EventKind::Finished), Step::Close);
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(!session.reply("hello"));
        assert_eq!(session.process(EventKind::ReadDone), Step::Continue);
    }

    #[test]
    fn cancel_only_reaches_connected_sessions() {
        let (transport, _queues, mut session) = setup();
        assert!(!session.try_cancel());
        assert!(transport.cancelled().is_empty());

        transport.connect(session.id());
        session.process(EventKind::Connected);
        assert!(session.try_cancel());
        assert_eq!(transport.cancelled(), vec![session.id()]);

        session.mark_closed();
        assert!(!session.try_cancel());
        assert_eq!(transport.cancelled().len(), 1);
    }
}
