//! In-process transport driven by hand. Used by tests to script connects,
//! inbound messages and hang-ups, and to inspect what the server asked for.

use std::collections::HashMap;

use async_trait::async_trait;
use greeter_core::{GreetingReply, GreetingRequest, SessionId, Tag};
use parking_lot::Mutex;

use super::Transport;
use crate::queue::EventQueues;

/// Everything the server asked the transport to do, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportOp {
    RequestStream(SessionId),
    Read(SessionId),
    Write(SessionId, GreetingReply),
    Cancel(SessionId),
    /// `queues_open` records whether both event sources were still accepting
    /// completions when shutdown was requested.
    Shutdown { queues_open: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Waiting,
    Open,
    Closed,
}

struct Slot {
    connected: Tag,
    finished: Tag,
    queues: EventQueues,
    state: SlotState,
    pending_read: Option<Tag>,
    pending_write: Option<Tag>,
    inbound: Option<GreetingRequest>,
}

impl Slot {
    /// Fail pending operations and announce the end of the stream.
    fn close(&mut self) {
        if let Some(tag) = self.pending_read.take() {
            self.queues.call.post(tag, false);
        }
        if let Some(tag) = self.pending_write.take() {
            self.queues.call.post(tag, false);
        }
        self.queues.notification.post(self.finished, true);
        self.state = SlotState::Closed;
    }
}

#[derive(Default)]
struct MemoryState {
    ops: Vec<TransportOp>,
    slots: HashMap<SessionId, Slot>,
    queues: Option<EventQueues>,
    shut_down: bool,
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete the pending accept of `session`.
    pub fn connect(&self, session: SessionId) -> bool {
        let mut state = self.state.lock();
        match state.slots.get_mut(&session) {
            Some(slot) if slot.state == SlotState::Waiting => {
                slot.state = SlotState::Open;
                slot.queues.notification.post(slot.connected, true)
            }
            _ => false,
        }
    }

    /// Complete the pending read of `session` with `request`.
    pub fn deliver(&self, session: SessionId, request: GreetingRequest) -> bool {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(&session) else {
            return false;
        };
        if slot.state != SlotState::Open {
            return false;
        }
        match slot.pending_read.take() {
            Some(tag) => {
                slot.inbound = Some(request);
                slot.queues.call.post(tag, true)
            }
            None => false,
        }
    }

    /// Complete the pending write of `session` successfully.
    pub fn complete_write(&self, session: SessionId) -> bool {
        let mut state = self.state.lock();
        match state.slots.get_mut(&session) {
            Some(slot) if slot.state == SlotState::Open => match slot.pending_write.take() {
                Some(tag) => slot.queues.call.post(tag, true),
                None => false,
            },
            _ => false,
        }
    }

    /// Simulate the peer going away.
    pub fn hang_up(&self, session: SessionId) -> bool {
        let mut state = self.state.lock();
        match state.slots.get_mut(&session) {
            Some(slot) if slot.state == SlotState::Open => {
                slot.close();
                true
            }
            _ => false,
        }
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.state.lock().ops.clone()
    }

    pub fn cancelled(&self) -> Vec<SessionId> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                TransportOp::Cancel(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self, session: SessionId) -> Vec<GreetingReply> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                TransportOp::Write(id, reply) if *id == session => Some(reply.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_pending_read(&self, session: SessionId) -> bool {
        self.state
            .lock()
            .slots
            .get(&session)
            .is_some_and(|s| s.pending_read.is_some())
    }

    pub fn has_pending_write(&self, session: SessionId) -> bool {
        self.state
            .lock()
            .slots
            .get(&session)
            .is_some_and(|s| s.pending_write.is_some())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn request_stream(
        &self,
        session: SessionId,
        connected: Tag,
        finished: Tag,
        queues: &EventQueues,
    ) {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::RequestStream(session));
        if state.queues.is_none() {
            state.queues = Some(queues.clone());
        }
        let mut slot = Slot {
            connected,
            finished,
            queues: queues.clone(),
            state: SlotState::Waiting,
            pending_read: None,
            pending_write: None,
            inbound: None,
        };
        if state.shut_down {
            slot.queues.notification.post(connected, false);
            slot.state = SlotState::Closed;
        }
        state.slots.insert(session, slot);
    }

    fn read(&self, session: SessionId, tag: Tag) {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Read(session));
        if let Some(slot) = state.slots.get_mut(&session) {
            match slot.state {
                SlotState::Open => slot.pending_read = Some(tag),
                SlotState::Waiting | SlotState::Closed => {
                    slot.queues.call.post(tag, false);
                }
            }
        }
    }

    fn take_request(&self, session: SessionId) -> Option<GreetingRequest> {
        self.state
            .lock()
            .slots
            .get_mut(&session)
            .and_then(|slot| slot.inbound.take())
    }

    fn write(&self, session: SessionId, reply: GreetingReply, tag: Tag) {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Write(session, reply));
        if let Some(slot) = state.slots.get_mut(&session) {
            match slot.state {
                SlotState::Open => slot.pending_write = Some(tag),
                SlotState::Waiting | SlotState::Closed => {
                    slot.queues.call.post(tag, false);
                }
            }
        }
    }

    fn try_cancel(&self, session: SessionId) {
        let mut state = self.state.lock();
        state.ops.push(TransportOp::Cancel(session));
        if let Some(slot) = state.slots.get_mut(&session) {
            match slot.state {
                SlotState::Open => slot.close(),
                SlotState::Waiting => {
                    tracing::error!(
                        session_id = %session,
                        "cancel requested on an unconnected stream"
                    );
                }
                SlotState::Closed => {}
            }
        }
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock();
        let queues_open = state
            .queues
            .as_ref()
            .map_or(true, |q| !q.call.is_shutdown() && !q.notification.is_shutdown());
        state.ops.push(TransportOp::Shutdown { queues_open });
        state.shut_down = true;
        for slot in state.slots.values_mut() {
            match slot.state {
                SlotState::Waiting => {
                    slot.queues.notification.post(slot.connected, false);
                    slot.state = SlotState::Closed;
                }
                SlotState::Open => slot.close(),
                SlotState::Closed => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greeter_core::EventKind;

    fn tags(id: u64) -> (SessionId, Tag, Tag) {
        let id = SessionId::new(id);
        (
            id,
            Tag::encode(id, EventKind::Connected),
            Tag::encode(id, EventKind::Finished),
        )
    }

    #[tokio::test]
    async fn connect_posts_on_notification_queue() {
        let transport = MemoryTransport::new();
        let queues = EventQueues::new();
        let (id, connected, finished) = tags(1);

        transport.request_stream(id, connected, finished, &queues);
        assert!(transport.connect(id));
        assert!(!transport.connect(id));

        let c = queues.notification.next().await.unwrap();
        assert_eq!(c.tag, connected);
        assert!(c.ok);
    }

    #[tokio::test]
    async fn deliver_completes_pending_read() {
        let transport = MemoryTransport::new();
        let queues = EventQueues::new();
        let (id, connected, finished) = tags(1);
        transport.request_stream(id, connected, finished, &queues);
        transport.connect(id);

        let read = Tag::encode(id, EventKind::ReadDone);
        assert!(!transport.deliver(id, GreetingRequest { name: "x".into() }));
        transport.read(id, read);
        assert!(transport.deliver(id, GreetingRequest { name: "x".into() }));

        let c = queues.call.next().await.unwrap();
        assert_eq!(c.tag, read);
        assert_eq!(transport.take_request(id).unwrap().name, "x");
        assert!(transport.take_request(id).is_none());
    }

    #[tokio::test]
    async fn hang_up_fails_pending_ops_and_finishes() {
        let transport = MemoryTransport::new();
        let queues = EventQueues::new();
        let (id, connected, finished) = tags(3);
        transport.request_stream(id, connected, finished, &queues);
        transport.connect(id);
        let _ = queues.notification.next().await;
        transport.read(id, Tag::encode(id, EventKind::ReadDone));

        assert!(transport.hang_up(id));
        let read = queues.call.next().await.unwrap();
        assert!(!read.ok);
        let done = queues.notification.next().await.unwrap();
        assert_eq!(done.tag, finished);
    }

    #[tokio::test]
    async fn shutdown_fails_waiting_slots() {
        let transport = MemoryTransport::new();
        let queues = EventQueues::new();
        let (id, connected, finished) = tags(2);
        transport.request_stream(id, connected, finished, &queues);

        transport.shutdown().await;
        let c = queues.notification.next().await.unwrap();
        assert_eq!(c.tag, connected);
        assert!(!c.ok);
        assert_eq!(
            transport.ops().last(),
            Some(&TransportOp::Shutdown { queues_open: true })
        );
    }
}
