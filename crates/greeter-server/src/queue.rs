//! Completion queues: the event sources the dispatch loops pull from.

use std::fmt;
use std::sync::Arc;

use greeter_core::Tag;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One finished asynchronous operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub tag: Tag,
    /// `false` when the operation did not complete normally.
    pub ok: bool,
}

/// Which of the two event sources a completion came through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    /// Read and write completions of connected streams.
    Call,
    /// Accepts and stream-finished notifications.
    Notification,
}

impl QueueKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-producer, single-consumer queue of completions.
///
/// After [`shutdown`](Self::shutdown) new posts are refused, completions
/// already queued still drain, and then [`next`](Self::next) returns `None`.
pub struct CompletionQueue {
    kind: QueueKind,
    tx: Mutex<Option<mpsc::UnboundedSender<Completion>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Completion>>,
}

impl CompletionQueue {
    pub fn new(kind: QueueKind) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            kind,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Queue a completion. Returns `false` once the queue is shut down.
    pub fn post(&self, tag: Tag, ok: bool) -> bool {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => tx.send(Completion { tag, ok }).is_ok(),
            None => {
                tracing::debug!(
                    queue = %self.kind,
                    tag = %tag,
                    ok,
                    "completion dropped after shutdown"
                );
                false
            }
        }
    }

    /// Wait for the next completion. `None` means shut down and drained.
    pub async fn next(&self) -> Option<Completion> {
        self.rx.lock().await.recv().await
    }

    pub fn shutdown(&self) {
        if self.tx.lock().take().is_some() {
            tracing::info!(queue = %self.kind, "completion queue shut down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// The pair of event sources owned by the server.
#[derive(Clone)]
pub struct EventQueues {
    pub call: Arc<CompletionQueue>,
    pub notification: Arc<CompletionQueue>,
}

impl EventQueues {
    pub fn new() -> Self {
        Self {
            call: Arc::new(CompletionQueue::new(QueueKind::Call)),
            notification: Arc::new(CompletionQueue::new(QueueKind::Notification)),
        }
    }

    pub fn get(&self, kind: QueueKind) -> &Arc<CompletionQueue> {
        match kind {
            QueueKind::Call => &self.call,
            QueueKind::Notification => &self.notification,
        }
    }
}

impl Default for EventQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greeter_core::{EventKind, SessionId};

    fn tag(id: u64, kind: EventKind) -> Tag {
        Tag::encode(SessionId::new(id), kind)
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let queue = CompletionQueue::new(QueueKind::Call);
        assert!(queue.post(tag(1, EventKind::ReadDone), true));
        assert!(queue.post(tag(2, EventKind::WriteDone), false));

        let first = queue.next().await.unwrap();
        assert_eq!(first.tag, tag(1, EventKind::ReadDone));
        assert!(first.ok);
        let second = queue.next().await.unwrap();
        assert_eq!(second.tag.decode(), (SessionId::new(2), EventKind::WriteDone));
        assert!(!second.ok);
    }

    #[tokio::test]
    async fn shutdown_drains_then_closes() {
        let queue = CompletionQueue::new(QueueKind::Notification);
        queue.post(tag(1, EventKind::Connected), true);
        queue.shutdown();

        assert!(queue.is_shutdown());
        assert!(!queue.post(tag(2, EventKind::Connected), true));
        assert_eq!(queue.next().await.unwrap().tag, tag(1, EventKind::Connected));
        assert!(queue.next().await.is_none());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_wakes_pending_next() {
        let queue = Arc::new(CompletionQueue::new(QueueKind::Call));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert!(waiter.await.unwrap().is_none());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let queue = CompletionQueue::new(QueueKind::Call);
        queue.shutdown();
        queue.shutdown();
        assert!(queue.is_shutdown());
    }

    #[test]
    fn pair_lookup_by_kind() {
        let queues = EventQueues::new();
        assert_eq!(queues.get(QueueKind::Call).kind(), QueueKind::Call);
        assert_eq!(queues.get(QueueKind::Notification).kind(), QueueKind::Notification);
    }
}
