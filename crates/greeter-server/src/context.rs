//! State shared by the dispatch loops, the broadcaster and the server handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use greeter_core::{ServerError, SessionId};
use greeter_telemetry::MetricsRecorder;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::queue::EventQueues;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::transport::Transport;

pub const SESSIONS_SPAWNED: &str = "sessions_spawned_total";
pub const SESSIONS_CONNECTED: &str = "sessions_connected_total";
pub const SESSIONS_REMOVED: &str = "sessions_removed_total";
pub const SESSIONS_ACTIVE: &str = "sessions_active";
pub const EVENTS_DISPATCHED: &str = "events_dispatched_total";
pub const EVENTS_IGNORED: &str = "events_ignored_total";
pub const REPLIES_SENT: &str = "replies_sent_total";
pub const BROADCAST_SWEEPS: &str = "broadcast_sweeps_total";

pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub transport: Arc<dyn Transport>,
    pub queues: EventQueues,
    pub metrics: Arc<MetricsRecorder>,
    running: AtomicBool,
    /// Fired when `running` is cleared, so sleeping loops wake up.
    stopping: CancellationToken,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        registry: SessionRegistry,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            queues: EventQueues::new(),
            metrics,
            running: AtomicBool::new(false),
            stopping: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn clear_running(&self) {
        self.running.store(false, Ordering::Release);
        self.stopping.cancel();
    }

    /// Resolves once `clear_running` has been called.
    pub async fn stopped(&self) {
        self.stopping.cancelled().await;
    }

    /// Insert a fresh `WaitConnect` session and arm its accept.
    ///
    /// The session is in the registry before the transport can report a
    /// connection for it.
    pub fn spawn_session(&self) -> Result<SessionId, ServerError> {
        let transport = Arc::clone(&self.transport);
        let (id, session) = self.registry.add(|id| Session::new(id, transport))?;
        session.lock().arm(&self.queues);
        self.metrics.counter_inc(SESSIONS_SPAWNED, 1);
        self.refresh_active();
        tracing::debug!(session_id = %id, "accept slot armed");
        Ok(id)
    }

    /// Ask the transport to abort every connected session.
    ///
    /// Sessions still waiting for a peer are skipped: their slot has no
    /// stream to cancel.
    pub fn cancel_connected(&self) -> usize {
        let mut cancelled = 0;
        self.registry.for_each(|session| {
            if session.try_cancel() {
                cancelled += 1;
            }
        });
        cancelled
    }

    pub fn refresh_active(&self) {
        let active = i64::try_from(self.registry.len()).unwrap_or(i64::MAX);
        self.metrics.gauge_set(SESSIONS_ACTIVE, active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::transport::{MemoryTransport, TransportOp};

    fn context(transport: Arc<MemoryTransport>) -> ServerContext {
        ServerContext::new(
            ServerConfig::default(),
            transport,
            SessionRegistry::new(),
            Arc::new(MetricsRecorder::new()),
        )
    }

    #[test]
    fn spawn_inserts_then_arms() {
        let transport = Arc::new(MemoryTransport::new());
        let ctx = context(transport.clone());
        let id = ctx.spawn_session().unwrap();

        assert!(ctx.registry.contains(id));
        assert_eq!(transport.ops(), vec![TransportOp::RequestStream(id)]);
        assert_eq!(ctx.metrics.counter_get(SESSIONS_SPAWNED), 1);
        assert_eq!(ctx.metrics.gauge_get(SESSIONS_ACTIVE), 1);
    }

    #[test]
    fn cancel_skips_waiting_sessions() {
        let transport = Arc::new(MemoryTransport::new());
        let ctx = context(transport.clone());
        let waiting = ctx.spawn_session().unwrap();
        let connected = ctx.spawn_session().unwrap();
        transport.connect(connected);
        ctx.registry
            .get(connected)
            .unwrap()
            .lock()
            .process(greeter_core::EventKind::Connected);

        assert_eq!(ctx.cancel_connected(), 1);
        assert_eq!(transport.cancelled(), vec![connected]);
        assert_eq!(
            ctx.registry.get(waiting).unwrap().lock().status(),
            SessionStatus::WaitConnect
        );
    }

    #[tokio::test]
    async fn clearing_running_wakes_waiters() {
        let ctx = Arc::new(context(Arc::new(MemoryTransport::new())));
        ctx.set_running();
        assert!(ctx.is_running());

        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.stopped().await })
        };
        ctx.clear_running();
        waiter.await.unwrap();
        assert!(!ctx.is_running());
    }
}
