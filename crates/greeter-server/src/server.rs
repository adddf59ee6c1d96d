use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use greeter_core::ServerError;
use greeter_telemetry::MetricsRecorder;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::broadcaster;
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::dispatcher;
use crate::queue::QueueKind;
use crate::registry::SessionRegistry;
use crate::transport::{TcpTransport, Transport};

/// Composition root: owns the transport, both event sources, the registry
/// and the three long-lived loops.
pub struct Server {
    ctx: Arc<ServerContext>,
    local_addr: Option<SocketAddr>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Server {
    /// Bind a TCP listener on `config.listen_addr`.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let transport = TcpTransport::bind(&config.listen_addr).await?;
        let local_addr = transport.local_addr();
        let mut server = Self::with_transport(config, Arc::new(transport));
        server.local_addr = Some(local_addr);
        Ok(server)
    }

    /// Serve over an arbitrary transport.
    pub fn with_transport(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        Self::from_context(ServerContext::new(
            config,
            transport,
            SessionRegistry::new(),
            Arc::new(MetricsRecorder::new()),
        ))
    }

    pub fn from_context(ctx: ServerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            local_addr: None,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Report into `metrics` instead of a private recorder. Only takes
    /// effect before [`start`](Self::start).
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        match Arc::get_mut(&mut self.ctx) {
            Some(ctx) => ctx.metrics = metrics,
            None => tracing::warn!("metrics recorder can only be replaced before start"),
        }
        self
    }

    /// Arm the first accept slot and spawn the dispatch loops and the
    /// broadcaster. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ServerError> {
        self.ctx.config.validate()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        self.ctx.set_running();
        self.ctx.spawn_session()?;

        let mut tasks = self.tasks.lock();
        for kind in [QueueKind::Call, QueueKind::Notification] {
            let span = tracing::info_span!("dispatch", queue = %kind);
            tasks.push(tokio::spawn(
                dispatcher::run(Arc::clone(&self.ctx), kind).instrument(span),
            ));
        }
        tasks.push(tokio::spawn(
            broadcaster::run(Arc::clone(&self.ctx)).instrument(tracing::info_span!("broadcast")),
        ));

        tracing::info!(
            addr = ?self.local_addr,
            interval_ms = self.ctx.config.broadcast_interval_ms,
            "Greeter server started"
        );
        Ok(())
    }

    /// Shut down in order: stop broadcasting, cancel connected sessions,
    /// shut the transport, close both event sources, join the loops.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(sessions = self.ctx.registry.len(), "Greeter server stopping");

        self.ctx.clear_running();
        let cancelled = self.ctx.cancel_connected();
        self.ctx.transport.shutdown().await;
        self.ctx.queues.call.shutdown();
        self.ctx.queues.notification.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "server task failed");
            }
        }

        let leftover = self.ctx.registry.drain();
        for session in &leftover {
            session.lock().mark_closed();
        }
        self.ctx.refresh_active();

        tracing::info!(cancelled, leftover = leftover.len(), "Greeter server stopped");
    }

    /// Start, wait for `signal`, then stop.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        signal.await;
        self.stop().await;
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn session_count(&self) -> usize {
        self.ctx.registry.len()
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.ctx.metrics)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }
}
