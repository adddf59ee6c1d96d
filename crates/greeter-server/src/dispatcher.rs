//! The two dispatch loops: decode each completion and route it to its session.

use std::sync::Arc;

use greeter_core::EventKind;
use tracing::{debug, error, info};

use crate::context::{
    ServerContext, EVENTS_DISPATCHED, EVENTS_IGNORED, SESSIONS_CONNECTED, SESSIONS_REMOVED,
};
use crate::queue::{Completion, QueueKind};
use crate::session::Step;

/// Outcome of routing one completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The session handled the event.
    Processed,
    /// The session left the registry.
    Removed,
    /// The session was already gone.
    Ignored,
}

/// Route one completion.
///
/// A not-ok completion or a `Finished` event removes the session without
/// processing it. Completions for sessions that are no longer registered are
/// dropped: a concurrent removal got there first.
pub fn dispatch(ctx: &ServerContext, completion: Completion, queue: QueueKind) -> Dispatch {
    let (id, event) = completion.tag.decode();
    ctx.metrics.counter_inc(EVENTS_DISPATCHED, 1);

    let terminal = match event {
        EventKind::Finished => true,
        EventKind::Connected | EventKind::ReadDone | EventKind::WriteDone => false,
    };
    if !completion.ok || terminal {
        return remove(ctx, completion, queue);
    }

    let Some(session) = ctx.registry.get(id) else {
        ctx.metrics.counter_inc(EVENTS_IGNORED, 1);
        debug!(session_id = %id, event = %event, queue = %queue, "event for removed session");
        return Dispatch::Ignored;
    };

    // The guard is released before acting on the step.
    let step = session.lock().process(event);
    match step {
        Step::Continue => Dispatch::Processed,
        Step::SpawnNext => {
            ctx.metrics.counter_inc(SESSIONS_CONNECTED, 1);
            spawn_next(ctx);
            Dispatch::Processed
        }
        Step::Close => remove(ctx, completion, queue),
    }
}

fn remove(ctx: &ServerContext, completion: Completion, queue: QueueKind) -> Dispatch {
    let (id, event) = completion.tag.decode();
    match ctx.registry.remove(id) {
        Some(session) => {
            session.lock().mark_closed();
            ctx.metrics.counter_inc(SESSIONS_REMOVED, 1);
            ctx.refresh_active();
            debug!(
                session_id = %id,
                event = %event,
                ok = completion.ok,
                queue = %queue,
                "session removed"
            );
            Dispatch::Removed
        }
        None => {
            ctx.metrics.counter_inc(EVENTS_IGNORED, 1);
            debug!(session_id = %id, event = %event, queue = %queue, "session already removed");
            Dispatch::Ignored
        }
    }
}

/// Keep one slot waiting for the next peer while the server runs.
fn spawn_next(ctx: &ServerContext) {
    if !ctx.is_running() {
        debug!("server stopping, not arming another accept slot");
        return;
    }
    if let Err(e) = ctx.spawn_session() {
        error!(error = %e, kind = e.error_kind(), "cannot arm another accept slot");
    }
}

/// Drain one event source until it is shut down.
pub async fn run(ctx: Arc<ServerContext>, kind: QueueKind) {
    let queue = Arc::clone(ctx.queues.get(kind));
    let mut handled: u64 = 0;
    while let Some(completion) = queue.next().await {
        dispatch(&ctx, completion, kind);
        handled += 1;
    }
    info!(queue = %kind, handled, "dispatch loop exited");
}
