//! Periodic push of a greeting to every connected session.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::context::{ServerContext, BROADCAST_SWEEPS, REPLIES_SENT};

/// One pass over the registry. Returns how many writes were armed.
pub fn sweep(ctx: &ServerContext) -> usize {
    let greeting = ctx.config.greeting.as_str();
    let mut sent = 0;
    let visited = ctx.registry.for_each(|session| {
        if session.reply(greeting) {
            sent += 1;
        }
    });
    ctx.metrics.counter_inc(BROADCAST_SWEEPS, 1);
    ctx.metrics.counter_inc(REPLIES_SENT, sent as u64);
    tracing::trace!(visited, sent, "broadcast sweep");
    sent
}

pub async fn run(ctx: Arc<ServerContext>) {
    let mut ticker = tokio::time::interval(ctx.config.broadcast_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    let mut sweeps: u64 = 0;
    loop {
        tokio::select! {
            _ = ctx.stopped() => break,
            _ = ticker.tick() => {}
        }
        if !ctx.is_running() {
            break;
        }
        sweep(&ctx);
        sweeps += 1;
    }
    tracing::info!(sweeps, "broadcaster exited");
}
