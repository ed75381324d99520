use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::{error, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connectivity::ConnectivityMonitor;
use crate::delivery::transport::CollectorTransport;
use crate::queue::EventQueue;
use crate::utils::logging::debug_log;

/// Shared delivery wiring. The scheduler loop and host-triggered flushes
/// both drain through [`drain_once`]; `drain_lock` serializes passes so a
/// flush never interleaves with a tick.
#[derive(Clone)]
pub(crate) struct DeliveryContext {
    pub queue: EventQueue,
    pub transport: Arc<dyn CollectorTransport>,
    pub monitor: Arc<dyn ConnectivityMonitor>,
    pub interval: Duration,
    pub batch_size: usize,
    pub offline_mode: Arc<AtomicBool>,
    pub drain_lock: Arc<Mutex<()>>,
}

/// Owns the periodic delivery task. Started once at sensor init and stopped
/// at unload; restarting replaces any previous task.
pub(crate) struct DeliveryScheduler {
    handle: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl DeliveryScheduler {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel: None,
        }
    }

    pub fn start(&mut self, ctx: DeliveryContext) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        self.handle = Some(tokio::spawn(delivery_loop(ctx, token)));
        self.cancel = Some(cancel);
    }

    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!("delivery task failed to join: {err:?}");
            }
        }
    }
}

async fn delivery_loop(ctx: DeliveryContext, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let appended = ctx.queue.append_signal();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = drain_once(&ctx).await {
                    error!("delivery pass failed: {err:?}");
                }
            }
            // Eager delivery: appends wake the loop directly unless offline
            // mode defers them to the periodic tick.
            _ = appended.notified(), if !ctx.offline_mode.load(Ordering::Relaxed) => {
                if let Err(err) = drain_once(&ctx).await {
                    error!("delivery pass failed: {err:?}");
                }
            }
            _ = cancel.cancelled() => {
                debug_log!("delivery scheduler shutting down");
                break;
            }
        }
    }
}

/// One delivery pass: skip entirely while unreachable, otherwise send a
/// bounded FIFO batch one entry at a time, removing each on confirmed
/// success and stopping at the first failure so a later event is never
/// delivered before an earlier one. Returns the number delivered.
pub(crate) async fn drain_once(ctx: &DeliveryContext) -> Result<usize> {
    let _guard = ctx.drain_lock.lock().await;

    if !ctx.monitor.is_reachable() {
        debug_log!("network unreachable; skipping delivery tick");
        return Ok(0);
    }

    let batch = ctx.queue.peek_batch(ctx.batch_size).await?;
    if batch.is_empty() {
        return Ok(0);
    }

    let mut delivered = 0usize;
    for entry in batch {
        match ctx.transport.send(&entry).await {
            Ok(()) => {
                ctx.queue.remove(vec![entry.sequence]).await?;
                delivered += 1;
            }
            Err(err) => {
                warn!(
                    "delivery of event seq={} failed, retrying next tick: {err}",
                    entry.sequence
                );
                break;
            }
        }
    }

    debug_log!("delivery pass confirmed {delivered} event(s)");
    Ok(delivered)
}
