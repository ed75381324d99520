use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{PlayerAdapter, PlayerSample};
use crate::config::SensorConfig;
use crate::models::EventKind;
use crate::queue::EventQueue;
use crate::session::sampler::{emit_measurement, sampling_loop, SamplerContext};
use crate::session::state::SessionState;
use crate::utils::logging::debug_log;

/// Handle to one tracked playback stream, returned by `Sensor::track`.
///
/// Cloning shares the underlying session. Dropping the handle does not stop
/// tracking; call [`Session::stop`] (or `Sensor::unload`) for that.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: String,
    attributes: BTreeMap<String, String>,
    ctx: SamplerContext,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn spawn(
        id: String,
        attributes: BTreeMap<String, String>,
        adapter: Arc<dyn PlayerAdapter>,
        queue: EventQueue,
        config: &SensorConfig,
        tracking: Arc<AtomicBool>,
    ) -> Self {
        let state = Arc::new(Mutex::new(SessionState::new(
            config.scrub_tolerance_secs,
            config.scrub_debounce(),
        )));

        let ctx = SamplerContext {
            session_id: id.clone(),
            site: config.site.clone(),
            app_name: config.app_name.clone(),
            attributes: attributes.clone(),
            adapter,
            queue,
            state,
            tracking,
            interval: config.sample_interval(),
        };

        let cancel = CancellationToken::new();
        let loop_ctx = ctx.clone();
        let handle = tokio::spawn(sampling_loop(loop_ctx, cancel.clone()));

        Self {
            inner: Arc::new(SessionInner {
                id,
                attributes,
                ctx,
                cancel,
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    /// The UID assigned to this stream, unique per process run.
    pub fn uid(&self) -> &str {
        &self.inner.id
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.inner.attributes
    }

    /// Stops tracking this stream: cancels the sampler, flushes an open
    /// scrub window and emits the terminal Stop event with the final
    /// position. Idempotent — a second call is a no-op and emits nothing.
    /// Tracking cannot be reactivated on a stopped session.
    pub async fn stop(&self) {
        let (pending_scrub, final_position, last_observed) = {
            let mut state = self.inner.ctx.state.lock().await;
            if !state.stop() {
                return;
            }
            (
                state.take_pending_scrub(),
                state.last_position,
                state.last_observed(),
            )
        };

        // Cancel before emitting so no heartbeat can land after the Stop.
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.handle.lock().await.take() {
            if let Err(err) = handle.await {
                error!("sampler task for session {} failed to join: {err:?}", self.inner.id);
            }
        }

        if !self.inner.ctx.tracking.load(Ordering::Relaxed) {
            debug_log!("session {} stopped with tracking disabled", self.inner.id);
            return;
        }

        let sample = last_observed.unwrap_or(PlayerSample {
            position: 0,
            duration: 0,
            width: 0,
            height: 0,
            casting: false,
        });

        if let Some(position) = pending_scrub {
            if let Err(err) = emit_measurement(&self.inner.ctx, EventKind::Scrub, position, &sample).await {
                error!("failed to flush scrub for session {}: {err:?}", self.inner.id);
            }
        }

        if let Err(err) =
            emit_measurement(&self.inner.ctx, EventKind::Stop, final_position, &sample).await
        {
            error!("failed to emit stop for session {}: {err:?}", self.inner.id);
        }

        debug_log!("session {} stopped at position {final_position}", self.inner.id);
    }
}
