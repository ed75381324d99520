use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::adapter::{PlayerAdapter, PlayerSample};
use crate::models::{Event, EventKind, EventPayload};
use crate::queue::EventQueue;
use crate::session::state::{SampleDecision, SessionState};
use crate::utils::logging::debug_log;

/// Everything a sampling task needs; shared with the owning session handle
/// through `state` and `tracking` only.
#[derive(Clone)]
pub(crate) struct SamplerContext {
    pub session_id: String,
    pub site: String,
    pub app_name: String,
    pub attributes: BTreeMap<String, String>,
    pub adapter: Arc<dyn PlayerAdapter>,
    pub queue: EventQueue,
    pub state: Arc<Mutex<SessionState>>,
    pub tracking: Arc<AtomicBool>,
    pub interval: Duration,
}

pub(crate) async fn sampling_loop(ctx: SamplerContext, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = perform_sample(&ctx).await {
                    error!("sampling failed for session {}: {err:?}", ctx.session_id);
                }
            }
            _ = cancel.cancelled() => {
                debug_log!("sampler for session {} shutting down", ctx.session_id);
                break;
            }
        }
    }
}

async fn perform_sample(ctx: &SamplerContext) -> Result<()> {
    let sample = PlayerSample::read_from(ctx.adapter.as_ref());

    let decision = {
        let mut state = ctx.state.lock().await;
        state.observe(sample, Instant::now())
    };

    // Sampling keeps the state machine current even while tracking is
    // disabled; only emission is suppressed.
    if !ctx.tracking.load(Ordering::Relaxed) {
        return Ok(());
    }

    match decision {
        None => Ok(()),
        Some(SampleDecision::Heartbeat { position }) => {
            emit_measurement(ctx, EventKind::Heartbeat, position, &sample).await
        }
        Some(SampleDecision::Scrub { position }) => {
            emit_measurement(ctx, EventKind::Scrub, position, &sample).await
        }
    }
}

/// Builds the event payload and appends it. Append failures are logged by
/// the caller and never surface to the host; measurement must not disturb
/// playback.
pub(crate) async fn emit_measurement(
    ctx: &SamplerContext,
    kind: EventKind,
    position: u32,
    sample: &PlayerSample,
) -> Result<()> {
    let duration = {
        let state = ctx.state.lock().await;
        state.locked_duration.unwrap_or(0)
    };

    let payload = build_payload(ctx, position, duration, sample);
    let event = Event::new(ctx.session_id.clone(), kind, payload);

    ctx.queue
        .append(event)
        .await
        .map(|_| ())
        .with_context(|| format!("failed to append {} event", kind.as_str()))
}

fn build_payload(
    ctx: &SamplerContext,
    position: u32,
    duration: u32,
    sample: &PlayerSample,
) -> EventPayload {
    let mut payload = EventPayload::new();
    for (key, value) in &ctx.attributes {
        payload.insert(key.clone(), serde_json::Value::from(value.clone()));
    }
    payload.insert("site".into(), ctx.site.clone().into());
    payload.insert("app".into(), ctx.app_name.clone().into());
    payload.insert("uid".into(), ctx.session_id.clone().into());
    payload.insert("pos".into(), position.into());
    payload.insert("dur".into(), duration.into());
    payload.insert("width".into(), sample.width.into());
    payload.insert("height".into(), sample.height.into());
    payload.insert("cast".into(), sample.casting.into());
    payload.insert(
        "ts".into(),
        chrono::Utc::now().timestamp().into(),
    );
    payload
}
