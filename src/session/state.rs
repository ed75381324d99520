use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::adapter::PlayerSample;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

/// What a single observation translates into. `None` from
/// [`SessionState::observe`] means the sample was absorbed into an open
/// scrub window and nothing is emitted this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecision {
    Heartbeat { position: u32 },
    Scrub { position: u32 },
}

#[derive(Debug, Clone, Copy)]
struct PendingScrub {
    position: u32,
    opened_at: Instant,
}

/// Per-session sampling state: position tracking, duration lock-in and
/// scrub debouncing. Pure with respect to time — the caller supplies the
/// observation instant, which keeps the discontinuity arithmetic testable.
#[derive(Debug)]
pub struct SessionState {
    pub status: SessionStatus,
    pub last_position: u32,
    /// First positive duration reported by the adapter. Live content may
    /// report 0 indefinitely; a locked value is never overwritten.
    pub locked_duration: Option<u32>,
    last_sample: Option<(Instant, u32)>,
    last_observed: Option<PlayerSample>,
    pending_scrub: Option<PendingScrub>,
    tolerance_secs: u32,
    debounce: Duration,
}

impl SessionState {
    pub fn new(tolerance_secs: u32, debounce: Duration) -> Self {
        Self {
            status: SessionStatus::Active,
            last_position: 0,
            locked_duration: None,
            last_sample: None,
            last_observed: None,
            pending_scrub: None,
            tolerance_secs,
            debounce,
        }
    }

    /// Feeds one adapter observation into the state machine and returns the
    /// event to emit for it, if any.
    ///
    /// A position that moved away from both the predicted point (previous
    /// position plus elapsed time) and the previous sample opens a scrub
    /// window; paused content holds its position and therefore never reads
    /// as a seek. While the window is open every sample just updates the
    /// pending position; the first sample past the window closes it with a
    /// single Scrub carrying the final observed position.
    pub fn observe(&mut self, sample: PlayerSample, now: Instant) -> Option<SampleDecision> {
        if self.status != SessionStatus::Active {
            return None;
        }

        if self.locked_duration.is_none() && sample.duration > 0 {
            self.locked_duration = Some(sample.duration);
        }

        let decision = match self.last_sample {
            None => Some(SampleDecision::Heartbeat {
                position: sample.position,
            }),
            Some((prev_at, prev_position)) => {
                if let Some(pending) = self.pending_scrub.as_mut() {
                    if now.duration_since(pending.opened_at) < self.debounce {
                        pending.position = sample.position;
                        None
                    } else {
                        self.pending_scrub = None;
                        Some(SampleDecision::Scrub {
                            position: sample.position,
                        })
                    }
                } else {
                    let elapsed_secs = now.duration_since(prev_at).as_secs();
                    let predicted = prev_position.saturating_add(elapsed_secs.min(u32::MAX as u64) as u32);
                    let off_predicted = sample.position.abs_diff(predicted) > self.tolerance_secs;
                    let off_previous = sample.position.abs_diff(prev_position) > self.tolerance_secs;

                    if off_predicted && off_previous {
                        self.pending_scrub = Some(PendingScrub {
                            position: sample.position,
                            opened_at: now,
                        });
                        None
                    } else {
                        Some(SampleDecision::Heartbeat {
                            position: sample.position,
                        })
                    }
                }
            }
        };

        self.last_sample = Some((now, sample.position));
        self.last_position = sample.position;
        self.last_observed = Some(sample);
        decision
    }

    /// Drains an open scrub window, if any; used by `stop()` so a burst in
    /// progress still yields its single Scrub before the terminal event.
    pub fn take_pending_scrub(&mut self) -> Option<u32> {
        self.pending_scrub.take().map(|pending| pending.position)
    }

    /// Most recent raw observation; the Stop payload reuses its geometry
    /// and casting fields.
    pub fn last_observed(&self) -> Option<PlayerSample> {
        self.last_observed
    }

    /// Transitions to Stopped. Returns false when already stopped, making
    /// the terminal transition idempotent for callers.
    pub fn stop(&mut self) -> bool {
        if self.status == SessionStatus::Stopped {
            return false;
        }
        self.status = SessionStatus::Stopped;
        true
    }
}
