use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered key/value payload attached to every measurement event.
/// Values are restricted to JSON strings, numbers and booleans by
/// construction; the collector treats anything else as opaque.
pub type EventPayload = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Start,
    Heartbeat,
    Scrub,
    Stop,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "Start",
            EventKind::Heartbeat => "Heartbeat",
            EventKind::Scrub => "Scrub",
            EventKind::Stop => "Stop",
        }
    }
}

/// One immutable measurement record emitted by a session.
///
/// The delivery sequence number is not part of the event itself; it is
/// assigned by the durable queue at append time and carried on the queue
/// entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub session_id: String,
    pub kind: EventKind,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(session_id: String, kind: EventKind, payload: EventPayload) -> Self {
        Self {
            session_id,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }
}
