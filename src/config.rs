use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::identifiers::{truncated_sha256, IdentifierHasher};

/// Sensor configuration supplied once at `Sensor::init`.
///
/// The site and application names are predefined by the measurement system
/// operator. Everything else has workable defaults; hosts typically override
/// `endpoint` and `storage_path` only.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SensorConfig {
    pub site: String,
    pub app_name: String,
    /// Collector endpoint the built-in HTTP transport posts to.
    pub endpoint: String,
    /// Location of the durable queue's backing SQLite file.
    pub storage_path: PathBuf,
    /// Maximum number of pending events retained before the oldest is
    /// evicted.
    pub capacity: usize,
    pub sample_interval_ms: u64,
    pub delivery_interval_ms: u64,
    /// Maximum entries drained per delivery tick.
    pub delivery_batch_size: usize,
    /// Position discontinuity (seconds) beyond which a sample is classified
    /// as a scrub rather than natural advance.
    pub scrub_tolerance_secs: u32,
    /// Window during which a burst of scrub samples collapses into a single
    /// emitted event.
    pub scrub_debounce_ms: u64,
    pub http_timeout_ms: u64,
    /// When enabled, delivery happens only on the periodic tick; when
    /// disabled, an append also wakes the scheduler immediately. Never
    /// affects durability.
    pub offline_mode: bool,
    /// Master switch for measurement. Sessions keep sampling while disabled
    /// but emit nothing.
    pub tracking: bool,
    /// Verbose internal logging. Errors are logged regardless.
    pub debug: bool,
    /// Emit a Start event at `track()` time. Off by default; collectors that
    /// reconstruct timelines from heartbeats alone do not expect one.
    pub emit_start_event: bool,
    #[serde(skip, default = "default_hasher")]
    pub identifier_hasher: IdentifierHasher,
}

fn default_hasher() -> IdentifierHasher {
    truncated_sha256
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            site: String::new(),
            app_name: String::new(),
            endpoint: String::new(),
            storage_path: PathBuf::from("streamsense.sqlite3"),
            capacity: 500,
            sample_interval_ms: 5_000,
            delivery_interval_ms: 10_000,
            delivery_batch_size: 50,
            scrub_tolerance_secs: 2,
            scrub_debounce_ms: 10_000,
            http_timeout_ms: 10_000,
            offline_mode: false,
            tracking: true,
            debug: false,
            emit_start_event: false,
            identifier_hasher: truncated_sha256,
        }
    }
}

impl SensorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn delivery_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_interval_ms)
    }

    pub fn scrub_debounce(&self) -> Duration {
        Duration::from_millis(self.scrub_debounce_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
