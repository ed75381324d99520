//! Runtime-gated verbose logging.
//!
//! The sensor's `debug` flag switches the internal action log on and off at
//! runtime; errors are always logged regardless of the flag.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_LOGGING: AtomicBool = AtomicBool::new(false);

pub(crate) fn set_debug(enabled: bool) {
    DEBUG_LOGGING.store(enabled, Ordering::Relaxed);
}

pub(crate) fn debug_enabled() -> bool {
    DEBUG_LOGGING.load(Ordering::Relaxed)
}

/// Logs at info level only while the sensor's debug flag is set.
macro_rules! debug_log {
    ($($arg:tt)*) => {
        if $crate::utils::logging::debug_enabled() {
            log::info!($($arg)*);
        }
    };
}

pub(crate) use debug_log;
