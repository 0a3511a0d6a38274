//! Time helpers that never panic on a misconfigured system clock

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Current Unix timestamp in seconds (0 if the clock is before the epoch).
pub fn current_timestamp() -> u64 {
    current_timestamp_duration().as_secs()
}

/// Current Unix timestamp as a `Duration`.
pub fn current_timestamp_duration() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("System time is before UNIX epoch, using zero duration");
            Duration::from_secs(0)
        })
}
