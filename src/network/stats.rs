//! Network counters
//!
//! Cumulative counters updated lock-free by every loop; `snapshot()` gives a
//! plain copy for logging or tests.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct NetworkStats {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    protocol_violations: AtomicU64,
    bans_applied: AtomicU64,
    queue_overflows: AtomicU64,
}

/// Point-in-time copy of [`NetworkStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStatsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub protocol_violations: u64,
    pub bans_applied: u64,
    pub queue_overflows: u64,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ban(&self) {
        self.bans_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            bans_applied: self.bans_applied.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
        }
    }
}
