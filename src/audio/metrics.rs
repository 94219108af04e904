//! Transport counters
//!
//! Written from the real-time callback with relaxed atomics, read from any
//! thread.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Monotonic event counters plus the buffered-frames gauge
#[derive(Debug, Default)]
pub struct Metrics {
    /// Playback found the ring buffer completely drained
    underflows: AtomicU64,
    /// A write was truncated because the destination was full
    overflows: AtomicU64,
    /// Playback emitted silence because too little data was buffered
    silent_underflows: AtomicU64,
    /// Last observed ring-buffer backlog
    buffered_frames: AtomicUsize,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub underflows: u64,
    pub overflows: u64,
    pub silent_underflows: u64,
    pub buffered_frames: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_underflow(&self) {
        self.underflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_silent_underflow(&self) {
        self.silent_underflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_buffered_frames(&self, frames: usize) {
        self.buffered_frames.store(frames, Ordering::Relaxed);
    }

    pub fn underflows(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn silent_underflows(&self) -> u64 {
        self.silent_underflows.load(Ordering::Relaxed)
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffered_frames.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            underflows: self.underflows(),
            overflows: self.overflows(),
            silent_underflows: self.silent_underflows(),
            buffered_frames: self.buffered_frames(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = Metrics::new();
        metrics.record_overflow();
        metrics.record_overflow();
        metrics.record_silent_underflow();
        metrics.set_buffered_frames(172);

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                underflows: 0,
                overflows: 2,
                silent_underflows: 1,
                buffered_frames: 172,
            }
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&Metrics::new().snapshot()).unwrap();
        assert!(json.contains("\"silent_underflows\":0"));
    }
}
