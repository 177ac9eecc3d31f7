//! Stream thread health monitoring

use std::time::{Duration, Instant};

use tracing::debug;

use crate::audio::SyncStatsSnapshot;

/// Producer-side counters, logged once a second
#[derive(Debug, Clone)]
pub(super) struct StreamMetrics {
    /// Buffers committed since the last log
    pub commits: u64,
    /// Time spent waiting for a free buffer since the last log
    pub wait_total: Duration,
    /// Longest single wait since the last log
    pub wait_max: Duration,
    /// Callback counters at the last log, for per-interval deltas
    last_sync: SyncStatsSnapshot,
    last_log_time: Instant,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            commits: 0,
            wait_total: Duration::ZERO,
            wait_max: Duration::ZERO,
            last_sync: SyncStatsSnapshot::default(),
            last_log_time: Instant::now(),
        }
    }

    pub fn record_wait(&mut self, waited: Duration) {
        self.wait_total += waited;
        self.wait_max = self.wait_max.max(waited);
    }

    /// Log metrics if enough time has passed (every 1 second)
    pub fn maybe_log(&mut self, sync: &SyncStatsSnapshot) {
        if self.last_log_time.elapsed().as_secs() < 1 {
            return;
        }

        let avg_wait_us = if self.commits > 0 {
            self.wait_total.as_micros() as f64 / self.commits as f64
        } else {
            0.0
        };
        debug!(
            "STREAM METRICS [tid={:?}]: commits={}, avg_wait={:.0}μs, max_wait={}μs, \
             frames={}, switches={}, stalls={}, desyncs={}, skews={}",
            std::thread::current().id(),
            self.commits,
            avg_wait_us,
            self.wait_max.as_micros(),
            sync.frames - self.last_sync.frames,
            sync.switches - self.last_sync.switches,
            sync.stalls - self.last_sync.stalls,
            sync.desyncs - self.last_sync.desyncs,
            sync.skews - self.last_sync.skews,
        );

        // Reset counters for next interval (show per-second rates)
        self.commits = 0;
        self.wait_total = Duration::ZERO;
        self.wait_max = Duration::ZERO;
        self.last_sync = *sync;
        self.last_log_time = Instant::now();
    }
}
