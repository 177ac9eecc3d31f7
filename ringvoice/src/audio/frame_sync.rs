//! Frame synchronization callback
//!
//! Runs once per hardware audio frame, before the engine renders it:
//!
//! 1. Read every voice's live offsets
//! 2. Find the buffer voice 0 is reading (the playing buffer `P`)
//! 3. Publish `P` as `playing`, waking the producer if it moved
//! 4. End each voice on the last sample of its block in `P`
//! 5. Loop into `P + 1` if the producer has finished it, else back into `P`
//!
//! The callback only touches voice registers and atomics. It never blocks
//! and never reads or writes sample data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use smallvec::SmallVec;
use tracing::{trace, warn};

use ringvoice_core::{DesyncRecovery, SyncAnomaly, VoiceEngine, VoiceId, VoiceOffsets};

use super::ring::{RingCursors, RingLayout};

/// Where the voices go after finishing the playing buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTarget {
    /// Next buffer is committed; play on into it
    Continue(usize),
    /// Next buffer isn't ready; repeat the playing one
    Stall(usize),
}

impl LoopTarget {
    pub fn buffer(self) -> usize {
        match self {
            LoopTarget::Continue(buffer) | LoopTarget::Stall(buffer) => buffer,
        }
    }
}

/// Result of one callback invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Buffer the voices were found in (or recovered to)
    pub playing: usize,
    /// `playing` before this frame
    pub previous: usize,
    pub target: LoopTarget,
    pub anomaly: Option<SyncAnomaly>,
}

/// Counters updated from the hardware callback
#[derive(Debug, Default)]
pub struct SyncStats {
    frames: AtomicU64,
    switches: AtomicU64,
    continues: AtomicU64,
    stalls: AtomicU64,
    desyncs: AtomicU64,
    skews: AtomicU64,
}

/// Point-in-time copy of [`SyncStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatsSnapshot {
    pub frames: u64,
    /// Times `playing` moved to another buffer
    pub switches: u64,
    pub continues: u64,
    pub stalls: u64,
    pub desyncs: u64,
    /// Frames where another voice was in a different buffer than voice 0
    pub skews: u64,
}

impl SyncStats {
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            continues: self.continues.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            desyncs: self.desyncs.load(Ordering::Relaxed),
            skews: self.skews.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the frame callback and the device
pub struct FrameSync {
    layout: RingLayout,
    voices: SmallVec<[VoiceId; 2]>,
    cursors: RingCursors,
    recovery: DesyncRecovery,
    /// Signalled when `playing` moves
    wake: (Mutex<()>, Condvar),
    stats: SyncStats,
}

impl FrameSync {
    pub fn new(layout: RingLayout, voices: &[VoiceId], recovery: DesyncRecovery) -> Self {
        let cursors = RingCursors::new(layout.len());
        Self {
            layout,
            voices: SmallVec::from_slice(voices),
            cursors,
            recovery,
            wake: (Mutex::new(()), Condvar::new()),
            stats: SyncStats::default(),
        }
    }

    pub fn cursors(&self) -> &RingCursors {
        &self.cursors
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// The per-frame callback body. Returns `None` if no voices are bound.
    pub fn on_frame<E: VoiceEngine + ?Sized>(&self, engine: &E) -> Option<FrameOutcome> {
        let first = *self.voices.first()?;
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        let offsets: SmallVec<[VoiceOffsets; 2]> =
            self.voices.iter().map(|&voice| engine.offsets(voice)).collect();
        let lead = offsets[0];

        let (playing, anomaly) = match self.layout.locate(lead.data, 0, lead.current) {
            Some(buffer) => (buffer, None),
            None => {
                let recovered = match self.recovery {
                    DesyncRecovery::FirstBuffer => 0,
                    DesyncRecovery::KeepPrevious => self.cursors.playing(),
                };
                let anomaly = SyncAnomaly::Desync {
                    offset: lead.current,
                    recovered,
                };
                self.report_desync(first, &anomaly);
                (recovered, Some(anomaly))
            }
        };

        if anomaly.is_none() {
            for (channel, voice) in offsets.iter().enumerate().skip(1) {
                if self.layout.locate(voice.data, channel, voice.current) != Some(playing) {
                    self.stats.skews.fetch_add(1, Ordering::Relaxed);
                    trace!("Channel {} not in buffer {}", channel, playing);
                }
            }
        }

        let previous = self.cursors.observe_playing(playing);
        if previous != playing {
            self.stats.switches.fetch_add(1, Ordering::Relaxed);
            // notify_all() doesn't require holding the lock
            self.wake.1.notify_all();
        }

        let next = self.cursors.next(playing);
        let target = if self.cursors.rendering() != next {
            self.stats.continues.fetch_add(1, Ordering::Relaxed);
            LoopTarget::Continue(next)
        } else {
            self.stats.stalls.fetch_add(1, Ordering::Relaxed);
            LoopTarget::Stall(playing)
        };

        for (channel, (&voice, current)) in self.voices.iter().zip(&offsets).enumerate() {
            engine.set_end_offset(voice, self.layout.slice_last(current.data, playing, channel));
            engine.set_loop_offset(
                voice,
                self.layout.slice_start(current.data, target.buffer(), channel),
            );
        }

        Some(FrameOutcome {
            playing,
            previous,
            target,
            anomaly,
        })
    }

    /// Block until the producer may write its buffer or `timeout` passes.
    ///
    /// Returns whether the buffer became available.
    pub fn wait_available(&self, timeout: Duration) -> bool {
        if self.cursors.is_available() {
            return true;
        }
        let (lock, cvar) = &self.wake;
        let guard = lock.lock().unwrap_or_else(|e| {
            warn!("Frame sync wake mutex poisoned; continuing");
            e.into_inner()
        });
        let _ = cvar
            .wait_timeout_while(guard, timeout, |_| !self.cursors.is_available())
            .unwrap_or_else(|e| {
                warn!("Frame sync condvar wait mutex poisoned; continuing");
                e.into_inner()
            });
        self.cursors.is_available()
    }

    fn report_desync(&self, voice: VoiceId, anomaly: &SyncAnomaly) {
        let count = self.stats.desyncs.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 10 || count % 100 == 0 {
            warn!("Voice {:?}: {} (desync #{})", voice, anomaly, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_target_buffer() {
        assert_eq!(LoopTarget::Continue(3).buffer(), 3);
        assert_eq!(LoopTarget::Stall(1).buffer(), 1);
    }

    #[test]
    fn test_stats_snapshot_starts_empty() {
        assert_eq!(SyncStats::default().snapshot(), SyncStatsSnapshot::default());
    }
}
