//! Buffer ring
//!
//! N sample buffers allocated from voice-engine memory, plus the two cursors
//! that hand them between the producer and the hardware:
//!
//! - `rendering`: buffer the producer fills next (written only by commit)
//! - `playing`: buffer the hardware was last seen reading (written only by
//!   the frame callback)
//!
//! Each buffer holds `channels` contiguous blocks of `frames` samples once
//! de-interleaved; voice `c` reads block `c`.

use std::sync::atomic::{AtomicUsize, Ordering};

use smallvec::SmallVec;
use tracing::{debug, warn};

use ringvoice_core::{AudioError, SAMPLE_BYTES, SampleAddr, StreamFormat, VoiceEngine};

/// One block of sample memory the voices read from
pub struct SampleBuffer {
    samples: Box<[i16]>,
}

impl SampleBuffer {
    pub fn addr(&self) -> SampleAddr {
        SampleAddr::of(&self.samples)
    }

    pub fn len_bytes(&self) -> usize {
        self.samples.len() * SAMPLE_BYTES
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }
}

/// Ownership of a buffer as implied by the cursors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Being written by the producer
    Filling,
    /// Committed, waiting for the hardware
    ReadyToPlay,
    /// Being read by the hardware
    Playing,
}

pub struct BufferRing {
    buffers: SmallVec<[SampleBuffer; 4]>,
    frames: u32,
    channels: u16,
}

impl BufferRing {
    /// Allocate `count` zeroed, cache-flushed buffers sized for `format`.
    ///
    /// On failure everything allocated so far is handed back to the engine.
    pub fn allocate<E: VoiceEngine + ?Sized>(
        engine: &E,
        format: &StreamFormat,
        count: usize,
    ) -> Result<Self, AudioError> {
        let len = format.buffer_samples();
        let mut ring = Self {
            buffers: SmallVec::with_capacity(count),
            frames: format.frames(),
            channels: format.channels(),
        };

        for index in 0..count {
            let Some(mut samples) = engine.alloc_samples(len) else {
                warn!(
                    "Failed to allocate ring buffer {} of {} ({} bytes)",
                    index,
                    count,
                    format.buffer_bytes()
                );
                ring.release(engine);
                return Err(AudioError::out_of_memory(format!(
                    "ring buffer {index} ({} bytes)",
                    format.buffer_bytes()
                )));
            };
            samples.fill(0);
            let buffer = SampleBuffer { samples };
            engine.flush_range(buffer.addr(), buffer.len_bytes());
            ring.buffers.push(buffer);
        }

        debug!(
            "Allocated {} ring buffers of {} bytes",
            count,
            format.buffer_bytes()
        );
        Ok(ring)
    }

    /// Hand every buffer back to the engine.
    ///
    /// The voices must already be stopped.
    pub fn release<E: VoiceEngine + ?Sized>(&mut self, engine: &E) {
        for buffer in self.buffers.drain(..) {
            engine.release_samples(buffer.samples);
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SampleBuffer> {
        self.buffers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SampleBuffer> {
        self.buffers.get_mut(index)
    }

    /// Buffer `index`, which must be in range
    pub fn buffer_mut(&mut self, index: usize) -> &mut SampleBuffer {
        &mut self.buffers[index]
    }

    /// Addresses and geometry, for the voice side
    pub fn layout(&self) -> RingLayout {
        RingLayout {
            buffers: self.buffers.iter().map(SampleBuffer::addr).collect(),
            frames: self.frames,
            channels: self.channels,
        }
    }
}

impl Drop for BufferRing {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            // Voices may still be reading these
            warn!(
                "Ring dropped with {} buffers still owned by the engine, leaking them",
                self.buffers.len()
            );
            for buffer in self.buffers.drain(..) {
                std::mem::forget(buffer.samples);
            }
        }
    }
}

/// Where each buffer and channel block lives, as voice offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingLayout {
    buffers: SmallVec<[SampleAddr; 4]>,
    frames: u32,
    channels: u16,
}

impl RingLayout {
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Address of channel `channel`'s block inside buffer `buffer`
    pub fn slice_addr(&self, buffer: usize, channel: usize) -> SampleAddr {
        self.buffers[buffer].add_bytes(channel * self.frames as usize * SAMPLE_BYTES)
    }

    /// Base address for the voice playing `channel`: its block in buffer 0
    pub fn voice_base(&self, channel: usize) -> SampleAddr {
        self.slice_addr(0, channel)
    }

    /// Offset of the first sample of the block, relative to `base`
    pub fn slice_start(&self, base: SampleAddr, buffer: usize, channel: usize) -> u32 {
        self.slice_addr(buffer, channel).offset_from(base)
    }

    /// Offset of the last sample of the block, relative to `base`
    pub fn slice_last(&self, base: SampleAddr, buffer: usize, channel: usize) -> u32 {
        self.slice_start(base, buffer, channel)
            .wrapping_add(self.frames.saturating_sub(1))
    }

    /// Buffer whose block for `channel` contains `offset`.
    ///
    /// The range checked is `start ..= start + frames`: the sample right after
    /// a block still counts as that block, since a voice parked one past its
    /// end has not started reading anything else yet.
    pub fn locate(&self, base: SampleAddr, channel: usize, offset: u32) -> Option<usize> {
        (0..self.buffers.len()).find(|&buffer| {
            let start = self.slice_start(base, buffer, channel);
            offset.wrapping_sub(start) <= self.frames
        })
    }
}

/// Producer and hardware cursors into the ring
#[derive(Debug)]
pub struct RingCursors {
    count: usize,
    rendering: AtomicUsize,
    playing: AtomicUsize,
}

impl RingCursors {
    /// Hardware starts on buffer 0, so the producer starts on buffer 1.
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            count,
            rendering: AtomicUsize::new(1 % count),
            playing: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn rendering(&self) -> usize {
        self.rendering.load(Ordering::Acquire)
    }

    pub fn playing(&self) -> usize {
        self.playing.load(Ordering::Acquire)
    }

    pub fn next(&self, index: usize) -> usize {
        (index + 1) % self.count
    }

    /// Producer side: the buffer at `rendering` is complete. Returns the new
    /// `rendering`.
    pub fn advance_rendering(&self) -> usize {
        let next = self.next(self.rendering.load(Ordering::Relaxed));
        self.rendering.store(next, Ordering::Release);
        next
    }

    /// Hardware side: record the buffer the voices are in. Returns the
    /// previous value.
    pub fn observe_playing(&self, index: usize) -> usize {
        self.playing.swap(index, Ordering::AcqRel)
    }

    /// Whether the producer may write the buffer at `rendering`
    pub fn is_available(&self) -> bool {
        self.rendering() != self.playing()
    }

    pub fn state_of(&self, index: usize) -> BufferState {
        if index == self.playing() {
            BufferState::Playing
        } else if index == self.rendering() {
            BufferState::Filling
        } else {
            BufferState::ReadyToPlay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(addrs: &[usize], frames: u32, channels: u16) -> RingLayout {
        RingLayout {
            buffers: addrs.iter().map(|&a| SampleAddr(a)).collect(),
            frames,
            channels,
        }
    }

    #[test]
    fn test_cursors_start_one_apart() {
        let cursors = RingCursors::new(2);
        assert_eq!(cursors.rendering(), 1);
        assert_eq!(cursors.playing(), 0);
        assert!(cursors.is_available());
        assert_eq!(cursors.state_of(0), BufferState::Playing);
        assert_eq!(cursors.state_of(1), BufferState::Filling);
    }

    #[test]
    fn test_rendering_wraps() {
        let cursors = RingCursors::new(3);
        assert_eq!(cursors.advance_rendering(), 2);
        assert_eq!(cursors.state_of(1), BufferState::ReadyToPlay);
        assert_eq!(cursors.advance_rendering(), 0);
        assert!(!cursors.is_available());
        assert_eq!(cursors.observe_playing(1), 0);
        assert!(cursors.is_available());
    }

    #[test]
    fn test_slice_addresses() {
        let layout = layout(&[0x1000, 0x9000], 512, 2);
        assert_eq!(layout.slice_addr(0, 1), SampleAddr(0x1000 + 1024));
        assert_eq!(layout.voice_base(1), SampleAddr(0x1400));

        let base = layout.voice_base(0);
        assert_eq!(layout.slice_start(base, 1, 0), (0x8000 / 2) as u32);
        assert_eq!(layout.slice_last(base, 0, 0), 511);
    }

    #[test]
    fn test_locate_inclusive_end() {
        let layout = layout(&[0x1000, 0x9000], 512, 2);
        let base = layout.voice_base(0);
        assert_eq!(layout.locate(base, 0, 0), Some(0));
        assert_eq!(layout.locate(base, 0, 512), Some(0));
        assert_eq!(layout.locate(base, 0, 0x4000 + 3), Some(1));
        assert_eq!(layout.locate(base, 0, 513), None);
    }

    #[test]
    fn test_locate_buffer_below_base() {
        // Buffer 1 allocated at a lower address than buffer 0
        let layout = layout(&[0x9000, 0x1000], 256, 1);
        let base = layout.voice_base(0);
        let start = layout.slice_start(base, 1, 0);
        assert_eq!(start, (-0x4000i32) as u32);
        assert_eq!(layout.locate(base, 0, start.wrapping_add(10)), Some(1));
        assert_eq!(base.at_offset(start), SampleAddr(0x1000));
    }
}
