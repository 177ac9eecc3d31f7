//! Audio output device
//!
//! Lifecycle of one stream: `open` → (`render_buffer` → fill → `commit` →
//! `wait`)* → `close`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use ringvoice_core::{
    AffinityGuard, AudioConfig, AudioError, AudioHardware, DesyncRecovery, EngineLease,
    StreamFormat, StreamRequest, VOICE_PRIORITY_MAX, VoiceEngine, VoiceId, VoiceVolume,
};

use super::binding::{BindSettings, VoiceBinding};
use super::deinterleave::Deinterleaver;
use super::frame_sync::{FrameSync, SyncStatsSnapshot};
use super::ring::{BufferRing, RingCursors};

/// Fewest buffers the hand-off works with
pub const MIN_BUFFERS: usize = 2;

/// Device parameters beyond the stream format
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// Buffers in the ring (raised to [`MIN_BUFFERS`])
    pub buffer_count: usize,
    /// Fallback wake-up period of `wait`
    pub poll_interval: Duration,
    pub voice_priority: u32,
    pub volume: VoiceVolume,
    pub desync_recovery: DesyncRecovery,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            buffer_count: MIN_BUFFERS,
            poll_interval: Duration::from_millis(3),
            voice_priority: VOICE_PRIORITY_MAX,
            volume: VoiceVolume::UNITY,
            desync_recovery: DesyncRecovery::default(),
        }
    }
}

impl From<&AudioConfig> for DeviceSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            buffer_count: config.buffer_count.max(MIN_BUFFERS),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            voice_priority: config.voice_priority.min(VOICE_PRIORITY_MAX),
            volume: VoiceVolume::from_gain(config.master_volume),
            desync_recovery: config.desync_recovery,
        }
    }
}

impl DeviceSettings {
    fn bind_settings(&self) -> BindSettings {
        BindSettings {
            priority: self.voice_priority,
            volume: self.volume,
        }
    }
}

/// The buffer the producer fills next, still interleaved
pub struct RenderBuffer<'a> {
    samples: &'a mut [i16],
    channels: u16,
}

impl<'a> RenderBuffer<'a> {
    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Raw samples, already in the hardware's big-endian encoding
    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut *self.samples
    }

    /// The buffer as bytes, for mixers that produce S16BE directly
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut *self.samples)
    }

    /// Store one frame of native-endian samples (one per channel).
    pub fn write_frame(&mut self, frame: usize, values: &[i16]) {
        let channels = self.channels as usize;
        let start = frame * channels;
        for (slot, value) in self.samples[start..start + channels].iter_mut().zip(values) {
            *slot = value.to_be();
        }
    }

    pub fn fill_silence(&mut self) {
        self.samples.fill(0);
    }
}

/// An open output stream on the voice engine
pub struct AudioDevice<E: VoiceEngine> {
    hardware: AudioHardware<E>,
    /// `None` once closed
    lease: Option<EngineLease<E>>,
    format: StreamFormat,
    ring: BufferRing,
    binding: VoiceBinding,
    sync: Arc<FrameSync>,
    deinterleaver: Deinterleaver,
    poll_interval: Duration,
}

impl<E: VoiceEngine> AudioDevice<E> {
    /// Open a stream: negotiate the format, allocate the ring, start the
    /// voices on buffer 0 and install the frame callback.
    ///
    /// Any failure releases everything acquired so far.
    pub fn open(
        hardware: &AudioHardware<E>,
        request: &StreamRequest,
        settings: &DeviceSettings,
    ) -> Result<Self, AudioError> {
        let lease = hardware.lease()?;
        let engine = hardware.engine();

        let format = StreamFormat::negotiate(
            request,
            engine.input_sample_rate(),
            engine.samples_per_frame(),
        );
        if format.channels() != request.channels
            || format.frames() != request.frames
            || format.format() != request.format
        {
            debug!(
                "Requested {} ch {} x{} frames, negotiated {}",
                request.channels, request.format, request.frames, format
            );
        }
        let buffer_count = settings.buffer_count.max(MIN_BUFFERS);

        let (mut ring, mut binding) = {
            let _pin = AffinityGuard::pin(engine, engine.main_core());
            let mut ring = BufferRing::allocate(engine, &format, buffer_count)?;
            match VoiceBinding::bind(engine, &format, &ring.layout(), &settings.bind_settings()) {
                Ok(binding) => (ring, binding),
                Err(e) => {
                    ring.release(engine);
                    return Err(e);
                }
            }
        };

        let sync = Arc::new(FrameSync::new(
            ring.layout(),
            binding.voices(),
            settings.desync_recovery,
        ));

        let callback_sync = Arc::clone(&sync);
        let weak = hardware.downgrade();
        let registered = engine.register_frame_callback(Box::new(move || {
            if let Some(hardware) = weak.upgrade() {
                callback_sync.on_frame(hardware.engine());
            }
        }));
        if let Err(e) = registered {
            {
                let _pin = AffinityGuard::pin(engine, engine.main_core());
                binding.release(engine);
            }
            ring.release(engine);
            return Err(e);
        }

        info!(
            "Audio device open: {}, {} buffers of {} bytes",
            format,
            buffer_count,
            format.buffer_bytes()
        );

        Ok(Self {
            hardware: hardware.clone(),
            lease: Some(lease),
            format,
            ring,
            binding,
            sync,
            deinterleaver: Deinterleaver::new(format.frames() as usize, format.channels() as usize),
            poll_interval: settings.poll_interval,
        })
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn engine(&self) -> &E {
        self.hardware.engine()
    }

    pub fn hardware(&self) -> &AudioHardware<E> {
        &self.hardware
    }

    pub fn sync(&self) -> &Arc<FrameSync> {
        &self.sync
    }

    pub fn sync_stats(&self) -> SyncStatsSnapshot {
        self.sync.stats().snapshot()
    }

    pub fn cursors(&self) -> &RingCursors {
        self.sync.cursors()
    }

    pub fn ring(&self) -> &BufferRing {
        &self.ring
    }

    pub fn voices(&self) -> &[VoiceId] {
        self.binding.voices()
    }

    pub fn initial_loop_count(&self) -> u32 {
        self.binding.initial_loop_count()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The buffer at `rendering`. Contents are whatever was there before.
    pub fn render_buffer(&mut self) -> RenderBuffer<'_> {
        let index = self.sync.cursors().rendering();
        RenderBuffer {
            samples: self.ring.buffer_mut(index).samples_mut(),
            channels: self.format.channels(),
        }
    }

    /// Hand the filled buffer to the hardware and move on to the next one.
    ///
    /// Never blocks; call [`AudioDevice::wait`] before rendering again.
    pub fn commit(&mut self) {
        let index = self.sync.cursors().rendering();
        let buffer = self.ring.buffer_mut(index);
        self.deinterleaver.apply(buffer.samples_mut());
        self.hardware
            .engine()
            .flush_range(buffer.addr(), buffer.len_bytes());
        let next = self.sync.cursors().advance_rendering();
        trace!("Committed buffer {}, rendering {}", index, next);
    }

    /// Whether the buffer at `rendering` is free to write
    pub fn is_buffer_available(&self) -> bool {
        self.sync.cursors().is_available()
    }

    /// Block until the hardware has left the buffer at `rendering`.
    ///
    /// No timeout: a stalled engine blocks forever. Use
    /// [`AudioDevice::wait_timeout`] when the caller needs to stay responsive.
    pub fn wait(&self) {
        while !self.sync.wait_available(self.poll_interval) {}
    }

    /// Like [`AudioDevice::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.sync.wait_available(timeout)
    }

    /// Stop the voices and release the ring and the engine.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        let engine = self.hardware.engine();

        // No callback can be running once this returns
        engine.unregister_frame_callback();
        {
            let _pin = AffinityGuard::pin(engine, engine.main_core());
            self.binding.release(engine);
        }
        self.ring.release(engine);

        let stats = self.sync.stats().snapshot();
        info!(
            "Audio device closed: {} frames, {} switches, {} stalls, {} desyncs",
            stats.frames, stats.switches, stats.stalls, stats.desyncs
        );
        drop(lease);
    }
}

impl<E: VoiceEngine> Drop for AudioDevice<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
