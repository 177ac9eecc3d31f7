//! Voice engine interface
//!
//! The console mixes audio in fixed hardware voices. Each voice walks a
//! region of sample memory at a fixed rate, plays the sample at its end
//! offset and then jumps to its loop offset (or stops). Offsets are counted
//! in samples from the voice's `data` base address.
//!
//! The engine also owns the audio clock: once per audio frame (3 ms) it
//! invokes the registered frame callback *before* it renders that frame.

use smallvec::SmallVec;

use crate::error::AudioError;

/// Bytes per sample of the only encoding voices play (signed 16-bit PCM).
pub const SAMPLE_BYTES: usize = 2;

/// Highest voice priority. Voices at this priority are never stolen.
pub const VOICE_PRIORITY_MAX: u32 = 31;

/// Address of a sample as seen by the voice hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SampleAddr(pub usize);

impl SampleAddr {
    /// Address of the first element of `samples`.
    pub fn of(samples: &[i16]) -> Self {
        Self(samples.as_ptr() as usize)
    }

    pub fn add_bytes(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    /// Voice offset of `self` relative to `base`, in samples.
    ///
    /// Offsets are 32-bit two's complement distances: a sample below the
    /// voice base gets a wrapped offset which [`SampleAddr::at_offset`] maps
    /// back to the same address.
    pub fn offset_from(self, base: SampleAddr) -> u32 {
        let bytes = self.0.wrapping_sub(base.0) as isize;
        (bytes / SAMPLE_BYTES as isize) as u32
    }

    /// Address of the sample `offset` samples away from `self`.
    pub fn at_offset(self, offset: u32) -> SampleAddr {
        let bytes = (offset as i32 as isize) * SAMPLE_BYTES as isize;
        SampleAddr(self.0.wrapping_add_signed(bytes))
    }
}

/// Handle to an acquired hardware voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u32);

/// Playback window of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceOffsets {
    /// Base address all offsets are relative to
    pub data: SampleAddr,
    /// Sample the voice reads next
    pub current: u32,
    /// Where the voice jumps after playing `end`
    pub loop_offset: u32,
    /// Last sample played before looping (inclusive)
    pub end: u32,
    pub looping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Stopped,
    Playing,
}

/// Sample-rate conversion filter used by a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SrcMode {
    /// Nearest sample, no interpolation
    #[default]
    Nearest,
    /// Linear interpolation between neighbouring samples
    Linear,
}

/// Voice or mix volume register (0x8000 = unity gain)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceVolume(pub u16);

impl VoiceVolume {
    pub const UNITY: VoiceVolume = VoiceVolume(0x8000);
    pub const SILENT: VoiceVolume = VoiceVolume(0);

    /// Convert a linear gain (0.0 - 1.0) to a register value.
    pub fn from_gain(gain: f32) -> Self {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        Self((gain * Self::UNITY.0 as f32).round() as u16)
    }

    pub fn gain(self) -> f32 {
        self.0 as f32 / Self::UNITY.0 as f32
    }
}

impl Default for VoiceVolume {
    fn default() -> Self {
        Self::UNITY
    }
}

/// Physical output a voice can be mixed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Main television output
    Tv,
    /// Controller speaker output
    Gamepad,
}

/// Speaker channel of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    Left,
    Right,
}

/// One routing entry: send the voice to `channel` of a device at `volume`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixTarget {
    pub channel: OutputChannel,
    pub volume: VoiceVolume,
}

/// Sparse mix of one voice into one device (only the channels it feeds)
pub type DeviceMix = SmallVec<[MixTarget; 2]>;

/// Engine render rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Renderer {
    #[default]
    Hz48,
    Hz32,
}

impl Renderer {
    /// Audio frame length in milliseconds (one frame callback per frame)
    pub const FRAME_MS: u32 = 3;

    pub fn sample_rate(self) -> u32 {
        match self {
            Renderer::Hz48 => 48_000,
            Renderer::Hz32 => 32_000,
        }
    }

    /// Samples rendered per voice per audio frame
    pub fn samples_per_frame(self) -> u32 {
        self.sample_rate() * Self::FRAME_MS / 1000
    }
}

/// Set of CPU cores a thread may run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreMask(pub u32);

impl CoreMask {
    pub const CORE0: CoreMask = CoreMask(1 << 0);
    pub const CORE1: CoreMask = CoreMask(1 << 1);
    pub const CORE2: CoreMask = CoreMask(1 << 2);
    pub const ANY: CoreMask = CoreMask(0b111);
}

/// Function invoked by the engine once per audio frame.
///
/// Runs on the engine's own clock, so it must be short and must not block.
pub type FrameCallback = Box<dyn FnMut() + Send + 'static>;

/// Console voice engine
///
/// All methods take `&self`: the engine is a process-wide singleton in
/// hardware and implementations synchronise internally.
pub trait VoiceEngine: Send + Sync + 'static {
    /// Bring the engine up with the given renderer.
    fn init(&self, renderer: Renderer) -> Result<(), AudioError>;

    /// Shut the engine down.
    fn quit(&self);

    fn is_initialized(&self) -> bool;

    /// Native render rate of the running engine
    fn input_sample_rate(&self) -> u32;

    /// Samples each voice consumes per frame callback at a 1.0 SRC ratio
    fn samples_per_frame(&self) -> u32;

    /// Core that voice configuration calls must be issued from
    fn main_core(&self) -> CoreMask;

    /// Acquire a free voice at `priority` (0 ..= [`VOICE_PRIORITY_MAX`]).
    /// Returns `None` when no voice is free.
    fn acquire_voice(&self, priority: u32) -> Option<VoiceId>;

    fn free_voice(&self, voice: VoiceId);

    /// Start a batch of voice parameter changes (applied atomically at
    /// [`VoiceEngine::end_voice`]).
    fn begin_voice(&self, voice: VoiceId);

    fn end_voice(&self, voice: VoiceId);

    fn set_voice_volume(&self, voice: VoiceId, volume: VoiceVolume);

    /// Replace the voice's routing into `device`. Channels not listed are muted.
    fn set_device_mix(&self, voice: VoiceId, device: DeviceKind, mix: &[MixTarget]);

    /// Set sample-rate conversion: `ratio` = source rate / engine rate.
    fn set_src(&self, voice: VoiceId, ratio: f32, mode: SrcMode);

    fn set_offsets(&self, voice: VoiceId, offsets: &VoiceOffsets);

    /// Live offsets of the voice
    fn offsets(&self, voice: VoiceId) -> VoiceOffsets;

    fn set_loop_offset(&self, voice: VoiceId, offset: u32);

    fn set_end_offset(&self, voice: VoiceId, offset: u32);

    fn set_state(&self, voice: VoiceId, state: VoiceState);

    /// Number of times the voice has wrapped from `end` to `loop_offset`
    fn loop_count(&self, voice: VoiceId) -> u32;

    /// Install the application frame callback.
    ///
    /// Fails with [`AudioError::DeviceUnavailable`] if another callback is
    /// already installed.
    fn register_frame_callback(&self, callback: FrameCallback) -> Result<(), AudioError>;

    /// Remove the application frame callback.
    ///
    /// Must not return while an invocation is still running.
    fn unregister_frame_callback(&self);

    /// Allocate zeroed sample memory the voices can read.
    fn alloc_samples(&self, len: usize) -> Option<Box<[i16]>> {
        let mut samples = Vec::new();
        samples.try_reserve_exact(len).ok()?;
        samples.resize(len, 0);
        Some(samples.into_boxed_slice())
    }

    /// Return memory obtained from [`VoiceEngine::alloc_samples`].
    fn release_samples(&self, samples: Box<[i16]>) {
        drop(samples);
    }

    /// Write back CPU caches for `bytes` starting at `addr` so the voice DMA
    /// sees the data.
    fn flush_range(&self, addr: SampleAddr, bytes: usize);

    fn thread_affinity(&self) -> CoreMask;

    fn set_thread_affinity(&self, mask: CoreMask);

    /// Raise the calling thread's scheduling priority by one step.
    fn raise_thread_priority(&self) {}
}

/// Voice parameter batch, ended on drop
pub struct VoiceBatch<'a, E: VoiceEngine + ?Sized> {
    engine: &'a E,
    voice: VoiceId,
}

impl<'a, E: VoiceEngine + ?Sized> VoiceBatch<'a, E> {
    pub fn begin(engine: &'a E, voice: VoiceId) -> Self {
        engine.begin_voice(voice);
        Self { engine, voice }
    }
}

impl<E: VoiceEngine + ?Sized> Drop for VoiceBatch<'_, E> {
    fn drop(&mut self) {
        self.engine.end_voice(self.voice);
    }
}

/// Pins the calling thread to a core set; restores the previous affinity on drop
pub struct AffinityGuard<'a, E: VoiceEngine + ?Sized> {
    engine: &'a E,
    previous: CoreMask,
}

impl<'a, E: VoiceEngine + ?Sized> AffinityGuard<'a, E> {
    pub fn pin(engine: &'a E, mask: CoreMask) -> Self {
        let previous = engine.thread_affinity();
        engine.set_thread_affinity(mask);
        Self { engine, previous }
    }
}

impl<E: VoiceEngine + ?Sized> Drop for AffinityGuard<'_, E> {
    fn drop(&mut self) {
        self.engine.set_thread_affinity(self.previous);
    }
}
