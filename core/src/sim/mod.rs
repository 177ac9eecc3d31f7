//! Software voice engine
//!
//! `SimVoiceEngine` implements [`VoiceEngine`] on the host so the streaming
//! coordinator can be exercised without console hardware:
//!
//! - `step()` runs one audio frame: the frame callback first, then
//!   `samples_per_frame` output samples per playing voice
//! - voices read big-endian samples only from memory handed out by
//!   `alloc_samples`; anything else plays as silence and is counted
//! - the mixed TV output can be captured through a [`SampleSink`]
//! - [`SimClock`] drives `step()` from a thread at the hardware frame rate
//!
//! Lock order: callback → voices → memory → sink.

mod clock;
mod voice;


use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::{debug, trace, warn};

use crate::engine::{
    CoreMask, DeviceKind, FrameCallback, MixTarget, OutputChannel, Renderer, SAMPLE_BYTES,
    SampleAddr, SrcMode, VOICE_PRIORITY_MAX, VoiceEngine, VoiceId, VoiceOffsets, VoiceState,
    VoiceVolume,
};
use crate::error::AudioError;

pub use clock::SimClock;
pub use voice::SimVoiceState;

/// Receives the engine's mixed TV output, interleaved stereo, once per frame
pub trait SampleSink: Send {
    fn write(&mut self, frames: &[i16]);
}

/// Sink that appends everything to a shared vector
#[derive(Clone, Default)]
pub struct CaptureSink {
    samples: Arc<Mutex<Vec<i16>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far
    pub fn samples(&self) -> Vec<i16> {
        lock(&self.samples).clone()
    }

    pub fn clear(&self) {
        lock(&self.samples).clear();
    }
}

impl SampleSink for CaptureSink {
    fn write(&mut self, frames: &[i16]) {
        lock(&self.samples).extend_from_slice(frames);
    }
}

/// Simulated hardware limits
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub max_voices: usize,
    /// Core voice configuration calls are expected on
    pub main_core: CoreMask,
    /// Total bytes `alloc_samples` may hand out (`None` = unlimited)
    pub memory_budget: Option<usize>,
    /// Make `init` fail, as if the engine were owned elsewhere
    pub fail_init: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_voices: 96,
            main_core: CoreMask::CORE1,
            memory_budget: None,
            fail_init: false,
        }
    }
}

/// Counters for assertions and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimStats {
    pub initialized: bool,
    /// Frames rendered since creation
    pub frames: u64,
    pub flushes: u64,
    pub flushed_bytes: u64,
    pub live_allocations: usize,
    pub bytes_in_use: usize,
    pub acquired_voices: usize,
    /// Voice configuration calls made off the main core
    pub off_core_calls: u64,
    /// Samples read outside allocated memory (played as silence)
    pub invalid_reads: u64,
    /// Voices set playing outside a begin/end batch
    pub unbatched_starts: u64,
}

#[derive(Default)]
struct Memory {
    /// start address → length in bytes
    regions: BTreeMap<usize, usize>,
    bytes_in_use: usize,
}

impl Memory {
    fn contains(&self, addr: usize, bytes: usize) -> bool {
        self.regions
            .range(..=addr)
            .next_back()
            .is_some_and(|(&start, &len)| addr + bytes <= start + len)
    }
}

/// Host implementation of the console voice engine
pub struct SimVoiceEngine {
    config: SimConfig,
    initialized: AtomicBool,
    renderer: Mutex<Renderer>,
    voices: Mutex<Vec<SimVoiceState>>,
    callback: Mutex<Option<FrameCallback>>,
    memory: Mutex<Memory>,
    affinity: Mutex<HashMap<ThreadId, CoreMask>>,
    priority_raises: Mutex<HashMap<ThreadId, u32>>,
    sink: Mutex<Option<Box<dyn SampleSink>>>,
    frames: AtomicU64,
    flushes: AtomicU64,
    flushed_bytes: AtomicU64,
    off_core_calls: AtomicU64,
    invalid_reads: AtomicU64,
    unbatched_starts: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("Sim engine mutex poisoned, recovering");
        e.into_inner()
    })
}

impl SimVoiceEngine {
    pub fn new(config: SimConfig) -> Self {
        let voices = vec![SimVoiceState::default(); config.max_voices];
        Self {
            config,
            initialized: AtomicBool::new(false),
            renderer: Mutex::new(Renderer::default()),
            voices: Mutex::new(voices),
            callback: Mutex::new(None),
            memory: Mutex::new(Memory::default()),
            affinity: Mutex::new(HashMap::new()),
            priority_raises: Mutex::new(HashMap::new()),
            sink: Mutex::new(None),
            frames: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            flushed_bytes: AtomicU64::new(0),
            off_core_calls: AtomicU64::new(0),
            invalid_reads: AtomicU64::new(0),
            unbatched_starts: AtomicU64::new(0),
        }
    }

    /// Route the mixed TV output to `sink` (replacing any previous sink).
    pub fn set_sink(&self, sink: impl SampleSink + 'static) {
        *lock(&self.sink) = Some(Box::new(sink));
    }

    pub fn clear_sink(&self) {
        *lock(&self.sink) = None;
    }

    pub fn has_frame_callback(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// State of an acquired voice
    pub fn voice_snapshot(&self, voice: VoiceId) -> Option<SimVoiceState> {
        lock(&self.voices)
            .get(voice.0 as usize)
            .filter(|v| v.acquired)
            .cloned()
    }

    /// Move a voice's read position, as if the hardware had drifted there.
    pub fn force_current_offset(&self, voice: VoiceId, offset: u32) {
        self.with_voice(voice, |v| {
            v.offsets.current = offset;
            v.phase = 0.0;
        });
    }

    /// Times `raise_thread_priority` was called from the current thread
    pub fn priority_raises(&self) -> u32 {
        lock(&self.priority_raises)
            .get(&thread::current().id())
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> SimStats {
        let acquired_voices = lock(&self.voices).iter().filter(|v| v.acquired).count();
        let memory = lock(&self.memory);
        SimStats {
            initialized: self.is_initialized(),
            frames: self.frames.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flushed_bytes: self.flushed_bytes.load(Ordering::Relaxed),
            live_allocations: memory.regions.len(),
            bytes_in_use: memory.bytes_in_use,
            acquired_voices,
            off_core_calls: self.off_core_calls.load(Ordering::Relaxed),
            invalid_reads: self.invalid_reads.load(Ordering::Relaxed),
            unbatched_starts: self.unbatched_starts.load(Ordering::Relaxed),
        }
    }

    /// Run one audio frame.
    ///
    /// Invokes the frame callback, then renders `samples_per_frame` samples
    /// of every playing voice and hands the TV mix to the sink. Does nothing
    /// while the engine is not initialised.
    pub fn step(&self) {
        if !self.is_initialized() {
            return;
        }
        self.frames.fetch_add(1, Ordering::Relaxed);

        {
            // Held across the call so unregister waits for us
            let mut callback = lock(&self.callback);
            if let Some(callback) = callback.as_mut() {
                callback();
            }
        }

        let len = self.samples_per_frame() as usize;
        let mut mixed = vec![0.0f32; len * 2];
        {
            let mut voices = lock(&self.voices);
            let memory = lock(&self.memory);
            for voice in voices.iter_mut().filter(|v| v.acquired) {
                for frame in mixed.chunks_exact_mut(2) {
                    if !voice.is_playing() {
                        break;
                    }
                    let current = self.read_sample(&memory, voice.offsets.data, voice.offsets.current);
                    let following = match voice.src_mode {
                        SrcMode::Nearest => current,
                        SrcMode::Linear => {
                            self.read_sample(&memory, voice.offsets.data, voice.following_offset())
                        }
                    };
                    let value = voice.interpolate(current, following);
                    for target in &voice.tv_mix {
                        let slot = match target.channel {
                            OutputChannel::Left => 0,
                            OutputChannel::Right => 1,
                        };
                        frame[slot] += value * voice.gain(target);
                    }
                    voice.advance();
                }
            }
        }

        let mut sink = lock(&self.sink);
        if let Some(sink) = sink.as_mut() {
            let out: Vec<i16> = mixed
                .iter()
                .map(|s| s.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
                .collect();
            sink.write(&out);
        }
    }

    fn read_sample(&self, memory: &Memory, base: SampleAddr, offset: u32) -> i16 {
        let addr = base.at_offset(offset).0;
        if addr % SAMPLE_BYTES != 0 || !memory.contains(addr, SAMPLE_BYTES) {
            self.invalid_reads.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
        // SAFETY: the address lies inside a live allocation from
        // `alloc_samples` (the memory lock keeps it from being released) and
        // is aligned for i16.
        let raw = unsafe { std::ptr::read_volatile(addr as *const i16) };
        i16::from_be(raw)
    }

    fn with_voice<R>(&self, voice: VoiceId, f: impl FnOnce(&mut SimVoiceState) -> R) -> Option<R> {
        let mut voices = lock(&self.voices);
        match voices.get_mut(voice.0 as usize) {
            Some(state) if state.acquired => Some(f(state)),
            _ => {
                warn!("Call on unknown or free voice {:?}", voice);
                None
            }
        }
    }

    fn check_main_core(&self, call: &str) {
        let current = self.thread_affinity();
        if current != self.config.main_core {
            self.off_core_calls.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{} called with affinity {:?}, expected {:?}",
                call, current, self.config.main_core
            );
        }
    }
}

impl VoiceEngine for SimVoiceEngine {
    fn init(&self, renderer: Renderer) -> Result<(), AudioError> {
        if self.config.fail_init {
            return Err(AudioError::unavailable("voice engine refused to start"));
        }
        *lock(&self.renderer) = renderer;
        self.initialized.store(true, Ordering::Release);
        debug!("Sim voice engine up at {} Hz", renderer.sample_rate());
        Ok(())
    }

    fn quit(&self) {
        *lock(&self.callback) = None;
        for voice in lock(&self.voices).iter_mut() {
            *voice = SimVoiceState::default();
        }
        self.initialized.store(false, Ordering::Release);
        debug!("Sim voice engine down");
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn input_sample_rate(&self) -> u32 {
        lock(&self.renderer).sample_rate()
    }

    fn samples_per_frame(&self) -> u32 {
        lock(&self.renderer).samples_per_frame()
    }

    fn main_core(&self) -> CoreMask {
        self.config.main_core
    }

    fn acquire_voice(&self, priority: u32) -> Option<VoiceId> {
        self.check_main_core("acquire_voice");
        let priority = priority.min(VOICE_PRIORITY_MAX);
        let mut voices = lock(&self.voices);
        let index = voices.iter().position(|v| !v.acquired)?;
        voices[index] = SimVoiceState::acquire(priority);
        trace!("Acquired voice {} at priority {}", index, priority);
        Some(VoiceId(index as u32))
    }

    fn free_voice(&self, voice: VoiceId) {
        self.check_main_core("free_voice");
        self.with_voice(voice, |v| *v = SimVoiceState::default());
    }

    fn begin_voice(&self, voice: VoiceId) {
        self.check_main_core("begin_voice");
        self.with_voice(voice, |v| v.batch_depth += 1);
    }

    fn end_voice(&self, voice: VoiceId) {
        self.with_voice(voice, |v| v.batch_depth = v.batch_depth.saturating_sub(1));
    }

    fn set_voice_volume(&self, voice: VoiceId, volume: VoiceVolume) {
        self.with_voice(voice, |v| v.volume = volume);
    }

    fn set_device_mix(&self, voice: VoiceId, device: DeviceKind, mix: &[MixTarget]) {
        self.with_voice(voice, |v| v.set_mix(device, mix));
    }

    fn set_src(&self, voice: VoiceId, ratio: f32, mode: SrcMode) {
        self.with_voice(voice, |v| {
            v.src_ratio = ratio;
            v.src_mode = mode;
        });
    }

    fn set_offsets(&self, voice: VoiceId, offsets: &VoiceOffsets) {
        self.with_voice(voice, |v| {
            v.offsets = *offsets;
            v.phase = 0.0;
        });
    }

    fn offsets(&self, voice: VoiceId) -> VoiceOffsets {
        self.with_voice(voice, |v| v.offsets).unwrap_or_default()
    }

    fn set_loop_offset(&self, voice: VoiceId, offset: u32) {
        self.with_voice(voice, |v| v.offsets.loop_offset = offset);
    }

    fn set_end_offset(&self, voice: VoiceId, offset: u32) {
        self.with_voice(voice, |v| v.offsets.end = offset);
    }

    fn set_state(&self, voice: VoiceId, state: VoiceState) {
        self.check_main_core("set_state");
        let unbatched = self.with_voice(voice, |v| {
            v.state = state;
            state == VoiceState::Playing && v.batch_depth == 0
        });
        if unbatched == Some(true) {
            self.unbatched_starts.fetch_add(1, Ordering::Relaxed);
            warn!("Voice {:?} started outside a parameter batch", voice);
        }
    }

    fn loop_count(&self, voice: VoiceId) -> u32 {
        self.with_voice(voice, |v| v.loop_count).unwrap_or(0)
    }

    fn register_frame_callback(&self, callback: FrameCallback) -> Result<(), AudioError> {
        if !self.is_initialized() {
            return Err(AudioError::unavailable("voice engine not initialised"));
        }
        let mut slot = lock(&self.callback);
        if slot.is_some() {
            return Err(AudioError::unavailable("frame callback already registered"));
        }
        *slot = Some(callback);
        Ok(())
    }

    fn unregister_frame_callback(&self) {
        // Blocks while step() is running the callback
        lock(&self.callback).take();
    }

    fn alloc_samples(&self, len: usize) -> Option<Box<[i16]>> {
        let bytes = len.checked_mul(SAMPLE_BYTES)?;
        let mut memory = lock(&self.memory);
        if let Some(budget) = self.config.memory_budget
            && memory.bytes_in_use + bytes > budget
        {
            debug!("Sim allocation of {} bytes over budget", bytes);
            return None;
        }

        let mut samples = Vec::new();
        samples.try_reserve_exact(len).ok()?;
        samples.resize(len, 0i16);
        let samples = samples.into_boxed_slice();

        if bytes > 0 {
            memory.regions.insert(SampleAddr::of(&samples).0, bytes);
            memory.bytes_in_use += bytes;
        }
        Some(samples)
    }

    fn release_samples(&self, samples: Box<[i16]>) {
        let mut memory = lock(&self.memory);
        if let Some(bytes) = memory.regions.remove(&SampleAddr::of(&samples).0) {
            memory.bytes_in_use -= bytes;
        }
        drop(samples);
    }

    fn flush_range(&self, _addr: SampleAddr, bytes: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flushed_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn thread_affinity(&self) -> CoreMask {
        lock(&self.affinity)
            .get(&thread::current().id())
            .copied()
            .unwrap_or(CoreMask::ANY)
    }

    fn set_thread_affinity(&self, mask: CoreMask) {
        lock(&self.affinity).insert(thread::current().id(), mask);
    }

    fn raise_thread_priority(&self) {
        *lock(&self.priority_raises)
            .entry(thread::current().id())
            .or_insert(0) += 1;
    }
}
