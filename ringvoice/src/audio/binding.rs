//! Hardware voice binding
//!
//! One voice per channel, each looping over its channel's block of buffer 0
//! from the moment it starts. Buffer 0 is zeroed, so the hardware plays
//! silence until the first committed buffer is linked in by the frame
//! callback.

use smallvec::SmallVec;
use tracing::{debug, warn};

use ringvoice_core::{
    AudioError, DeviceKind, DeviceMix, MixTarget, OutputChannel, SrcMode, StreamFormat,
    VOICE_PRIORITY_MAX, VoiceBatch, VoiceEngine, VoiceId, VoiceOffsets, VoiceState, VoiceVolume,
};

use super::ring::RingLayout;

/// Per-stream voice parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindSettings {
    pub priority: u32,
    pub volume: VoiceVolume,
}

impl Default for BindSettings {
    fn default() -> Self {
        Self {
            priority: VOICE_PRIORITY_MAX,
            volume: VoiceVolume::UNITY,
        }
    }
}

/// Output routing for each logical channel.
///
/// Stereo sends voice 0 left and voice 1 right; mono sends its one voice to
/// both speakers.
pub fn channel_routing(channels: u16) -> SmallVec<[DeviceMix; 2]> {
    let unity = |channel| MixTarget {
        channel,
        volume: VoiceVolume::UNITY,
    };
    match channels {
        0 | 1 => SmallVec::from_elem(
            DeviceMix::from_slice(&[unity(OutputChannel::Left), unity(OutputChannel::Right)]),
            1,
        ),
        _ => [OutputChannel::Left, OutputChannel::Right]
            .into_iter()
            .map(|channel| DeviceMix::from_slice(&[unity(channel)]))
            .collect(),
    }
}

/// Voices bound to the ring, one per channel
#[derive(Debug)]
pub struct VoiceBinding {
    voices: SmallVec<[VoiceId; 2]>,
    initial_loop_count: u32,
}

impl VoiceBinding {
    /// Acquire, configure and start one voice per channel.
    ///
    /// Voice configuration must run on the engine's main core; the caller
    /// pins the thread. If a voice can't be acquired the ones already taken
    /// are freed again.
    pub fn bind<E: VoiceEngine + ?Sized>(
        engine: &E,
        format: &StreamFormat,
        layout: &RingLayout,
        settings: &BindSettings,
    ) -> Result<Self, AudioError> {
        let channels = format.channels() as usize;
        let mut binding = Self {
            voices: SmallVec::with_capacity(channels),
            initial_loop_count: 0,
        };

        for channel in 0..channels {
            match engine.acquire_voice(settings.priority) {
                Some(voice) => binding.voices.push(voice),
                None => {
                    warn!(
                        "No free voice for channel {} of {} at priority {}",
                        channel, channels, settings.priority
                    );
                    binding.release(engine);
                    return Err(AudioError::out_of_memory(format!(
                        "hardware voice for channel {channel}"
                    )));
                }
            }
        }

        let routing = channel_routing(format.channels());
        let ratio = format.src_ratio(engine.input_sample_rate());

        binding.initial_loop_count = binding
            .voices
            .first()
            .map(|&voice| engine.loop_count(voice))
            .unwrap_or(0);

        for (channel, (&voice, mix)) in binding.voices.iter().zip(&routing).enumerate() {
            let _batch = VoiceBatch::begin(engine, voice);
            engine.set_voice_volume(voice, settings.volume);
            engine.set_device_mix(voice, DeviceKind::Gamepad, mix);
            engine.set_device_mix(voice, DeviceKind::Tv, mix);
            engine.set_src(voice, ratio, SrcMode::Linear);
            engine.set_offsets(
                voice,
                &VoiceOffsets {
                    data: layout.voice_base(channel),
                    current: 0,
                    loop_offset: 0,
                    end: layout.frames(),
                    looping: true,
                },
            );
            engine.set_state(voice, VoiceState::Playing);
        }

        debug!(
            "Bound {} voices, src ratio {:.4}, loop count {}",
            binding.voices.len(),
            ratio,
            binding.initial_loop_count
        );
        Ok(binding)
    }

    pub fn voices(&self) -> &[VoiceId] {
        &self.voices
    }

    /// Voice loop counter when playback started
    pub fn initial_loop_count(&self) -> u32 {
        self.initial_loop_count
    }

    /// Stop and free every voice.
    pub fn release<E: VoiceEngine + ?Sized>(&mut self, engine: &E) {
        for voice in self.voices.drain(..) {
            engine.set_state(voice, VoiceState::Stopped);
            engine.free_voice(voice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_routing() {
        let routing = channel_routing(2);
        assert_eq!(routing.len(), 2);
        assert_eq!(routing[0].len(), 1);
        assert_eq!(routing[0][0].channel, OutputChannel::Left);
        assert_eq!(routing[1][0].channel, OutputChannel::Right);
        assert!(routing.iter().flatten().all(|t| t.volume == VoiceVolume::UNITY));
    }

    #[test]
    fn test_mono_routing() {
        let routing = channel_routing(1);
        assert_eq!(routing.len(), 1);
        let channels: Vec<_> = routing[0].iter().map(|t| t.channel).collect();
        assert_eq!(channels, [OutputChannel::Left, OutputChannel::Right]);
    }
}
