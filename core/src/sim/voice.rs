//! Per-voice state of the simulated engine

use crate::engine::{
    DeviceKind, DeviceMix, MixTarget, SrcMode, VoiceOffsets, VoiceState, VoiceVolume,
};

/// Everything the simulated engine knows about one voice
#[derive(Debug, Clone, PartialEq)]
pub struct SimVoiceState {
    pub acquired: bool,
    pub priority: u32,
    pub state: VoiceState,
    pub offsets: VoiceOffsets,
    pub volume: VoiceVolume,
    pub tv_mix: DeviceMix,
    pub gamepad_mix: DeviceMix,
    pub src_ratio: f32,
    pub src_mode: SrcMode,
    pub loop_count: u32,
    /// Open `begin_voice` calls not yet ended
    pub batch_depth: u32,
    /// Fractional read position between `current` and the next sample
    pub(crate) phase: f32,
}

impl Default for SimVoiceState {
    fn default() -> Self {
        Self {
            acquired: false,
            priority: 0,
            state: VoiceState::Stopped,
            offsets: VoiceOffsets::default(),
            volume: VoiceVolume::UNITY,
            tv_mix: DeviceMix::new(),
            gamepad_mix: DeviceMix::new(),
            src_ratio: 1.0,
            src_mode: SrcMode::Nearest,
            loop_count: 0,
            batch_depth: 0,
            phase: 0.0,
        }
    }
}

impl SimVoiceState {
    pub(crate) fn acquire(priority: u32) -> Self {
        Self {
            acquired: true,
            priority,
            ..Self::default()
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == VoiceState::Playing
    }

    pub fn mix(&self, device: DeviceKind) -> &[MixTarget] {
        match device {
            DeviceKind::Tv => &self.tv_mix,
            DeviceKind::Gamepad => &self.gamepad_mix,
        }
    }

    pub(crate) fn set_mix(&mut self, device: DeviceKind, mix: &[MixTarget]) {
        let slot = match device {
            DeviceKind::Tv => &mut self.tv_mix,
            DeviceKind::Gamepad => &mut self.gamepad_mix,
        };
        slot.clear();
        slot.extend_from_slice(mix);
    }

    /// Offset the voice reads after `current`, following the loop rule
    pub(crate) fn following_offset(&self) -> u32 {
        let offsets = &self.offsets;
        if offsets.current == offsets.end {
            if offsets.looping {
                offsets.loop_offset
            } else {
                offsets.current
            }
        } else {
            offsets.current.wrapping_add(1)
        }
    }

    /// Move past `current`: wrap to the loop offset after `end`, or stop.
    fn step(&mut self) {
        let offsets = &mut self.offsets;
        if offsets.current == offsets.end {
            if offsets.looping {
                offsets.current = offsets.loop_offset;
                self.loop_count = self.loop_count.wrapping_add(1);
            } else {
                self.state = VoiceState::Stopped;
            }
        } else {
            offsets.current = offsets.current.wrapping_add(1);
        }
    }

    /// Advance by one output sample at the voice's SRC ratio.
    pub(crate) fn advance(&mut self) {
        self.phase += self.src_ratio.max(0.0);
        while self.phase >= 1.0 && self.is_playing() {
            self.phase -= 1.0;
            self.step();
        }
    }

    /// Interpolate between the sample at `current` and the one after it.
    pub(crate) fn interpolate(&self, current: i16, following: i16) -> f32 {
        match self.src_mode {
            SrcMode::Nearest => current as f32,
            SrcMode::Linear => {
                let t = self.phase.clamp(0.0, 1.0);
                current as f32 + (following as f32 - current as f32) * t
            }
        }
    }

    /// Gain of this voice into `target`
    pub(crate) fn gain(&self, target: &MixTarget) -> f32 {
        self.volume.gain() * target.volume.gain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SampleAddr;

    fn looping_voice(end: u32) -> SimVoiceState {
        let mut voice = SimVoiceState::acquire(31);
        voice.state = VoiceState::Playing;
        voice.offsets = VoiceOffsets {
            data: SampleAddr(0x1000),
            current: 0,
            loop_offset: 0,
            end,
            looping: true,
        };
        voice
    }

    #[test]
    fn test_step_wraps_after_end() {
        let mut voice = looping_voice(3);
        for _ in 0..4 {
            voice.advance();
        }
        assert_eq!(voice.offsets.current, 0);
        assert_eq!(voice.loop_count, 1);
    }

    #[test]
    fn test_step_stops_without_loop() {
        let mut voice = looping_voice(1);
        voice.offsets.looping = false;
        voice.advance();
        voice.advance();
        assert_eq!(voice.state, VoiceState::Stopped);
        assert_eq!(voice.offsets.current, 1);
    }

    #[test]
    fn test_half_rate_advances_every_other_sample() {
        let mut voice = looping_voice(100);
        voice.src_ratio = 0.5;
        voice.advance();
        assert_eq!(voice.offsets.current, 0);
        voice.advance();
        assert_eq!(voice.offsets.current, 1);
    }

    #[test]
    fn test_linear_interpolation() {
        let mut voice = looping_voice(100);
        voice.src_mode = SrcMode::Linear;
        voice.phase = 0.25;
        assert!((voice.interpolate(0, 100) - 25.0).abs() < 1e-4);

        voice.src_mode = SrcMode::Nearest;
        assert_eq!(voice.interpolate(0, 100), 0.0);
    }

    #[test]
    fn test_following_offset_uses_loop() {
        let mut voice = looping_voice(7);
        voice.offsets.loop_offset = 20;
        voice.offsets.current = 7;
        assert_eq!(voice.following_offset(), 20);
        voice.offsets.current = 3;
        assert_eq!(voice.following_offset(), 4);
    }
}
