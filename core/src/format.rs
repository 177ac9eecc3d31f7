//! Stream format negotiation
//!
//! Callers ask for whatever the generic mixer produces; the voice hardware
//! only plays signed 16-bit big-endian PCM in one or two channels, with at
//! least one audio frame's worth of samples per buffer.

use std::fmt;

use crate::engine::SAMPLE_BYTES;

/// Channels the voice binding can route (mono or stereo)
pub const MAX_CHANNELS: u16 = 2;

/// The only encoding the voice hardware reads
pub const NATIVE_FORMAT: SampleFormat = SampleFormat::S16Be;

/// PCM sample encodings a caller may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    U8,
    S8,
    U16Le,
    U16Be,
    S16Le,
    #[default]
    S16Be,
    S32Le,
    S32Be,
    F32Le,
    F32Be,
}

impl SampleFormat {
    pub fn bits(self) -> u16 {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 8,
            SampleFormat::U16Le | SampleFormat::U16Be | SampleFormat::S16Le | SampleFormat::S16Be => 16,
            SampleFormat::S32Le | SampleFormat::S32Be | SampleFormat::F32Le | SampleFormat::F32Be => 32,
        }
    }

    pub fn is_big_endian(self) -> bool {
        matches!(
            self,
            SampleFormat::U16Be | SampleFormat::S16Be | SampleFormat::S32Be | SampleFormat::F32Be
        )
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S8 => "s8",
            SampleFormat::U16Le => "u16le",
            SampleFormat::U16Be => "u16be",
            SampleFormat::S16Le => "s16le",
            SampleFormat::S16Be => "s16be",
            SampleFormat::S32Le => "s32le",
            SampleFormat::S32Be => "s32be",
            SampleFormat::F32Le => "f32le",
            SampleFormat::F32Be => "f32be",
        };
        f.write_str(name)
    }
}

/// Format requested by the caller at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Frames per second (0 = engine native rate)
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Frames per buffer
    pub frames: u32,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            format: NATIVE_FORMAT,
            frames: 512,
        }
    }
}

/// Format the device actually runs with. Immutable once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
    frames: u32,
}

impl StreamFormat {
    /// Turn a request into a format the voice hardware can play.
    ///
    /// - channels are clamped into `1..=MAX_CHANNELS`
    /// - the encoding is always [`NATIVE_FORMAT`]
    /// - `frames` is raised so one buffer outlasts a frame callback period:
    ///   at least `frame_quantum` samples at `native_rate`, scaled to the
    ///   stream rate
    /// - a zero sample rate becomes `native_rate`
    pub fn negotiate(request: &StreamRequest, native_rate: u32, frame_quantum: u32) -> Self {
        let sample_rate = if request.sample_rate == 0 {
            native_rate
        } else {
            request.sample_rate
        };

        Self {
            sample_rate,
            channels: request.channels.clamp(1, MAX_CHANNELS),
            format: NATIVE_FORMAT,
            frames: request
                .frames
                .max(min_frames(sample_rate, native_rate, frame_quantum))
                .max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Frames per buffer
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Samples in one buffer, all channels
    pub fn buffer_samples(&self) -> usize {
        self.frames as usize * self.channels as usize
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_samples() * SAMPLE_BYTES
    }

    /// Distance between two channels' blocks inside a de-interleaved buffer
    pub fn channel_stride_bytes(&self) -> usize {
        self.frames as usize * SAMPLE_BYTES
    }

    /// Voice SRC ratio for playing this stream on an engine running at `native_rate`
    pub fn src_ratio(&self, native_rate: u32) -> f32 {
        if native_rate == 0 {
            return 1.0;
        }
        self.sample_rate as f32 / native_rate as f32
    }
}

/// Source frames a voice may consume in one frame callback period.
///
/// A voice resampling `sample_rate` onto an engine running at `native_rate`
/// reads `frame_quantum × sample_rate / native_rate` source frames per tick,
/// rounded up. Resampled voices get one more: the SRC phase accumulator can
/// carry a tick one sample past the exact count.
fn min_frames(sample_rate: u32, native_rate: u32, frame_quantum: u32) -> u32 {
    if native_rate == 0 || sample_rate == native_rate {
        return frame_quantum;
    }
    let frames =
        (u64::from(frame_quantum) * u64::from(sample_rate)).div_ceil(u64::from(native_rate)) + 1;
    u32::try_from(frames).unwrap_or(u32::MAX)
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}, {} frames",
            self.sample_rate, self.channels, self.format, self.frames
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channels: u16, format: SampleFormat, frames: u32) -> StreamRequest {
        StreamRequest {
            sample_rate: 48_000,
            channels,
            format,
            frames,
        }
    }

    #[test]
    fn test_channels_clamped_to_mono_or_stereo() {
        for (requested, expected) in [(0, 1), (1, 1), (2, 2), (6, 2)] {
            let format = StreamFormat::negotiate(&request(requested, NATIVE_FORMAT, 512), 48_000, 144);
            assert_eq!(format.channels(), expected, "requested {requested}");
        }
    }

    #[test]
    fn test_format_forced_native() {
        for requested in [
            SampleFormat::U8,
            SampleFormat::S16Le,
            SampleFormat::S32Be,
            SampleFormat::F32Le,
        ] {
            let format = StreamFormat::negotiate(&request(2, requested, 512), 48_000, 144);
            assert_eq!(format.format(), SampleFormat::S16Be);
            assert_eq!(format.format().bits(), 16);
            assert!(format.format().is_big_endian());
        }
    }

    #[test]
    fn test_frames_raised_to_quantum() {
        let format = StreamFormat::negotiate(&request(2, NATIVE_FORMAT, 64), 48_000, 144);
        assert_eq!(format.frames(), 144);

        let format = StreamFormat::negotiate(&request(2, NATIVE_FORMAT, 1024), 48_000, 144);
        assert_eq!(format.frames(), 1024);
    }

    #[test]
    fn test_frames_scaled_by_src_ratio() {
        // 144 engine samples per tick at 96 kHz source = 288 source frames,
        // plus one for SRC phase rounding
        let mut req = request(2, NATIVE_FORMAT, 144);
        req.sample_rate = 96_000;
        assert_eq!(StreamFormat::negotiate(&req, 48_000, 144).frames(), 289);

        // 144 × 44100 / 48000 = 132.3, rounded up
        req.sample_rate = 44_100;
        req.frames = 64;
        assert_eq!(StreamFormat::negotiate(&req, 48_000, 144).frames(), 134);

        // Below the engine rate the quantum shrinks
        req.sample_rate = 24_000;
        assert_eq!(StreamFormat::negotiate(&req, 48_000, 144).frames(), 73);

        // Larger requests are kept
        req.frames = 1024;
        assert_eq!(StreamFormat::negotiate(&req, 48_000, 144).frames(), 1024);
    }

    #[test]
    fn test_zero_rate_uses_native() {
        let mut req = request(2, NATIVE_FORMAT, 512);
        req.sample_rate = 0;
        let format = StreamFormat::negotiate(&req, 32_000, 96);
        assert_eq!(format.sample_rate(), 32_000);
        assert_eq!(format.src_ratio(32_000), 1.0);
    }

    #[test]
    fn test_stereo_512_buffer_size() {
        let format = StreamFormat::negotiate(&request(2, SampleFormat::S16Le, 512), 48_000, 144);
        assert_eq!(format.buffer_samples(), 1024);
        assert_eq!(format.buffer_bytes(), 512 * 2 * 2);
        assert_eq!(format.channel_stride_bytes(), 1024);
        assert_eq!(format.to_string(), "48000 Hz, 2 ch, s16be, 512 frames");
    }

    #[test]
    fn test_src_ratio() {
        let mut req = request(1, NATIVE_FORMAT, 512);
        req.sample_rate = 32_000;
        let format = StreamFormat::negotiate(&req, 48_000, 144);
        assert!((format.src_ratio(48_000) - 2.0 / 3.0).abs() < 1e-6);
    }
}
