//! Interleaved → per-channel block transpose
//!
//! The mixer writes frames `L R L R ...`; each voice needs its channel as one
//! contiguous block. The transpose runs in place through a scratch buffer
//! sized once at open, so commit never allocates.

pub struct Deinterleaver {
    channels: usize,
    scratch: Vec<i16>,
}

impl Deinterleaver {
    pub fn new(frames: usize, channels: usize) -> Self {
        let scratch = if channels > 1 {
            vec![0; frames * channels]
        } else {
            Vec::new()
        };
        Self { channels, scratch }
    }

    /// Rewrite `samples` from interleaved frames into channel blocks.
    pub fn apply(&mut self, samples: &mut [i16]) {
        if self.channels <= 1 {
            return;
        }
        let frames = samples.len() / self.channels;
        let scratch = &mut self.scratch[..samples.len()];
        scratch.copy_from_slice(samples);

        for (frame, chunk) in scratch.chunks_exact(self.channels).enumerate() {
            for (channel, &sample) in chunk.iter().enumerate() {
                samples[channel * frames + frame] = sample;
            }
        }
    }
}
