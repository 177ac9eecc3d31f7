//! Host playback of the simulated engine's output
//!
//! The sim engine mixes into interleaved stereo i16 at the renderer rate.
//! [`MonitorSink`] converts that to f32 and pushes it into a ring buffer
//! drained by a cpal output stream.

use anyhow::{Context, Result, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use tracing::{debug, error, warn};

use ringvoice_core::sim::SampleSink;

/// ~100ms of stereo at 48 kHz
const RING_SAMPLES: usize = 9600;

/// Feeds engine output to the host sound card
pub struct MonitorSink {
    producer: HeapProd<f32>,
    scratch: Vec<f32>,
    dropped: u64,
}

impl SampleSink for MonitorSink {
    fn write(&mut self, frames: &[i16]) {
        self.scratch.clear();
        self.scratch.extend(frames.iter().map(|&s| s as f32 / 32768.0));
        let pushed = self.producer.push_slice(&self.scratch);
        if pushed < self.scratch.len() {
            self.dropped += 1;
            if self.dropped <= 10 || self.dropped % 100 == 0 {
                warn!(
                    "Monitor ring full, dropped {} samples (overrun #{})",
                    self.scratch.len() - pushed,
                    self.dropped
                );
            }
        }
    }
}

/// Keeps the cpal stream alive
pub struct Monitor {
    _stream: cpal::Stream,
    sample_rate: u32,
}

impl Monitor {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Open the default output device and return the sink feeding it.
///
/// Only f32 stereo output is supported; the stream plays at the device's
/// rate, so a mismatch with `engine_rate` changes pitch.
pub fn open(engine_rate: u32) -> Result<(Monitor, MonitorSink)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no audio output device available")?;
    let config = device
        .default_output_config()
        .context("failed to get default output config")?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        bail!("unsupported sample format: {:?}", config.sample_format());
    }
    if config.channels() != 2 {
        bail!("unsupported channel count: {}", config.channels());
    }
    let sample_rate = config.sample_rate().0;
    if sample_rate != engine_rate {
        warn!(
            "Output device runs at {}Hz, engine at {}Hz; playback pitch will differ",
            sample_rate, engine_rate
        );
    }

    let (producer, mut consumer) = HeapRb::<f32>::new(RING_SAMPLES).split();

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let popped = consumer.pop_slice(data);
                data[popped..].fill(0.0);
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .context("failed to build audio stream")?;
    stream.play().context("failed to play audio stream")?;

    debug!("Monitor stream started at {}Hz", sample_rate);

    Ok((
        Monitor {
            _stream: stream,
            sample_rate,
        },
        MonitorSink {
            producer,
            scratch: Vec::new(),
            dropped: 0,
        },
    ))
}
