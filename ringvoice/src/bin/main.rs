//! ringvoice demo - stream a sine tone through the simulated voice engine
//!
//! # Usage
//!
//! ```bash
//! ringvoice-demo
//! ringvoice-demo --tone 220 --seconds 5 --frames 1024
//! ringvoice-demo --buffers 3 --config ./ringvoice.toml
//! RUST_LOG=ringvoice=debug ringvoice-demo
//! ```

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ringvoice::audio::{AudioDevice, DeviceSettings, RenderBuffer};
use ringvoice::audio_thread::StreamThread;
use ringvoice_core::sim::{SimClock, SimConfig, SimVoiceEngine};
use ringvoice_core::{AudioHardware, Renderer, SampleFormat, config};

#[derive(Parser)]
#[command(name = "ringvoice-demo")]
#[command(
    author,
    version,
    about = "Stream a test tone through a simulated hardware voice engine"
)]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Requested sample rate in Hz
    #[arg(long)]
    rate: Option<u32>,

    /// Requested channel count (1 or 2)
    #[arg(long, short = 'c')]
    channels: Option<u16>,

    /// Requested frames per buffer
    #[arg(long)]
    frames: Option<u32>,

    /// Buffers in the ring (minimum 2)
    #[arg(long, short = 'b')]
    buffers: Option<usize>,

    /// Tone frequency in Hz
    #[arg(long, default_value = "440")]
    tone: f32,

    /// How long to stream
    #[arg(long, short = 's', default_value = "2")]
    seconds: f32,

    /// Play the engine's output on the default sound card
    #[cfg(feature = "monitor")]
    #[arg(long, short = 'm')]
    monitor: bool,
}

/// Sine generator writing interleaved frames, same tone on every channel
fn sine(frequency: f32, sample_rate: u32) -> impl FnMut(&mut RenderBuffer<'_>) + Send + 'static {
    let step = TAU * frequency / sample_rate.max(1) as f32;
    let mut phase = 0.0f32;
    let mut frame_values = Vec::new();
    move |buffer: &mut RenderBuffer<'_>| {
        frame_values.resize(buffer.channels() as usize, 0);
        for frame in 0..buffer.frames() {
            let value = (phase.sin() * 0.5 * i16::MAX as f32) as i16;
            frame_values.fill(value);
            buffer.write_frame(frame, &frame_values);
            phase = (phase + step) % TAU;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => config::load(),
    };
    if let Some(rate) = args.rate {
        config.stream.sample_rate = rate;
    }
    if let Some(channels) = args.channels {
        config.stream.channels = channels;
    }
    if let Some(frames) = args.frames {
        config.stream.frames = frames;
    }
    if let Some(buffers) = args.buffers {
        config.audio.buffer_count = buffers;
    }

    let hardware =
        AudioHardware::with_renderer(SimVoiceEngine::new(SimConfig::default()), Renderer::Hz48);

    #[cfg(feature = "monitor")]
    let _monitor = if args.monitor {
        let (monitor, sink) = ringvoice::monitor::open(hardware.renderer().sample_rate())
            .context("failed to open monitor output")?;
        info!("Monitoring on the default output at {}Hz", monitor.sample_rate());
        hardware.engine().set_sink(sink);
        Some(monitor)
    } else {
        None
    };

    // Negotiation settles on S16BE regardless; write_frame does the byte swap
    let mut request = config.stream.request();
    request.format = SampleFormat::S16Le;

    let settings = DeviceSettings::from(&config.audio);
    let device = AudioDevice::open(&hardware, &request, &settings)
        .context("failed to open audio device")?;
    let sample_rate = device.format().sample_rate();

    let clock_hardware = hardware.clone();
    let period = Duration::from_millis(u64::from(Renderer::FRAME_MS));
    let clock = SimClock::spawn(period, move || clock_hardware.engine().step())
        .context("failed to start hardware clock")?;

    let stream = StreamThread::spawn(device, sine(args.tone, sample_rate))
        .context("failed to start stream thread")?;
    info!("Streaming {}Hz tone for {}s", args.tone, args.seconds);

    std::thread::sleep(Duration::from_secs_f32(args.seconds.max(0.0)));

    let device = stream.stop().context("stream thread panicked")?;
    let ticks = clock.stop();

    let stats = device.sync_stats();
    info!(
        "{} hardware frames: {} switches, {} continues, {} stalls, {} desyncs, {} skews",
        ticks, stats.switches, stats.continues, stats.stalls, stats.desyncs, stats.skews
    );
    let engine_stats = hardware.engine().stats();
    info!(
        "Engine rendered {} frames, {} invalid reads",
        engine_stats.frames, engine_stats.invalid_reads
    );

    device.close();
    Ok(())
}
