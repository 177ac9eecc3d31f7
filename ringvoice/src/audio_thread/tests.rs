use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ringvoice_core::sim::{CaptureSink, SimClock, SimConfig, SimVoiceEngine};
use ringvoice_core::{AudioHardware, SampleFormat, StreamRequest};

use super::*;
use crate::audio::{AudioDevice, DeviceSettings, RenderBuffer};

fn open() -> (AudioHardware<SimVoiceEngine>, AudioDevice<SimVoiceEngine>) {
    let hardware = AudioHardware::new(SimVoiceEngine::new(SimConfig::default()));
    let request = StreamRequest {
        sample_rate: 48_000,
        channels: 2,
        format: SampleFormat::S16Be,
        frames: 256,
    };
    let device = AudioDevice::open(&hardware, &request, &DeviceSettings::default()).unwrap();
    (hardware, device)
}

fn constant(value: i16) -> impl FnMut(&mut RenderBuffer<'_>) + Send + 'static {
    move |buffer: &mut RenderBuffer<'_>| {
        for frame in 0..buffer.frames() {
            buffer.write_frame(frame, &[value, value]);
        }
    }
}

#[test]
fn test_stream_thread_produces_until_stopped() {
    let (hardware, device) = open();
    let capture = CaptureSink::new();
    hardware.engine().set_sink(capture.clone());

    let clock_hardware = hardware.clone();
    let clock = SimClock::spawn(Duration::from_millis(1), move || clock_hardware.engine().step())
        .unwrap();

    let handle = StreamThread::spawn(device, constant(1234)).unwrap();
    assert!(handle.is_alive());
    std::thread::sleep(Duration::from_millis(100));

    let device = handle.stop().expect("stream thread panicked");
    clock.stop();

    let stats = device.sync_stats();
    assert!(stats.switches > 0);
    assert_eq!(stats.desyncs, 0);
    assert!(capture.samples().contains(&1234));

    device.close();
    assert_eq!(hardware.engine().stats().live_allocations, 0);
}

#[test]
fn test_stop_while_waiting_for_buffer() {
    let (hardware, device) = open();
    let fills = Arc::new(AtomicUsize::new(0));
    let fills_thread = Arc::clone(&fills);

    // No clock: the hardware never leaves buffer 0
    let handle = StreamThread::spawn(device, move |buffer: &mut RenderBuffer<'_>| {
        fills_thread.fetch_add(1, Ordering::SeqCst);
        buffer.fill_silence();
    })
    .unwrap();

    std::thread::sleep(Duration::from_millis(30));
    let device = handle.stop().expect("stream thread panicked");
    assert_eq!(fills.load(Ordering::SeqCst), 1);
    assert_eq!(device.cursors().rendering(), 0);
    assert_eq!(device.cursors().playing(), 0);

    drop(device);
    assert_eq!(hardware.clients(), 0);
}

#[test]
fn test_dropping_handle_closes_device() {
    let (hardware, device) = open();
    let handle = StreamThread::spawn(device, constant(0)).unwrap();
    drop(handle);

    let stats = hardware.engine().stats();
    assert_eq!(stats.live_allocations, 0);
    assert_eq!(stats.acquired_voices, 0);
    assert!(!hardware.engine().has_frame_callback());
    assert_eq!(hardware.clients(), 0);
}
