//! Stream thread implementation
//!
//! The software timing domain: render → fill → commit → wait, until told to
//! stop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{debug, trace};

use ringvoice_core::VoiceEngine;

use crate::audio::{AudioDevice, RenderBuffer};

use super::handle::StreamHandle;
use super::metrics::StreamMetrics;

/// Stream thread state
pub struct StreamThread<E: VoiceEngine, F> {
    device: AudioDevice<E>,
    /// Writes one buffer of interleaved frames
    fill: F,
    stop: Arc<AtomicBool>,
    metrics: StreamMetrics,
}

impl<E, F> StreamThread<E, F>
where
    E: VoiceEngine,
    F: FnMut(&mut RenderBuffer<'_>) + Send + 'static,
{
    /// Spawn the stream thread
    ///
    /// The thread owns `device` until stopped, then hands it back through
    /// the returned handle.
    pub fn spawn(device: AudioDevice<E>, fill: F) -> io::Result<StreamHandle<E>> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("audio-stream".into())
            .spawn(move || {
                let mut stream = Self {
                    device,
                    fill,
                    stop: stop_flag,
                    metrics: StreamMetrics::new(),
                };
                stream.run();
                stream.device
            })?;

        Ok(StreamHandle {
            stop,
            handle: Some(handle),
        })
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Main thread loop
    fn run(&mut self) {
        self.device.engine().raise_thread_priority();
        let poll = self.device.poll_interval();
        debug!("Stream thread started ({})", self.device.format());

        'produce: while !self.stopping() {
            // 1. Fill the buffer the hardware isn't reading
            {
                let mut buffer = self.device.render_buffer();
                (self.fill)(&mut buffer);
            }

            // 2. Hand it over
            self.device.commit();
            self.metrics.commits += 1;

            // 3. Wait for the next one, checking for stop between polls
            let started = Instant::now();
            while !self.device.wait_timeout(poll) {
                if self.stopping() {
                    self.metrics.record_wait(started.elapsed());
                    trace!("Stop requested while waiting for a buffer");
                    break 'produce;
                }
            }
            self.metrics.record_wait(started.elapsed());

            // Log metrics periodically
            self.metrics.maybe_log(&self.device.sync_stats());
        }

        debug!("Stream thread finished");
    }
}
