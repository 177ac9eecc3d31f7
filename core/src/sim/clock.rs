//! Periodic tick thread standing in for the hardware audio clock

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

/// Calls `tick` every `period` on its own thread until dropped
pub struct SimClock {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl SimClock {
    pub fn spawn(period: Duration, mut tick: impl FnMut() + Send + 'static) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("sim-audio-clock".into())
            .spawn(move || {
                let mut ticks = 0u64;
                let mut deadline = Instant::now();
                while !stop_flag.load(Ordering::Acquire) {
                    tick();
                    ticks += 1;

                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        // Fell behind; don't try to catch up in a burst
                        deadline = now;
                    }
                }
                ticks
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop ticking and return the number of ticks delivered.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        let ticks = self
            .handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0);
        debug!("Sim clock stopped after {} ticks", ticks);
        ticks
    }
}

impl Drop for SimClock {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}
