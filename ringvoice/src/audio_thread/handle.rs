//! Stream thread handle
//!
//! Stops the producer and hands the device back once it has exited.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::warn;

use ringvoice_core::VoiceEngine;

use crate::audio::AudioDevice;

/// Handle to a running stream thread
///
/// Returned from `StreamThread::spawn()`. Dropping it stops the thread and
/// closes the device.
pub struct StreamHandle<E: VoiceEngine> {
    pub(super) stop: Arc<AtomicBool>,
    pub(super) handle: Option<JoinHandle<AudioDevice<E>>>,
}

impl<E: VoiceEngine> StreamHandle<E> {
    /// Check if the stream thread is still running
    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop producing and get the device back, still open.
    ///
    /// Returns `None` if the thread panicked; the device was dropped (and
    /// closed) while unwinding.
    pub fn stop(mut self) -> Option<AudioDevice<E>> {
        self.join()
    }

    fn join(&mut self) -> Option<AudioDevice<E>> {
        self.stop.store(true, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(device) => Some(device),
            Err(_) => {
                warn!("Stream thread panicked");
                None
            }
        }
    }
}

impl<E: VoiceEngine> Drop for StreamHandle<E> {
    fn drop(&mut self) {
        // The returned device closes as it drops
        drop(self.join());
    }
}
