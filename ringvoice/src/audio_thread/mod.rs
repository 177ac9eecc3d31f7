//! Threaded stream production
//!
//! Runs the software side of the hand-off on its own thread so the caller
//! only supplies a fill function.
//!
//! # Architecture
//!
//! ```text
//! Stream Thread                          Engine Clock
//!     │                                      │
//! [render_buffer]                            │
//! [fill]                                     │
//! [commit]──────(ring cursors)──────────►[frame callback]
//! [wait_timeout]◄───────(condvar)────────[playing moved]
//!     │                                      │
//! [stop flag?]                               │
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let device = AudioDevice::open(&hardware, &request, &settings)?;
//! let handle = StreamThread::spawn(device, |buffer| mixer.render(buffer))?;
//! // ...
//! if let Some(device) = handle.stop() {
//!     device.close();
//! }
//! ```

mod handle;
mod metrics;
mod thread;

pub use handle::StreamHandle;
pub use thread::StreamThread;

#[cfg(test)]
mod tests;
