//! Double-buffered streaming onto hardware voices
//!
//! # Architecture
//!
//! ```text
//! Producer thread                  Frame callback (engine clock, 3 ms)
//!     │                                   │
//! [render_buffer] ◄── rendering           │
//! [fill]                                  │
//! [commit] ── rendering += 1 ──────►[read voice offsets]
//!     │                             [playing = buffer containing them]
//! [wait] ◄──── condvar ──────────── [notify if playing moved]
//!                                   [end = last sample of playing]
//!                                   [loop = next if committed, else playing]
//! ```
//!
//! The producer never writes the buffer at `playing`; the callback never
//! touches sample data.

mod binding;
mod deinterleave;
mod device;
mod frame_sync;
mod ring;

pub use binding::{BindSettings, VoiceBinding, channel_routing};
pub use deinterleave::Deinterleaver;
pub use device::{AudioDevice, DeviceSettings, MIN_BUFFERS, RenderBuffer};
pub use frame_sync::{FrameOutcome, FrameSync, LoopTarget, SyncStats, SyncStatsSnapshot};
pub use ring::{BufferRing, BufferState, RingCursors, RingLayout, SampleBuffer};
