//! ringvoice - double-buffered audio streaming onto hardware voices
//!
//! A software producer fills a ring of sample buffers while the console's
//! voice engine plays them on its own clock. The pieces:
//!
//! - [`audio::BufferRing`] - N sample buffers plus the rendering/playing cursors
//! - [`audio::VoiceBinding`] - one looping hardware voice per channel
//! - [`audio::FrameSync`] - per-tick reconciliation of the playing buffer and
//!   loop/end re-pointing
//! - [`audio::AudioDevice`] - open / render / commit / wait / close
//! - [`audio_thread::StreamThread`] - the producer loop on its own thread

pub mod audio;
pub mod audio_thread;
#[cfg(feature = "monitor")]
pub mod monitor;
