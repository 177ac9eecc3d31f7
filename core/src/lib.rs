//! ringvoice core - hardware voice engine seam
//!
//! This crate holds everything the streaming coordinator needs to know about
//! the console audio hardware without depending on a vendor SDK:
//!
//! - [`VoiceEngine`] - Trait over the fixed-function voice mixer (voices,
//!   offsets, frame callback, cache flush, sample memory, thread affinity)
//! - [`StreamFormat`] - Negotiation of a requested format into the one the
//!   hardware can play
//! - [`AudioHardware`] - Shared, reference-counted handle to the process-wide
//!   engine
//! - [`Config`] - TOML settings (`config.toml`)
//! - [`sim`] - Software voice engine used by tests and the demo player

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod hardware;
pub mod sim;

pub use config::{AudioConfig, Config, ConfigError, DesyncRecovery, StreamConfig};
pub use engine::{
    AffinityGuard, CoreMask, DeviceKind, DeviceMix, FrameCallback, MixTarget, OutputChannel,
    Renderer, SAMPLE_BYTES, SampleAddr, SrcMode, VOICE_PRIORITY_MAX, VoiceBatch, VoiceEngine,
    VoiceId, VoiceOffsets, VoiceState, VoiceVolume,
};
pub use error::{AudioError, SyncAnomaly};
pub use format::{MAX_CHANNELS, NATIVE_FORMAT, SampleFormat, StreamFormat, StreamRequest};
pub use hardware::{AudioHardware, EngineLease, WeakHardware};
