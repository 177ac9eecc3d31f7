//! Audio errors

/// Errors returned while opening an output stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    /// Sample memory or a hardware voice could not be obtained
    #[error("out of memory: {what}")]
    OutOfMemory { what: String },

    /// The voice engine refused to start or is already owned
    #[error("audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },
}

impl AudioError {
    pub fn out_of_memory(what: impl Into<String>) -> Self {
        Self::OutOfMemory { what: what.into() }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }
}

/// Irregularities seen by the frame callback.
///
/// These are logged and counted, never returned: the callback has nobody to
/// return them to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncAnomaly {
    /// The voice's read position lies outside every ring buffer
    #[error("voice offset {offset} outside all buffers, resynced to buffer {recovered}")]
    Desync { offset: u32, recovered: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AudioError::out_of_memory("ring buffer 1");
        assert_eq!(err.to_string(), "out of memory: ring buffer 1");

        let err = AudioError::unavailable("engine init failed");
        assert_eq!(err.to_string(), "audio device unavailable: engine init failed");

        let anomaly = SyncAnomaly::Desync {
            offset: 9999,
            recovered: 0,
        };
        assert_eq!(
            anomaly.to_string(),
            "voice offset 9999 outside all buffers, resynced to buffer 0"
        );
    }
}
