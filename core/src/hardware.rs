//! Shared handle to the process-wide voice engine
//!
//! The voice engine exists once per process. Every open stream holds an
//! [`EngineLease`]; the first lease initialises the engine and the last one
//! shuts it down again. An engine someone else already initialised is left
//! running.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::engine::{Renderer, VoiceEngine};
use crate::error::AudioError;

struct Shared<E: VoiceEngine> {
    engine: E,
    renderer: Renderer,
    clients: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    count: usize,
    /// Whether we called `init` and therefore owe the matching `quit`
    owns_init: bool,
}

/// Cloneable handle to the voice engine
pub struct AudioHardware<E: VoiceEngine> {
    shared: Arc<Shared<E>>,
}

impl<E: VoiceEngine> Clone for AudioHardware<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: VoiceEngine> AudioHardware<E> {
    pub fn new(engine: E) -> Self {
        Self::with_renderer(engine, Renderer::default())
    }

    pub fn with_renderer(engine: E, renderer: Renderer) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                renderer,
                clients: Mutex::new(ClientState::default()),
            }),
        }
    }

    pub fn engine(&self) -> &E {
        &self.shared.engine
    }

    pub fn renderer(&self) -> Renderer {
        self.shared.renderer
    }

    /// Number of live leases
    pub fn clients(&self) -> usize {
        self.lock_clients().count
    }

    /// Handle that does not keep the engine alive, for use inside the
    /// engine's own frame callback.
    pub fn downgrade(&self) -> WeakHardware<E> {
        WeakHardware {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register a client, initialising the engine if nobody has yet.
    pub fn lease(&self) -> Result<EngineLease<E>, AudioError> {
        let mut clients = self.lock_clients();

        if clients.count == 0 {
            if self.shared.engine.is_initialized() {
                debug!("Voice engine already initialised, sharing it");
                clients.owns_init = false;
            } else {
                self.shared.engine.init(self.shared.renderer).inspect_err(|e| {
                    warn!("Voice engine init failed: {}", e);
                })?;
                info!(
                    "Voice engine initialised at {} Hz",
                    self.shared.renderer.sample_rate()
                );
                clients.owns_init = true;
            }
        }

        clients.count += 1;
        drop(clients);

        Ok(EngineLease {
            hardware: self.clone(),
        })
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.shared.clients.lock().unwrap_or_else(|e| {
            warn!("Engine client mutex poisoned, recovering");
            e.into_inner()
        })
    }

    fn release(&self) {
        let mut clients = self.lock_clients();
        clients.count = clients.count.saturating_sub(1);
        if clients.count == 0 && clients.owns_init {
            self.shared.engine.quit();
            clients.owns_init = false;
            info!("Voice engine shut down");
        }
    }
}

/// Non-owning handle, see [`AudioHardware::downgrade`]
pub struct WeakHardware<E: VoiceEngine> {
    shared: Weak<Shared<E>>,
}

impl<E: VoiceEngine> Clone for WeakHardware<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<E: VoiceEngine> WeakHardware<E> {
    pub fn upgrade(&self) -> Option<AudioHardware<E>> {
        self.shared.upgrade().map(|shared| AudioHardware { shared })
    }
}

/// One client's claim on the engine. Dropping it releases the claim.
pub struct EngineLease<E: VoiceEngine> {
    hardware: AudioHardware<E>,
}

impl<E: VoiceEngine> EngineLease<E> {
    pub fn hardware(&self) -> &AudioHardware<E> {
        &self.hardware
    }

    pub fn engine(&self) -> &E {
        self.hardware.engine()
    }
}

impl<E: VoiceEngine> Drop for EngineLease<E> {
    fn drop(&mut self) {
        self.hardware.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimVoiceEngine};

    #[test]
    fn test_first_lease_inits_last_quits() {
        let hardware = AudioHardware::new(SimVoiceEngine::new(SimConfig::default()));
        assert!(!hardware.engine().is_initialized());

        let a = hardware.lease().unwrap();
        assert!(hardware.engine().is_initialized());
        let b = hardware.lease().unwrap();
        assert_eq!(hardware.clients(), 2);

        drop(a);
        assert!(hardware.engine().is_initialized());
        drop(b);
        assert_eq!(hardware.clients(), 0);
        assert!(!hardware.engine().is_initialized());
    }

    #[test]
    fn test_foreign_init_left_running() {
        let engine = SimVoiceEngine::new(SimConfig::default());
        engine.init(Renderer::Hz48).unwrap();
        let hardware = AudioHardware::new(engine);

        let lease = hardware.lease().unwrap();
        drop(lease);
        assert!(hardware.engine().is_initialized());
    }

    #[test]
    fn test_init_failure_is_unavailable() {
        let hardware = AudioHardware::new(SimVoiceEngine::new(SimConfig {
            fail_init: true,
            ..SimConfig::default()
        }));
        let err = hardware.lease().err().unwrap();
        assert!(matches!(err, AudioError::DeviceUnavailable { .. }));
        assert_eq!(hardware.clients(), 0);
    }

    #[test]
    fn test_renderer_passed_to_init() {
        let hardware =
            AudioHardware::with_renderer(SimVoiceEngine::new(SimConfig::default()), Renderer::Hz32);
        let _lease = hardware.lease().unwrap();
        assert_eq!(hardware.engine().input_sample_rate(), 32_000);
        assert_eq!(hardware.engine().samples_per_frame(), 96);
    }

    #[test]
    fn test_weak_handle_does_not_keep_engine() {
        let hardware = AudioHardware::new(SimVoiceEngine::new(SimConfig::default()));
        let weak = hardware.downgrade();
        assert!(weak.upgrade().is_some());
        drop(hardware);
        assert!(weak.upgrade().is_none());
    }
}
