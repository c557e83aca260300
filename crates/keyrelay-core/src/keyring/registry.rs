//! Backend registry for opening keyrings by configuration

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::memory_store::MemoryKeyring;
use super::traits::{BackendType, Keyring, KeyringError, KeyringResult};
use crate::config::Config;
use crate::logging::file_logger as log;

const MODULE: &str = "Registry";

/// Opener function type for creating keyrings from a config
pub type BackendOpener = Box<dyn Fn(&Config) -> KeyringResult<Box<dyn Keyring>> + Send + Sync>;

/// Definition of a registered backend
pub struct BackendDefinition {
    pub backend: BackendType,
    /// Human-readable description
    pub description: String,
    pub opener: BackendOpener,
}

impl std::fmt::Debug for BackendDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDefinition")
            .field("backend", &self.backend)
            .field("description", &self.description)
            .finish()
    }
}

fn definition(backend: BackendType, description: &str, opener: BackendOpener) -> BackendDefinition {
    BackendDefinition {
        backend,
        description: description.to_string(),
        opener,
    }
}

/// Global registry of backends
static REGISTRY: Lazy<RwLock<HashMap<BackendType, BackendDefinition>>> = Lazy::new(|| {
    let mut map = HashMap::new();

    #[cfg(target_os = "linux")]
    map.insert(
        BackendType::KeyCtl,
        definition(
            BackendType::KeyCtl,
            "Linux kernel key retention service (keyctl)",
            Box::new(|config: &Config| {
                let ring = super::keyctl_store::KeyctlKeyring::open_system(&config.keyctl)?;
                Ok(Box::new(ring) as Box<dyn Keyring>)
            }),
        ),
    );

    map.insert(
        BackendType::Memory,
        definition(
            BackendType::Memory,
            "In-memory storage for testing",
            Box::new(|_: &Config| Ok(Box::new(MemoryKeyring::new()) as Box<dyn Keyring>)),
        ),
    );

    RwLock::new(map)
});

/// Register (or replace) the opener for a backend
///
/// # Example
///
/// ```
/// use keyrelay_core::config::Config;
/// use keyrelay_core::keyring::{register_backend, BackendType, Keyring, MemoryKeyring};
///
/// register_backend(
///     BackendType::Memory,
///     "Shared test storage",
///     Box::new(|_: &Config| Ok(Box::new(MemoryKeyring::new()) as Box<dyn Keyring>)),
/// );
/// ```
pub fn register_backend(backend: BackendType, description: &str, opener: BackendOpener) {
    REGISTRY.write().insert(backend, definition(backend, description, opener));
}

/// Unregister a backend (mainly for testing)
pub fn unregister_backend(backend: BackendType) -> bool {
    REGISTRY.write().remove(&backend).is_some()
}

/// Registered backends in preference order
pub fn available_backends() -> Vec<BackendType> {
    let registry = REGISTRY.read();
    BackendType::all()
        .iter()
        .copied()
        .filter(|backend| registry.contains_key(backend))
        .collect()
}

/// Description of a registered backend
pub fn backend_description(backend: BackendType) -> Option<String> {
    REGISTRY.read().get(&backend).map(|def| def.description.clone())
}

/// Open the first backend allowed by `config` that opens successfully
///
/// An empty `allowed_backends` allows every registered backend. When every
/// candidate fails, the last opener error is returned.
pub fn open(config: &Config) -> KeyringResult<Box<dyn Keyring>> {
    let candidates: Vec<BackendType> = if config.allowed_backends.is_empty() {
        available_backends()
    } else {
        config.allowed_backends.clone()
    };

    let registry = REGISTRY.read();
    let mut last_error = None;
    for backend in candidates {
        let Some(def) = registry.get(&backend) else {
            log::warn(MODULE, &format!("backend {} is not available on this platform", backend));
            last_error = Some(KeyringError::UnknownBackend(backend.to_string()));
            continue;
        };
        match (def.opener)(config) {
            Ok(ring) => {
                log::info(MODULE, &format!("opened backend {}", backend));
                return Ok(ring);
            }
            Err(err) => {
                log::warn(MODULE, &format!("failed to open backend {}: {}", backend, err));
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or(KeyringError::NoAvailableBackend))
}
