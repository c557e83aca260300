//! Core traits and types for keyring backends

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::relay::RelayError;
use super::scope::Scope;
use crate::config::ConfigError;
use crate::kernel::KernelError;

/// A named secret
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub data: Vec<u8>,
}

impl Item {
    pub fn new(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
        }
    }
}

/// Information about an item that does not require reading its payload
///
/// Backends that cannot provide it return `KeyringError::MetadataNotSupported`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub item: Option<Item>,
    pub modified: Option<SystemTime>,
}

/// Known backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Linux kernel key retention service
    KeyCtl,
    /// Process-local map
    Memory,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::KeyCtl => "keyctl",
            BackendType::Memory => "memory",
        }
    }

    /// Preference order used when a config does not restrict backends
    pub fn all() -> &'static [BackendType] {
        &[BackendType::KeyCtl, BackendType::Memory]
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyctl" => Ok(BackendType::KeyCtl),
            "memory" => Ok(BackendType::Memory),
            other => Err(KeyringError::UnknownBackend(other.to_string())),
        }
    }
}

/// Why a named keyring could not be created
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerCreateError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Errors that can occur during keyring operations
#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("The specified item could not be found in the keyring")]
    KeyNotFound,

    #[error("The keyring backend does not support metadata access")]
    MetadataNotSupported,

    #[error("unsupported keyctl scope {0:?}")]
    UnsupportedScope(String),

    #[error("accessing {scope} keyring failed: {source}")]
    ScopeUnavailable {
        scope: Scope,
        #[source]
        source: KernelError,
    },

    #[error("opening named keyring {name:?} failed: {source}")]
    ContainerLookupFailed {
        name: String,
        #[source]
        source: KernelError,
    },

    #[error("creating named keyring {name:?} failed: {source}")]
    ContainerCreateFailed {
        name: String,
        #[source]
        source: ContainerCreateError,
    },

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("No keyring backend is available")]
    NoAvailableBackend,

    #[error("Unknown keyring backend: {0}")]
    UnknownBackend(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl KeyringError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeyringError::KeyNotFound)
    }
}

pub type KeyringResult<T> = Result<T, KeyringError>;

/// Trait for keyring backends
///
/// One instance serves one opened configuration. Implementations:
/// - `KeyctlKeyring`: Linux kernel keyrings
/// - `MemoryKeyring`: process-local, for tests and as a fallback
///
/// # Example
///
/// ```
/// use keyrelay_core::keyring::{Item, Keyring, MemoryKeyring};
///
/// let ring = MemoryKeyring::new();
/// ring.set(Item::new("token", "s3cr3t")).unwrap();
/// assert_eq!(ring.get("token").unwrap().data, b"s3cr3t".to_vec());
/// ```
pub trait Keyring: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> BackendType;

    /// Retrieve an item
    ///
    /// Returns `Err(KeyringError::KeyNotFound)` if no item has that key.
    fn get(&self, key: &str) -> KeyringResult<Item>;

    /// Retrieve metadata about an item without its payload
    fn get_metadata(&self, key: &str) -> KeyringResult<Metadata>;

    /// Store an item, replacing any item with the same key
    fn set(&self, item: Item) -> KeyringResult<()>;

    /// Remove an item
    ///
    /// Returns `Err(KeyringError::KeyNotFound)` if no item has that key.
    fn remove(&self, key: &str) -> KeyringResult<()>;

    /// Keys of all items, never sub-containers
    fn keys(&self) -> KeyringResult<Vec<String>>;
}
