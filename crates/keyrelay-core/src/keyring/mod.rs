//! Keyring backends and the keyctl permission relay
//!
//! This module provides:
//! - `Keyring` trait implemented by every backend
//! - `KeyctlKeyring`: items stored as kernel keys, optionally in a named keyring
//!   and optionally with a custom permission mask
//! - `MemoryKeyring`: process-local storage
//! - a registry for opening backends from a [`Config`](crate::config::Config)

mod traits;
mod scope;
mod named;
mod relay;
mod keyctl_store;
mod memory_store;
mod registry;

pub use traits::{
    BackendType, ContainerCreateError, Item, Keyring, KeyringError, KeyringResult, Metadata,
};
pub use scope::{resolve_scope, Scope};
pub use named::resolve_named_keyring;
pub use relay::{PermissionRelay, RelayError, RelayObject, RelayState, RelayStep};
pub use keyctl_store::KeyctlKeyring;
pub use memory_store::MemoryKeyring;
pub use registry::{
    available_backends, backend_description, open, register_backend, unregister_backend,
    BackendDefinition, BackendOpener,
};
