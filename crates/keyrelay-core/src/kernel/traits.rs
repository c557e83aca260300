//! Capability set over the kernel key-management primitives

use std::fmt;

use super::error::KernelResult;
use super::types::{KeyDescription, KeyPerm, KeySerial, KeyType, SpecialKeyring};

/// The kernel operations the keyring backend is built on
///
/// Implementations:
/// - `LinuxKeyOps`: raw `keyctl(2)` / `add_key(2)` system calls (Linux only)
/// - `MemoryKeyOps`: in-memory model of the kernel for tests
///
/// Every method is a single blocking call with no internal retry.
pub trait KeyOps: Send + Sync {
    /// Resolve a special keyring to its real serial, creating it if the kernel allows
    fn special_keyring(&self, which: SpecialKeyring) -> KernelResult<KeySerial>;

    /// Search `keyring` (recursively) for a key of the given type and description
    fn search(&self, keyring: KeySerial, key_type: &KeyType, description: &str) -> KernelResult<KeySerial>;

    /// Add a `user` key to `keyring`, updating it in place if one with the same description exists
    fn add_key(&self, keyring: KeySerial, description: &str, payload: &[u8]) -> KernelResult<KeySerial>;

    /// Create an empty keyring named `name` inside `parent`
    fn create_keyring(&self, parent: KeySerial, name: &str) -> KernelResult<KeySerial>;

    /// Link `key` into `keyring`
    fn link(&self, key: KeySerial, keyring: KeySerial) -> KernelResult<()>;

    /// Remove the link to `key` from `keyring`
    fn unlink(&self, key: KeySerial, keyring: KeySerial) -> KernelResult<()>;

    /// Replace the permission mask of `key`
    fn set_perm(&self, key: KeySerial, perm: KeyPerm) -> KernelResult<()>;

    /// Serials linked directly from `keyring`
    fn list(&self, keyring: KeySerial) -> KernelResult<Vec<KeySerial>>;

    fn describe(&self, key: KeySerial) -> KernelResult<KeyDescription>;

    /// Read the payload of a key
    fn read(&self, key: KeySerial) -> KernelResult<Vec<u8>>;
}

/// Identifies a [`KeyOps`] call, used for logging and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelOp {
    SpecialKeyring,
    Search,
    AddKey,
    CreateKeyring,
    Link,
    Unlink,
    SetPerm,
    List,
    Describe,
    Read,
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelOp::SpecialKeyring => "get_keyring_id",
            KernelOp::Search => "search",
            KernelOp::AddKey => "add_key",
            KernelOp::CreateKeyring => "create_keyring",
            KernelOp::Link => "link",
            KernelOp::Unlink => "unlink",
            KernelOp::SetPerm => "setperm",
            KernelOp::List => "list",
            KernelOp::Describe => "describe",
            KernelOp::Read => "read",
        };
        f.write_str(name)
    }
}
