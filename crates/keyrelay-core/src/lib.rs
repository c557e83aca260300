//! Keyrelay Core
//!
//! Secret storage on the Linux kernel key retention service.
//!
//! Items are stored as `user` keys in a scope keyring (`user`, `session`,
//! `process` or `thread`), optionally inside a named keyring beneath it, and
//! optionally with a custom permission mask. Keys and keyrings that get a
//! custom mask are created in the session keyring first and relayed into
//! their destination, so the caller keeps possession long enough to restrict
//! them.
//!
//! ```rust,no_run
//! use keyrelay_core::config::{Config, KeyctlConfig};
//! use keyrelay_core::keyring::{self, BackendType, Item};
//!
//! let config = Config::default()
//!     .with_allowed_backends(vec![BackendType::KeyCtl])
//!     .with_keyctl(
//!         KeyctlConfig::new("user")
//!             .with_container_name("myapp")
//!             .with_permission_mask(0x3f3f_0000),
//!     );
//!
//! let ring = keyring::open(&config)?;
//! ring.set(Item::new("token", b"s3cret".to_vec()))?;
//! assert_eq!(ring.get("token")?.data, b"s3cret");
//! # Ok::<(), keyrelay_core::keyring::KeyringError>(())
//! ```
//!
//! The kernel is reached through the [`kernel::KeyOps`] trait; tests run the
//! keyring logic against [`kernel::MemoryKeyOps`], an in-process model of
//! keyrings with possession and permission checks.

pub mod kernel;
pub mod keyring;
pub mod logging;
pub mod config;

// Re-export commonly used types
pub use kernel::{KeyOps, KeyPerm, KeySerial, KernelError, MemoryKeyOps};
#[cfg(target_os = "linux")]
pub use kernel::LinuxKeyOps;

pub use keyring::{
    BackendType, Item, KeyctlKeyring, Keyring, KeyringError, KeyringResult, MemoryKeyring,
    Metadata, Scope,
};

pub use logging::LogLevel;

pub use config::{Config, ConfigError, KeyctlConfig};
