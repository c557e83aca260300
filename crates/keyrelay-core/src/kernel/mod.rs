//! Kernel key-management primitives
//!
//! The keyring backend never calls the kernel directly; it goes through the
//! [`KeyOps`] capability set so that the same code runs against:
//! - `LinuxKeyOps`: the real kernel (Linux only)
//! - `MemoryKeyOps`: an in-memory model with fault injection, for tests

mod types;
mod error;
mod traits;
mod memory;
#[cfg(target_os = "linux")]
mod linux;

pub use types::{KeySerial, KeyPerm, KeyType, KeyDescription, SpecialKeyring};
pub use error::{KernelError, KernelResult};
pub use traits::{KeyOps, KernelOp};
pub use memory::MemoryKeyOps;
#[cfg(target_os = "linux")]
pub use linux::LinuxKeyOps;
