//! Kernel-level error classification

use thiserror::Error;

const ENOKEY: i32 = 126;
const EKEYEXPIRED: i32 = 127;
const EKEYREVOKED: i32 = 128;
const EACCES: i32 = 13;
const EPERM: i32 = 1;
const EINVAL: i32 = 22;
const ENOENT: i32 = 2;

/// Errors returned by the kernel key-management primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The requested key or keyring does not exist (ENOKEY)
    #[error("required key not available")]
    NoKey,

    #[error("permission denied")]
    PermissionDenied,

    #[error("key has expired")]
    Expired,

    #[error("key has been revoked")]
    Revoked,

    #[error("invalid argument")]
    InvalidArgument,

    /// Unlink of a key that is not linked into the keyring (ENOENT)
    #[error("key is not linked into the keyring")]
    NotLinked,

    #[error("kernel keyring error (errno {0})")]
    Os(i32),
}

impl KernelError {
    /// Classify a raw errno value
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            ENOKEY => KernelError::NoKey,
            EACCES | EPERM => KernelError::PermissionDenied,
            EKEYEXPIRED => KernelError::Expired,
            EKEYREVOKED => KernelError::Revoked,
            EINVAL => KernelError::InvalidArgument,
            ENOENT => KernelError::NotLinked,
            other => KernelError::Os(other),
        }
    }

    /// Capture errno after a failed system call
    pub fn last_os_error() -> Self {
        match std::io::Error::last_os_error().raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            None => KernelError::Os(0),
        }
    }

    /// Whether this is the kernel's "no such key" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, KernelError::NoKey)
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
