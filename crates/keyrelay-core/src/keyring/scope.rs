//! Keyring scopes and their resolution to kernel keyrings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::traits::{KeyringError, KeyringResult};
use crate::kernel::{KeyOps, KeySerial, SpecialKeyring};
use crate::logging::file_logger as log;

const MODULE: &str = "Scope";

/// Context that anchors the top-level keyring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Session,
    Process,
    Thread,
    /// Reserved; the kernel does not implement group keyrings
    Group,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Session => "session",
            Scope::Process => "process",
            Scope::Thread => "thread",
            Scope::Group => "group",
        }
    }

    /// The special keyring backing this scope, if supported
    ///
    /// `user` maps to the user-session keyring.
    pub fn special_keyring(&self) -> Option<SpecialKeyring> {
        match self {
            Scope::User => Some(SpecialKeyring::UserSession),
            Scope::Session => Some(SpecialKeyring::Session),
            Scope::Process => Some(SpecialKeyring::Process),
            Scope::Thread => Some(SpecialKeyring::Thread),
            Scope::Group => None,
        }
    }

    /// Scopes that can be opened
    pub fn supported() -> &'static [Scope] {
        &[Scope::User, Scope::Session, Scope::Process, Scope::Thread]
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Scope::User),
            "session" => Ok(Scope::Session),
            "process" => Ok(Scope::Process),
            "thread" => Ok(Scope::Thread),
            "group" => Ok(Scope::Group),
            other => Err(KeyringError::UnsupportedScope(other.to_string())),
        }
    }
}

/// Resolve a scope name to the serial of its keyring
///
/// Unknown names and `group` fail with `UnsupportedScope` before any kernel call.
pub fn resolve_scope(ops: &dyn KeyOps, name: &str) -> KeyringResult<(Scope, KeySerial)> {
    let scope: Scope = name.parse()?;
    let special = scope
        .special_keyring()
        .ok_or_else(|| KeyringError::UnsupportedScope(name.to_string()))?;

    let serial = ops.special_keyring(special).map_err(|source| {
        log::warn(MODULE, &format!("{} keyring unavailable: {}", special.as_str(), source));
        KeyringError::ScopeUnavailable { scope, source }
    })?;
    log::debug(MODULE, &format!("scope {} resolved to {} keyring {}", scope, special.as_str(), serial));
    Ok((scope, serial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelError, KernelOp, MemoryKeyOps};

    #[test]
    fn test_supported_scopes_resolve() {
        let ops = MemoryKeyOps::new();
        for scope in Scope::supported() {
            let (resolved, serial) = resolve_scope(&ops, scope.as_str()).unwrap();
            assert_eq!(resolved, *scope);
            assert_eq!(Some(serial), ops.special(scope.special_keyring().unwrap()));
        }
    }

    #[test]
    fn test_user_scope_is_user_session_keyring() {
        assert_eq!(Scope::User.special_keyring(), Some(SpecialKeyring::UserSession));
    }

    #[test]
    fn test_unsupported_scopes_fail_before_kernel() {
        let ops = MemoryKeyOps::new();
        // A queued fault would surface as ScopeUnavailable if the kernel were touched
        ops.fail_next(KernelOp::SpecialKeyring, KernelError::PermissionDenied);

        for name in ["", "group", "invalid", "User"] {
            match resolve_scope(&ops, name) {
                Err(KeyringError::UnsupportedScope(got)) => assert_eq!(got, name),
                other => panic!("scope {:?} should be unsupported, got {:?}", name, other),
            }
        }

        assert!(matches!(
            resolve_scope(&ops, "session"),
            Err(KeyringError::ScopeUnavailable { scope: Scope::Session, source: KernelError::PermissionDenied })
        ));
    }

    #[test]
    fn test_scope_serde() {
        let scope: Scope = serde_json::from_str("\"thread\"").unwrap();
        assert_eq!(scope, Scope::Thread);
        assert_eq!(serde_json::to_string(&Scope::User).unwrap(), "\"user\"");
    }
}
