//! Open-or-create for named keyrings beneath a scope keyring

use super::relay::{PermissionRelay, RelayObject};
use super::traits::{ContainerCreateError, KeyringError, KeyringResult};
use crate::kernel::{KeyOps, KeyPerm, KeySerial, KeyType};
use crate::logging::file_logger as log;

const MODULE: &str = "NamedKeyring";

/// Resolve the keyring operations should target
///
/// With no name (or an empty one) this is `parent` itself. Otherwise the named
/// keyring is searched for under `parent` and created there when the kernel
/// reports it missing. Two callers racing to create the same keyring are not
/// coordinated; the loser sees an ordinary error.
pub fn resolve_named_keyring(
    ops: &dyn KeyOps,
    parent: KeySerial,
    name: Option<&str>,
    perm: Option<KeyPerm>,
) -> KeyringResult<KeySerial> {
    let name = match name {
        Some(name) if !name.is_empty() => name,
        _ => return Ok(parent),
    };

    match ops.search(parent, &KeyType::Keyring, name) {
        Ok(serial) => {
            log::debug(MODULE, &format!("opened keyring {:?} ({})", name, serial));
            Ok(serial)
        }
        Err(err) if err.is_not_found() => {
            log::info(MODULE, &format!("keyring {:?} not found under {}, creating", name, parent));
            create_named_keyring(ops, parent, name, perm).map_err(|source| {
                log::error(MODULE, &format!("creating keyring {:?} failed: {}", name, source));
                KeyringError::ContainerCreateFailed {
                    name: name.to_string(),
                    source,
                }
            })
        }
        Err(source) => {
            log::warn(MODULE, &format!("opening keyring {:?} failed: {}", name, source));
            Err(KeyringError::ContainerLookupFailed {
                name: name.to_string(),
                source,
            })
        }
    }
}

fn create_named_keyring(
    ops: &dyn KeyOps,
    parent: KeySerial,
    name: &str,
    perm: Option<KeyPerm>,
) -> Result<KeySerial, ContainerCreateError> {
    match perm {
        None => Ok(ops.create_keyring(parent, name)?),
        Some(perm) => Ok(PermissionRelay::new(ops, parent, perm).create(RelayObject::Keyring { name })?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelError, KernelOp, MemoryKeyOps, SpecialKeyring};
    use crate::keyring::relay::RelayStep;

    fn parent(ops: &MemoryKeyOps) -> KeySerial {
        ops.special(SpecialKeyring::UserSession).unwrap()
    }

    #[test]
    fn test_no_name_returns_parent() {
        let ops = MemoryKeyOps::new();
        let p = parent(&ops);
        assert_eq!(resolve_named_keyring(&ops, p, None, None).unwrap(), p);
        assert_eq!(resolve_named_keyring(&ops, p, Some(""), None).unwrap(), p);
    }

    #[test]
    fn test_creates_then_reopens() {
        let ops = MemoryKeyOps::new();
        let p = parent(&ops);

        let created = resolve_named_keyring(&ops, p, Some("service"), None).unwrap();
        assert_ne!(created, p);
        assert!(ops.is_linked(p, created));
        assert_eq!(ops.perm(created), Some(KeyPerm::KERNEL_DEFAULT));

        let reopened = resolve_named_keyring(&ops, p, Some("service"), None).unwrap();
        assert_eq!(created, reopened);
    }

    #[test]
    fn test_creates_with_custom_perm_through_relay() {
        let ops = MemoryKeyOps::isolated();
        let p = parent(&ops);
        let session = ops.special(SpecialKeyring::Session).unwrap();
        let perm = KeyPerm::from_bits(0x3f3f_0000);

        let created = resolve_named_keyring(&ops, p, Some("service"), Some(perm)).unwrap();
        assert!(ops.is_linked(p, created));
        assert!(!ops.is_linked(session, created));
        assert_eq!(ops.perm(created), Some(perm));
    }

    #[test]
    fn test_creates_with_custom_perm_under_session() {
        let ops = MemoryKeyOps::new();
        let session = ops.special(SpecialKeyring::Session).unwrap();
        let perm = KeyPerm::from_bits(0x3f3f_0000);

        let created = resolve_named_keyring(&ops, session, Some("service"), Some(perm)).unwrap();
        assert!(ops.exists(created));
        assert!(ops.is_linked(session, created));
        assert_eq!(ops.perm(created), Some(perm));

        let reopened = resolve_named_keyring(&ops, session, Some("service"), Some(perm)).unwrap();
        assert_eq!(created, reopened);
    }

    #[test]
    fn test_lookup_failure_is_not_treated_as_missing() {
        let ops = MemoryKeyOps::new();
        let p = parent(&ops);
        let before = ops.object_count();
        ops.fail_next(KernelOp::Search, KernelError::PermissionDenied);

        let err = resolve_named_keyring(&ops, p, Some("service"), None).unwrap_err();
        assert!(matches!(
            err,
            KeyringError::ContainerLookupFailed { ref name, source: KernelError::PermissionDenied } if name == "service"
        ));
        assert_eq!(ops.object_count(), before);
    }

    #[test]
    fn test_lost_creation_race_is_a_typed_error() {
        let ops = MemoryKeyOps::new();
        let p = parent(&ops);
        // Search reported "no such key", then another actor got in the way of the creation
        ops.fail_next(KernelOp::CreateKeyring, KernelError::Os(17));

        let err = resolve_named_keyring(&ops, p, Some("service"), None).unwrap_err();
        match err {
            KeyringError::ContainerCreateFailed { name, source } => {
                assert_eq!(name, "service");
                assert_eq!(source, ContainerCreateError::Kernel(KernelError::Os(17)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_relay_failure_during_creation() {
        let ops = MemoryKeyOps::isolated();
        let p = parent(&ops);
        ops.fail_next(KernelOp::Link, KernelError::PermissionDenied);

        let err = resolve_named_keyring(&ops, p, Some("service"), Some(KeyPerm::from_bits(0x3f3f_0000)))
            .unwrap_err();
        match err {
            KeyringError::ContainerCreateFailed {
                source: ContainerCreateError::Relay(relay),
                ..
            } => assert_eq!(relay.step(), RelayStep::Link),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
