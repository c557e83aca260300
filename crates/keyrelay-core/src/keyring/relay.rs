//! Permission relay: create keys and keyrings with a non-default permission mask
//!
//! The kernel only lets a caller change a key's permissions while it possesses
//! the key, and the default mask grants "setattr" to the possessor alone. A
//! key created directly in a keyring the caller does not possess can therefore
//! never be re-permissioned. The relay detours through the session keyring:
//!
//! 1. resolve the session keyring
//! 2. create the object in the session keyring (possessed)
//! 3. apply the mask
//! 4. link into the destination, then unlink from the session keyring
//!
//! Nothing is retried or cleaned up on failure. A failure after step 2
//! leaves the object in the session keyring (and, if only the final unlink
//! failed, also in the destination); the error carries its serial.

use std::fmt;

use thiserror::Error;

use crate::kernel::{KernelError, KeyOps, KeyPerm, KeySerial, SpecialKeyring};
use crate::logging::file_logger as log;

const MODULE: &str = "PermissionRelay";

/// The object the relay creates
#[derive(Debug, Clone, Copy)]
pub enum RelayObject<'a> {
    /// A `user` key carrying a payload
    Key { description: &'a str, payload: &'a [u8] },
    /// An empty keyring
    Keyring { name: &'a str },
}

impl RelayObject<'_> {
    fn kind(&self) -> &'static str {
        match self {
            RelayObject::Key { .. } => "key",
            RelayObject::Keyring { .. } => "keyring",
        }
    }

    fn name(&self) -> &str {
        match self {
            RelayObject::Key { description, .. } => description,
            RelayObject::Keyring { name } => name,
        }
    }
}

/// Protocol step, used to report where a relay failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStep {
    ResolveSession,
    Create,
    SetPermission,
    Link,
    Unlink,
}

impl fmt::Display for RelayStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayStep::ResolveSession => "resolve session keyring",
            RelayStep::Create => "create in session keyring",
            RelayStep::SetPermission => "set permission",
            RelayStep::Link => "link to destination",
            RelayStep::Unlink => "unlink from session keyring",
        };
        f.write_str(name)
    }
}

/// Progress of one relay run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Uncreated,
    CreatedInRelay(KeySerial),
    PermissionApplied(KeySerial),
    LinkedToDestination(KeySerial),
    Done(KeySerial),
}

/// Failure of a relay step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("accessing session keyring failed: {source}")]
    SessionUnavailable {
        #[source]
        source: KernelError,
    },

    #[error("adding {kind} {name:?} to session keyring failed: {source}")]
    Create {
        kind: &'static str,
        name: String,
        #[source]
        source: KernelError,
    },

    /// The object was created but is still in the session keyring with default permissions
    #[error("setting permission {perm} on {serial} failed: {source}")]
    SetPermission {
        serial: KeySerial,
        perm: KeyPerm,
        #[source]
        source: KernelError,
    },

    /// The object carries the new permissions but is only in the session keyring
    #[error("linking {serial} to keyring {destination} failed: {source}")]
    Link {
        serial: KeySerial,
        destination: KeySerial,
        #[source]
        source: KernelError,
    },

    /// The object is linked into the destination and still into the session keyring
    #[error("unlinking {serial} from session keyring failed: {source}")]
    Unlink {
        serial: KeySerial,
        #[source]
        source: KernelError,
    },
}

impl RelayError {
    pub fn step(&self) -> RelayStep {
        match self {
            RelayError::SessionUnavailable { .. } => RelayStep::ResolveSession,
            RelayError::Create { .. } => RelayStep::Create,
            RelayError::SetPermission { .. } => RelayStep::SetPermission,
            RelayError::Link { .. } => RelayStep::Link,
            RelayError::Unlink { .. } => RelayStep::Unlink,
        }
    }

    /// Serial of an object the failed run left behind in the session keyring
    pub fn stranded(&self) -> Option<KeySerial> {
        match self {
            RelayError::SetPermission { serial, .. }
            | RelayError::Link { serial, .. }
            | RelayError::Unlink { serial, .. } => Some(*serial),
            RelayError::SessionUnavailable { .. } | RelayError::Create { .. } => None,
        }
    }

    /// The kernel error that stopped the relay
    pub fn kernel_error(&self) -> &KernelError {
        match self {
            RelayError::SessionUnavailable { source }
            | RelayError::Create { source, .. }
            | RelayError::SetPermission { source, .. }
            | RelayError::Link { source, .. }
            | RelayError::Unlink { source, .. } => source,
        }
    }
}

/// Relay bound to a destination keyring and a permission mask
pub struct PermissionRelay<'a> {
    ops: &'a dyn KeyOps,
    destination: KeySerial,
    perm: KeyPerm,
}

impl<'a> PermissionRelay<'a> {
    pub fn new(ops: &'a dyn KeyOps, destination: KeySerial, perm: KeyPerm) -> Self {
        Self {
            ops,
            destination,
            perm,
        }
    }

    /// Run the full protocol and return the serial of the created object
    pub fn create(&self, object: RelayObject<'_>) -> Result<KeySerial, RelayError> {
        log::debug(
            MODULE,
            &format!(
                "relaying {} {:?} to keyring {} with perm {}",
                object.kind(),
                object.name(),
                self.destination,
                self.perm
            ),
        );

        let session = self
            .ops
            .special_keyring(SpecialKeyring::Session)
            .map_err(|source| RelayError::SessionUnavailable { source })?;

        let mut state = RelayState::Uncreated;
        loop {
            state = match self.advance(state, session, object) {
                Ok(RelayState::Done(serial)) => {
                    log::debug(MODULE, &format!("relay of {} finished", serial));
                    return Ok(serial);
                }
                Ok(next) => next,
                Err(err) => {
                    log::error(MODULE, &format!("relay failed at '{}': {}", err.step(), err));
                    return Err(err);
                }
            };
        }
    }

    /// Perform the single transition out of `state`
    pub fn advance(
        &self,
        state: RelayState,
        session: KeySerial,
        object: RelayObject<'_>,
    ) -> Result<RelayState, RelayError> {
        match state {
            RelayState::Uncreated => {
                let created = match object {
                    RelayObject::Key { description, payload } => self.ops.add_key(session, description, payload),
                    RelayObject::Keyring { name } => self.ops.create_keyring(session, name),
                };
                created
                    .map(RelayState::CreatedInRelay)
                    .map_err(|source| RelayError::Create {
                        kind: object.kind(),
                        name: object.name().to_string(),
                        source,
                    })
            }
            RelayState::CreatedInRelay(serial) => self
                .ops
                .set_perm(serial, self.perm)
                .map(|_| RelayState::PermissionApplied(serial))
                .map_err(|source| RelayError::SetPermission {
                    serial,
                    perm: self.perm,
                    source,
                }),
            // Already in place; unlinking from the session would drop the only link
            RelayState::PermissionApplied(serial) if self.destination == session => Ok(RelayState::Done(serial)),
            RelayState::PermissionApplied(serial) => self
                .ops
                .link(serial, self.destination)
                .map(|_| RelayState::LinkedToDestination(serial))
                .map_err(|source| RelayError::Link {
                    serial,
                    destination: self.destination,
                    source,
                }),
            RelayState::LinkedToDestination(serial) => self
                .ops
                .unlink(serial, session)
                .map(|_| RelayState::Done(serial))
                .map_err(|source| RelayError::Unlink { serial, source }),
            RelayState::Done(serial) => Ok(RelayState::Done(serial)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelOp, KeyType, MemoryKeyOps};

    const MASK: KeyPerm = KeyPerm::from_bits(0x3f3f_0000);

    struct Fixture {
        ops: MemoryKeyOps,
        session: KeySerial,
        destination: KeySerial,
    }

    fn fixture() -> Fixture {
        let ops = MemoryKeyOps::isolated();
        let session = ops.special(SpecialKeyring::Session).unwrap();
        let destination = ops.special(SpecialKeyring::UserSession).unwrap();
        Fixture { ops, session, destination }
    }

    fn key<'a>(payload: &'a [u8]) -> RelayObject<'a> {
        RelayObject::Key { description: "secret", payload }
    }

    #[test]
    fn test_direct_creation_cannot_be_repermissioned() {
        let f = fixture();
        let serial = f.ops.add_key(f.destination, "secret", b"v").unwrap();
        assert_eq!(f.ops.set_perm(serial, MASK), Err(KernelError::PermissionDenied));
    }

    #[test]
    fn test_relay_key_lands_only_in_destination() {
        let f = fixture();
        let relay = PermissionRelay::new(&f.ops, f.destination, MASK);

        let serial = relay.create(key(b"payload")).unwrap();

        assert!(f.ops.is_linked(f.destination, serial));
        assert!(!f.ops.is_linked(f.session, serial));
        assert_eq!(f.ops.perm(serial), Some(MASK));
        assert_eq!(f.ops.read(serial).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn test_relay_keyring_lands_only_in_destination() {
        let f = fixture();
        let relay = PermissionRelay::new(&f.ops, f.destination, MASK);

        let serial = relay.create(RelayObject::Keyring { name: "service" }).unwrap();

        assert!(f.ops.is_linked(f.destination, serial));
        assert!(!f.ops.is_linked(f.session, serial));
        assert_eq!(f.ops.perm(serial), Some(MASK));
        assert_eq!(f.ops.describe(serial).unwrap().key_type, KeyType::Keyring);
    }

    #[test]
    fn test_relay_into_session_keeps_object_linked() {
        let f = fixture();
        let relay = PermissionRelay::new(&f.ops, f.session, MASK);

        let serial = relay.create(key(b"payload")).unwrap();

        assert!(f.ops.exists(serial));
        assert!(f.ops.is_linked(f.session, serial));
        assert_eq!(f.ops.perm(serial), Some(MASK));
        assert_eq!(f.ops.read(serial).unwrap(), b"payload".to_vec());

        let applied = RelayState::PermissionApplied(serial);
        assert_eq!(relay.advance(applied, f.session, key(b"payload")).unwrap(), RelayState::Done(serial));
    }

    #[test]
    fn test_state_machine_transitions() {
        let f = fixture();
        let relay = PermissionRelay::new(&f.ops, f.destination, MASK);
        let object = key(b"v");

        let created = relay.advance(RelayState::Uncreated, f.session, object).unwrap();
        let RelayState::CreatedInRelay(serial) = created else {
            panic!("unexpected state {:?}", created);
        };
        assert!(f.ops.is_linked(f.session, serial));
        assert_eq!(f.ops.perm(serial), Some(KeyPerm::KERNEL_DEFAULT));

        let applied = relay.advance(created, f.session, object).unwrap();
        assert_eq!(applied, RelayState::PermissionApplied(serial));
        assert_eq!(f.ops.perm(serial), Some(MASK));

        let linked = relay.advance(applied, f.session, object).unwrap();
        assert_eq!(linked, RelayState::LinkedToDestination(serial));
        assert!(f.ops.is_linked(f.session, serial));
        assert!(f.ops.is_linked(f.destination, serial));

        let done = relay.advance(linked, f.session, object).unwrap();
        assert_eq!(done, RelayState::Done(serial));
        assert!(!f.ops.is_linked(f.session, serial));

        assert_eq!(relay.advance(done, f.session, object).unwrap(), done);
    }

    #[test]
    fn test_session_failure_creates_nothing() {
        let f = fixture();
        let before = f.ops.object_count();
        f.ops.fail_next(KernelOp::SpecialKeyring, KernelError::PermissionDenied);

        let err = PermissionRelay::new(&f.ops, f.destination, MASK)
            .create(key(b"v"))
            .unwrap_err();

        assert_eq!(err.step(), RelayStep::ResolveSession);
        assert_eq!(err.stranded(), None);
        assert_eq!(f.ops.object_count(), before);
    }

    #[test]
    fn test_create_failure_creates_nothing() {
        let f = fixture();
        let before = f.ops.object_count();
        f.ops.fail_next(KernelOp::AddKey, KernelError::Os(122));

        let err = PermissionRelay::new(&f.ops, f.destination, MASK)
            .create(key(b"v"))
            .unwrap_err();

        assert_eq!(err.step(), RelayStep::Create);
        assert_eq!(err.kernel_error(), &KernelError::Os(122));
        assert_eq!(f.ops.object_count(), before);
    }

    #[test]
    fn test_set_permission_failure_leaves_object_in_session() {
        let f = fixture();
        f.ops.fail_next(KernelOp::SetPerm, KernelError::PermissionDenied);

        let err = PermissionRelay::new(&f.ops, f.destination, MASK)
            .create(key(b"v"))
            .unwrap_err();

        assert_eq!(err.step(), RelayStep::SetPermission);
        let serial = err.stranded().unwrap();
        assert!(f.ops.is_linked(f.session, serial));
        assert!(!f.ops.is_linked(f.destination, serial));
        assert_eq!(f.ops.perm(serial), Some(KeyPerm::KERNEL_DEFAULT));
    }

    #[test]
    fn test_link_failure_leaves_repermissioned_object_in_session() {
        let f = fixture();
        f.ops.fail_next(KernelOp::Link, KernelError::PermissionDenied);

        let err = PermissionRelay::new(&f.ops, f.destination, MASK)
            .create(key(b"v"))
            .unwrap_err();

        assert_eq!(err.step(), RelayStep::Link);
        let serial = err.stranded().unwrap();
        assert!(f.ops.is_linked(f.session, serial));
        assert!(!f.ops.is_linked(f.destination, serial));
        assert_eq!(f.ops.perm(serial), Some(MASK));

        // Recoverable by hand: finish the move
        f.ops.link(serial, f.destination).unwrap();
        f.ops.unlink(serial, f.session).unwrap();
        assert!(f.ops.is_linked(f.destination, serial));
    }

    #[test]
    fn test_unlink_failure_leaves_object_doubly_linked() {
        let f = fixture();
        f.ops.fail_next(KernelOp::Unlink, KernelError::PermissionDenied);

        let err = PermissionRelay::new(&f.ops, f.destination, MASK)
            .create(key(b"v"))
            .unwrap_err();

        assert_eq!(err.step(), RelayStep::Unlink);
        let serial = err.stranded().unwrap();
        assert!(f.ops.is_linked(f.session, serial));
        assert!(f.ops.is_linked(f.destination, serial));
        assert_eq!(f.ops.perm(serial), Some(MASK));
    }

    #[test]
    fn test_error_messages_name_the_step() {
        let err = RelayError::Link {
            serial: KeySerial::new(7),
            destination: KeySerial::new(3),
            source: KernelError::PermissionDenied,
        };
        assert_eq!(err.to_string(), "linking 7 to keyring 3 failed: permission denied");
        assert_eq!(RelayStep::Unlink.to_string(), "unlink from session keyring");
    }
}
