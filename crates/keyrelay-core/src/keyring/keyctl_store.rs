//! Keyring backend on the Linux kernel key retention service

use std::sync::Arc;

use super::named::resolve_named_keyring;
use super::relay::{PermissionRelay, RelayObject};
use super::scope::{resolve_scope, Scope};
use super::traits::{BackendType, Item, Keyring, KeyringError, KeyringResult, Metadata};
use crate::config::KeyctlConfig;
use crate::kernel::{KeyOps, KeyPerm, KeySerial, KeyType};
use crate::logging::file_logger as log;

const MODULE: &str = "KeyctlKeyring";

/// Keyring backed by a kernel keyring
///
/// Items are `user` keys whose description is the item key. They live in the
/// scope keyring itself, or in a named keyring beneath it when
/// `container_name` is configured.
///
/// When a permission mask is configured, every key (and the named keyring,
/// if this instance creates it) is created through the permission relay so
/// that it carries the mask instead of the kernel defaults.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use keyrelay_core::config::KeyctlConfig;
/// use keyrelay_core::kernel::MemoryKeyOps;
/// use keyrelay_core::keyring::{Item, Keyring, KeyctlKeyring};
///
/// let ops = Arc::new(MemoryKeyOps::new());
/// let ring = KeyctlKeyring::open(ops, &KeyctlConfig::new("user")).unwrap();
///
/// ring.set(Item::new("test", "loose lips sink ships")).unwrap();
/// assert_eq!(ring.keys().unwrap(), vec!["test".to_string()]);
/// ```
pub struct KeyctlKeyring {
    ops: Arc<dyn KeyOps>,
    keyring: KeySerial,
    perm: Option<KeyPerm>,
    scope: Scope,
}

impl KeyctlKeyring {
    /// Resolve the configured scope and named keyring
    pub fn open(ops: Arc<dyn KeyOps>, config: &KeyctlConfig) -> KeyringResult<Self> {
        let perm = KeyPerm::from_mask(config.permission_mask);
        let (scope, parent) = resolve_scope(ops.as_ref(), &config.scope)?;
        let keyring = resolve_named_keyring(ops.as_ref(), parent, config.container_name.as_deref(), perm)?;

        log::info(
            MODULE,
            &format!(
                "opened scope={} container={:?} keyring={} perm={}",
                scope,
                config.container_name,
                keyring,
                perm.map(|p| p.to_string()).unwrap_or_else(|| "default".to_string())
            ),
        );
        Ok(Self {
            ops,
            keyring,
            perm,
            scope,
        })
    }

    /// Open against the running kernel
    #[cfg(target_os = "linux")]
    pub fn open_system(config: &KeyctlConfig) -> KeyringResult<Self> {
        Self::open(Arc::new(crate::kernel::LinuxKeyOps::new()), config)
    }

    /// Serial of the keyring items are stored in
    pub fn keyring(&self) -> KeySerial {
        self.keyring
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn perm(&self) -> Option<KeyPerm> {
        self.perm
    }
}

impl Keyring for KeyctlKeyring {
    fn backend(&self) -> BackendType {
        BackendType::KeyCtl
    }

    fn get(&self, key: &str) -> KeyringResult<Item> {
        log::debug(MODULE, &format!("get() key='{}', keyring={}", key, self.keyring));
        let serial = match self.ops.search(self.keyring, &KeyType::User, key) {
            Ok(serial) => serial,
            Err(err) if err.is_not_found() => return Err(KeyringError::KeyNotFound),
            Err(err) => {
                log::warn(MODULE, &format!("get() search failed: {}", err));
                return Err(err.into());
            }
        };

        let data = self.ops.read(serial)?;
        log::debug(MODULE, &format!("get() found {}, value len={}", serial, data.len()));
        Ok(Item {
            key: key.to_string(),
            data,
        })
    }

    // Permissions and expiry could be reported here; the metadata type has no place for them yet.
    fn get_metadata(&self, _key: &str) -> KeyringResult<Metadata> {
        Err(KeyringError::MetadataNotSupported)
    }

    fn set(&self, item: Item) -> KeyringResult<()> {
        log::debug(
            MODULE,
            &format!("set() key='{}', value len={}, keyring={}", item.key, item.data.len(), self.keyring),
        );
        let serial = match self.perm {
            // Kernel defaults (alswrv-----v------------)
            None => self.ops.add_key(self.keyring, &item.key, &item.data)?,
            Some(perm) => PermissionRelay::new(self.ops.as_ref(), self.keyring, perm).create(RelayObject::Key {
                description: &item.key,
                payload: &item.data,
            })?,
        };
        log::debug(MODULE, &format!("set() stored as {}", serial));
        Ok(())
    }

    fn remove(&self, key: &str) -> KeyringResult<()> {
        log::debug(MODULE, &format!("remove() key='{}', keyring={}", key, self.keyring));
        // Every search failure counts as "not found" here, not only ENOKEY.
        let serial = self
            .ops
            .search(self.keyring, &KeyType::User, key)
            .map_err(|_| KeyringError::KeyNotFound)?;

        self.ops.unlink(serial, self.keyring)?;
        Ok(())
    }

    fn keys(&self) -> KeyringResult<Vec<String>> {
        let mut results = Vec::new();
        for serial in self.ops.list(self.keyring)? {
            let info = self.ops.describe(serial)?;
            if info.is_user_key() {
                results.push(info.description);
            }
        }
        log::debug(MODULE, &format!("keys() returned {} keys", results.len()));
        Ok(results)
    }
}
