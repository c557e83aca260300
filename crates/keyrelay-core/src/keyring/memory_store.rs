//! In-memory keyring

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::traits::{BackendType, Item, Keyring, KeyringError, KeyringResult, Metadata};

/// In-memory keyring for testing and ephemeral use
///
/// Items are lost when the keyring is dropped. Keys are returned in sorted order.
///
/// # Example
///
/// ```
/// use keyrelay_core::keyring::{Item, Keyring, MemoryKeyring};
///
/// let ring = MemoryKeyring::new();
/// ring.set(Item::new("openai", "sk-test")).unwrap();
/// assert_eq!(ring.keys().unwrap(), vec!["openai".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    items: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a keyring with initial items
    pub fn with_items(initial: impl IntoIterator<Item = Item>) -> Self {
        Self {
            items: RwLock::new(initial.into_iter().map(|item| (item.key, item.data)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }
}

impl Keyring for MemoryKeyring {
    fn backend(&self) -> BackendType {
        BackendType::Memory
    }

    fn get(&self, key: &str) -> KeyringResult<Item> {
        self.items
            .read()
            .get(key)
            .map(|data| Item::new(key, data.clone()))
            .ok_or(KeyringError::KeyNotFound)
    }

    fn get_metadata(&self, _key: &str) -> KeyringResult<Metadata> {
        Err(KeyringError::MetadataNotSupported)
    }

    fn set(&self, item: Item) -> KeyringResult<()> {
        self.items.write().insert(item.key, item.data);
        Ok(())
    }

    fn remove(&self, key: &str) -> KeyringResult<()> {
        self.items
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(KeyringError::KeyNotFound)
    }

    fn keys(&self) -> KeyringResult<Vec<String>> {
        Ok(self.items.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_keyring_crud() {
        let ring = MemoryKeyring::new();
        assert!(ring.is_empty());
        assert!(ring.keys().unwrap().is_empty());

        ring.set(Item::new("test", "value")).unwrap();
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.get("test").unwrap(), Item::new("test", "value"));

        ring.set(Item::new("test", "new_value")).unwrap();
        assert_eq!(ring.get("test").unwrap().data, b"new_value".to_vec());

        ring.remove("test").unwrap();
        assert!(matches!(ring.get("test"), Err(KeyringError::KeyNotFound)));
        assert!(matches!(ring.remove("test"), Err(KeyringError::KeyNotFound)));
    }

    #[test]
    fn test_memory_keyring_sorted_keys() {
        let ring = MemoryKeyring::with_items([Item::new("b", "2"), Item::new("a", "1")]);
        assert_eq!(ring.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);

        ring.clear();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_memory_keyring_metadata_unsupported() {
        let ring = MemoryKeyring::new();
        assert!(matches!(ring.get_metadata("x"), Err(KeyringError::MetadataNotSupported)));
    }

    #[test]
    fn test_memory_keyring_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(MemoryKeyring::new());
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    let key = format!("key_{}", i);
                    ring.set(Item::new(key.as_str(), format!("value_{}", i))).unwrap();
                    assert!(ring.get(&key).is_ok());
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ring.len(), 10);
    }
}
