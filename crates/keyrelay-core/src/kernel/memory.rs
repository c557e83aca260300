//! In-memory model of the kernel key retention service

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use super::error::{KernelError, KernelResult};
use super::traits::{KernelOp, KeyOps};
use super::types::{KeyDescription, KeyPerm, KeySerial, KeyType, SpecialKeyring};

/// Permissions of the special keyrings (possessor and user have everything)
const SPECIAL_PERM: KeyPerm = KeyPerm::from_bits(0x3f3f_0000);

const ENOTDIR: i32 = 20;
const EDEADLK: i32 = 35;

/// Keyrings whose contents the caller possesses
const POSSESSION_ROOTS: [SpecialKeyring; 3] = [
    SpecialKeyring::Thread,
    SpecialKeyring::Process,
    SpecialKeyring::Session,
];

#[derive(Debug, Clone)]
enum Content {
    Data(Vec<u8>),
    Links(Vec<KeySerial>),
}

#[derive(Debug, Clone)]
struct Object {
    key_type: KeyType,
    description: String,
    perm: KeyPerm,
    content: Content,
}

impl Object {
    fn keyring(description: &str, perm: KeyPerm) -> Self {
        Self {
            key_type: KeyType::Keyring,
            description: description.to_string(),
            perm,
            content: Content::Links(Vec::new()),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<KeySerial, Object>,
    specials: HashMap<SpecialKeyring, KeySerial>,
    next_serial: i32,
    faults: HashMap<KernelOp, VecDeque<KernelError>>,
}

impl State {
    fn insert(&mut self, object: Object) -> KeySerial {
        self.next_serial += 1;
        let serial = KeySerial::new(self.next_serial);
        self.objects.insert(serial, object);
        serial
    }

    fn take_fault(&mut self, op: KernelOp) -> KernelResult<()> {
        match self.faults.get_mut(&op).and_then(|queue| queue.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Map special (negative) serials to real ones and check existence
    fn resolve(&self, serial: KeySerial) -> KernelResult<KeySerial> {
        let real = if serial.as_raw() < 0 {
            self.specials
                .iter()
                .find(|(which, _)| which.id() == serial.as_raw())
                .map(|(_, real)| *real)
                .ok_or(KernelError::InvalidArgument)?
        } else {
            serial
        };
        if self.objects.contains_key(&real) {
            Ok(real)
        } else {
            Err(KernelError::NoKey)
        }
    }

    fn object(&self, serial: KeySerial) -> KernelResult<&Object> {
        self.objects.get(&serial).ok_or(KernelError::NoKey)
    }

    fn links(&self, keyring: KeySerial) -> KernelResult<&Vec<KeySerial>> {
        match &self.object(keyring)?.content {
            Content::Links(links) => Ok(links),
            Content::Data(_) => Err(KernelError::Os(ENOTDIR)),
        }
    }

    fn links_mut(&mut self, keyring: KeySerial) -> KernelResult<&mut Vec<KeySerial>> {
        match self.objects.get_mut(&keyring).map(|o| &mut o.content) {
            Some(Content::Links(links)) => Ok(links),
            Some(Content::Data(_)) => Err(KernelError::Os(ENOTDIR)),
            None => Err(KernelError::NoKey),
        }
    }

    /// Whether `target` is reachable from `from` by following keyring links
    fn reachable(&self, from: KeySerial, target: KeySerial) -> bool {
        let mut queue = VecDeque::from([from]);
        let mut seen = HashSet::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if let Ok(links) = self.links(current) {
                for child in links {
                    if seen.insert(*child) {
                        queue.push_back(*child);
                    }
                }
            }
        }
        false
    }

    fn possessed(&self, serial: KeySerial) -> bool {
        POSSESSION_ROOTS
            .iter()
            .filter_map(|which| self.specials.get(which))
            .any(|root| self.reachable(*root, serial))
    }

    /// Effective permission bits for the (single) calling user
    fn effective(&self, serial: KeySerial) -> u32 {
        let Some(object) = self.objects.get(&serial) else {
            return 0;
        };
        let mut bits = object.perm.user();
        if self.possessed(serial) {
            bits |= object.perm.possessor();
        }
        bits
    }

    fn allows(&self, serial: KeySerial, need: u32) -> bool {
        self.effective(serial) & need == need
    }

    fn check(&self, serial: KeySerial, need: u32) -> KernelResult<()> {
        if self.allows(serial, need) {
            Ok(())
        } else {
            Err(KernelError::PermissionDenied)
        }
    }

    /// Insert a link, displacing any existing link to an object of the same type and description
    fn attach(&mut self, keyring: KeySerial, child: KeySerial) -> KernelResult<()> {
        let (key_type, description) = {
            let object = self.object(child)?;
            (object.key_type.clone(), object.description.clone())
        };
        let displaced: Vec<KeySerial> = self
            .links(keyring)?
            .iter()
            .copied()
            .filter(|existing| {
                self.objects
                    .get(existing)
                    .map(|o| o.key_type == key_type && o.description == description)
                    .unwrap_or(false)
            })
            .collect();
        let links = self.links_mut(keyring)?;
        links.retain(|existing| !displaced.contains(existing));
        links.push(child);
        self.collect_garbage();
        Ok(())
    }

    /// Drop every object no keyring links to anymore
    fn collect_garbage(&mut self) {
        loop {
            let mut referenced: HashSet<KeySerial> = self.specials.values().copied().collect();
            for object in self.objects.values() {
                if let Content::Links(links) = &object.content {
                    referenced.extend(links.iter().copied());
                }
            }
            let before = self.objects.len();
            self.objects.retain(|serial, _| referenced.contains(serial));
            if self.objects.len() == before {
                break;
            }
        }
    }
}

/// In-memory [`KeyOps`] implementation
///
/// Models the parts of the kernel the keyring backend depends on:
/// - special thread/process/session/user/user-session keyrings
/// - new keys and keyrings get the kernel default mask (`alswrv-----v------------`)
/// - possession: an object is possessed while reachable from the thread,
///   process or session keyring; possessor bits only apply then
/// - permission checks for search/read/write/link/setattr/view
/// - add_key updates an existing user key in place; links displace
///   same-named objects; unreferenced objects are garbage collected
///
/// Faults can be queued per operation with [`MemoryKeyOps::fail_next`].
#[derive(Debug)]
pub struct MemoryKeyOps {
    state: Mutex<State>,
}

impl MemoryKeyOps {
    /// A typical login session: the user-session keyring is linked into the session keyring
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A session that does not link the user-session keyring, so objects
    /// stored under it are not possessed
    pub fn isolated() -> Self {
        Self::build(false)
    }

    fn build(link_user_keyring: bool) -> Self {
        let mut state = State::default();
        for (which, name) in [
            (SpecialKeyring::Thread, "_tid"),
            (SpecialKeyring::Process, "_pid"),
            (SpecialKeyring::Session, "_ses"),
            (SpecialKeyring::User, "_uid.0"),
            (SpecialKeyring::UserSession, "_uid_ses.0"),
        ] {
            let serial = state.insert(Object::keyring(name, SPECIAL_PERM));
            state.specials.insert(which, serial);
        }
        if link_user_keyring {
            let session = state.specials.get(&SpecialKeyring::Session).copied();
            let user_session = state.specials.get(&SpecialKeyring::UserSession).copied();
            if let (Some(session), Some(user_session)) = (session, user_session) {
                if let Ok(links) = state.links_mut(session) {
                    links.push(user_session);
                }
            }
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Make the next call of `op` fail with `err` (queued, one-shot)
    pub fn fail_next(&self, op: KernelOp, err: KernelError) {
        self.state.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Real serial of a special keyring, without fault injection
    pub fn special(&self, which: SpecialKeyring) -> Option<KeySerial> {
        self.state.lock().specials.get(&which).copied()
    }

    /// Whether `keyring` links `key` directly
    pub fn is_linked(&self, keyring: KeySerial, key: KeySerial) -> bool {
        let state = self.state.lock();
        state
            .resolve(keyring)
            .and_then(|ring| state.links(ring).map(|links| links.contains(&key)))
            .unwrap_or(false)
    }

    pub fn perm(&self, key: KeySerial) -> Option<KeyPerm> {
        self.state.lock().objects.get(&key).map(|o| o.perm)
    }

    pub fn exists(&self, key: KeySerial) -> bool {
        self.state.lock().objects.contains_key(&key)
    }

    pub fn is_possessed(&self, key: KeySerial) -> bool {
        self.state.lock().possessed(key)
    }

    /// Number of live objects, special keyrings included
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }
}

impl Default for MemoryKeyOps {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyOps for MemoryKeyOps {
    fn special_keyring(&self, which: SpecialKeyring) -> KernelResult<KeySerial> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::SpecialKeyring)?;
        state.specials.get(&which).copied().ok_or(KernelError::InvalidArgument)
    }

    fn search(&self, keyring: KeySerial, key_type: &KeyType, description: &str) -> KernelResult<KeySerial> {
        let mut guard = self.state.lock();
        guard.take_fault(KernelOp::Search)?;
        let state = &*guard;

        let start = state.resolve(keyring)?;
        state.links(start)?;
        state.check(start, KeyPerm::SEARCH)?;

        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);
        while let Some(ring) = queue.pop_front() {
            for child in state.links(ring)? {
                let Some(object) = state.objects.get(child) else {
                    continue;
                };
                if !state.allows(*child, KeyPerm::SEARCH) {
                    continue;
                }
                if object.key_type == *key_type && object.description == description {
                    return Ok(*child);
                }
                if object.key_type == KeyType::Keyring && seen.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
        Err(KernelError::NoKey)
    }

    fn add_key(&self, keyring: KeySerial, description: &str, payload: &[u8]) -> KernelResult<KeySerial> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::AddKey)?;

        let ring = state.resolve(keyring)?;
        state.links(ring)?;
        state.check(ring, KeyPerm::WRITE)?;

        let existing = state.links(ring)?.iter().copied().find(|serial| {
            state
                .objects
                .get(serial)
                .map(|o| o.key_type == KeyType::User && o.description == description)
                .unwrap_or(false)
        });
        if let Some(serial) = existing {
            state.check(serial, KeyPerm::WRITE)?;
            if let Some(object) = state.objects.get_mut(&serial) {
                object.content = Content::Data(payload.to_vec());
            }
            return Ok(serial);
        }

        let serial = state.insert(Object {
            key_type: KeyType::User,
            description: description.to_string(),
            perm: KeyPerm::KERNEL_DEFAULT,
            content: Content::Data(payload.to_vec()),
        });
        state.attach(ring, serial)?;
        Ok(serial)
    }

    fn create_keyring(&self, parent: KeySerial, name: &str) -> KernelResult<KeySerial> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::CreateKeyring)?;

        let ring = state.resolve(parent)?;
        state.links(ring)?;
        state.check(ring, KeyPerm::WRITE)?;

        let serial = state.insert(Object::keyring(name, KeyPerm::KERNEL_DEFAULT));
        state.attach(ring, serial)?;
        Ok(serial)
    }

    fn link(&self, key: KeySerial, keyring: KeySerial) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::Link)?;

        let key = state.resolve(key)?;
        let ring = state.resolve(keyring)?;
        state.links(ring)?;
        state.check(key, KeyPerm::LINK)?;
        state.check(ring, KeyPerm::WRITE)?;

        if state.links(ring)?.contains(&key) {
            return Ok(());
        }
        if state.reachable(key, ring) {
            return Err(KernelError::Os(EDEADLK));
        }
        state.attach(ring, key)
    }

    fn unlink(&self, key: KeySerial, keyring: KeySerial) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::Unlink)?;

        let key = state.resolve(key)?;
        let ring = state.resolve(keyring)?;
        state.check(ring, KeyPerm::WRITE)?;

        let links = state.links_mut(ring)?;
        let position = links.iter().position(|s| *s == key).ok_or(KernelError::NotLinked)?;
        links.remove(position);
        state.collect_garbage();
        Ok(())
    }

    fn set_perm(&self, key: KeySerial, perm: KeyPerm) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::SetPerm)?;

        let key = state.resolve(key)?;
        state.check(key, KeyPerm::SETATTR)?;
        if let Some(object) = state.objects.get_mut(&key) {
            object.perm = perm;
        }
        Ok(())
    }

    fn list(&self, keyring: KeySerial) -> KernelResult<Vec<KeySerial>> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::List)?;

        let ring = state.resolve(keyring)?;
        state.check(ring, KeyPerm::READ)?;
        state.links(ring).cloned()
    }

    fn describe(&self, key: KeySerial) -> KernelResult<KeyDescription> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::Describe)?;

        let key = state.resolve(key)?;
        state.check(key, KeyPerm::VIEW)?;
        let object = state.object(key)?;
        Ok(KeyDescription {
            key_type: object.key_type.clone(),
            uid: 0,
            gid: 0,
            perm: object.perm,
            description: object.description.clone(),
        })
    }

    fn read(&self, key: KeySerial) -> KernelResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.take_fault(KernelOp::Read)?;

        let key = state.resolve(key)?;
        state.check(key, KeyPerm::READ)?;
        match &state.object(key)?.content {
            Content::Data(data) => Ok(data.clone()),
            Content::Links(links) => Ok(links.iter().flat_map(|s| s.as_raw().to_ne_bytes()).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(ops: &MemoryKeyOps) -> KeySerial {
        ops.special(SpecialKeyring::Session).unwrap()
    }

    fn user(ops: &MemoryKeyOps) -> KeySerial {
        ops.special(SpecialKeyring::UserSession).unwrap()
    }

    #[test]
    fn test_special_ids_resolve() {
        let ops = MemoryKeyOps::new();
        let key = ops.add_key(KeySerial::new(SpecialKeyring::Session.id()), "k", b"v").unwrap();
        assert!(ops.is_linked(session(&ops), key));
        assert_eq!(
            ops.special_keyring(SpecialKeyring::Group),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_new_key_has_default_perm_and_is_possessed_in_session() {
        let ops = MemoryKeyOps::new();
        let key = ops.add_key(session(&ops), "k", b"v").unwrap();
        assert_eq!(ops.perm(key), Some(KeyPerm::KERNEL_DEFAULT));
        assert!(ops.is_possessed(key));
        assert_eq!(ops.read(key).unwrap(), b"v".to_vec());
    }

    #[test]
    fn test_possession_lost_outside_session() {
        let ops = MemoryKeyOps::isolated();
        let key = ops.add_key(user(&ops), "k", b"v").unwrap();
        assert!(!ops.is_possessed(key));

        // Default mask only grants the user "view"
        assert_eq!(ops.read(key), Err(KernelError::PermissionDenied));
        assert_eq!(
            ops.set_perm(key, KeyPerm::from_bits(0x3f3f_0000)),
            Err(KernelError::PermissionDenied)
        );
    }

    #[test]
    fn test_user_keyring_possessed_in_login_session() {
        let ops = MemoryKeyOps::new();
        let key = ops.add_key(user(&ops), "k", b"v").unwrap();
        assert!(ops.is_possessed(key));
        ops.set_perm(key, KeyPerm::from_bits(0x3f3f_0000)).unwrap();
    }

    #[test]
    fn test_add_key_updates_in_place() {
        let ops = MemoryKeyOps::new();
        let first = ops.add_key(session(&ops), "k", b"one").unwrap();
        let second = ops.add_key(session(&ops), "k", b"two").unwrap();
        assert_eq!(first, second);
        assert_eq!(ops.read(first).unwrap(), b"two".to_vec());
    }

    #[test]
    fn test_search_is_recursive() {
        let ops = MemoryKeyOps::new();
        let ring = ops.create_keyring(session(&ops), "nested").unwrap();
        let key = ops.add_key(ring, "deep", b"v").unwrap();

        assert_eq!(ops.search(session(&ops), &KeyType::User, "deep").unwrap(), key);
        assert_eq!(ops.search(session(&ops), &KeyType::Keyring, "nested").unwrap(), ring);
        assert_eq!(
            ops.search(session(&ops), &KeyType::Keyring, "deep"),
            Err(KernelError::NoKey)
        );
    }

    #[test]
    fn test_unlink_collects_garbage() {
        let ops = MemoryKeyOps::new();
        let before = ops.object_count();
        let key = ops.add_key(session(&ops), "k", b"v").unwrap();
        assert_eq!(ops.object_count(), before + 1);

        ops.unlink(key, session(&ops)).unwrap();
        assert!(!ops.exists(key));
        assert_eq!(ops.object_count(), before);
        assert_eq!(ops.unlink(key, session(&ops)), Err(KernelError::NoKey));
    }

    #[test]
    fn test_unlink_not_linked() {
        let ops = MemoryKeyOps::new();
        let key = ops.add_key(session(&ops), "k", b"v").unwrap();
        assert_eq!(ops.unlink(key, user(&ops)), Err(KernelError::NotLinked));
    }

    #[test]
    fn test_link_keeps_object_alive_after_unlink() {
        let ops = MemoryKeyOps::new();
        let key = ops.add_key(session(&ops), "k", b"v").unwrap();
        ops.link(key, user(&ops)).unwrap();
        ops.unlink(key, session(&ops)).unwrap();

        assert!(ops.exists(key));
        assert!(ops.is_linked(user(&ops), key));
        assert!(!ops.is_linked(session(&ops), key));
    }

    #[test]
    fn test_create_keyring_displaces_same_name() {
        let ops = MemoryKeyOps::new();
        let first = ops.create_keyring(session(&ops), "ring").unwrap();
        let second = ops.create_keyring(session(&ops), "ring").unwrap();
        assert_ne!(first, second);
        assert!(!ops.exists(first));
        assert!(ops.is_linked(session(&ops), second));
    }

    #[test]
    fn test_list_and_describe() {
        let ops = MemoryKeyOps::isolated();
        let ring = ops.create_keyring(session(&ops), "ring").unwrap();
        let key = ops.add_key(ring, "k", b"v").unwrap();

        assert_eq!(ops.list(ring).unwrap(), vec![key]);
        let desc = ops.describe(key).unwrap();
        assert_eq!(desc.key_type, KeyType::User);
        assert_eq!(desc.description, "k");
        assert_eq!(desc.perm, KeyPerm::KERNEL_DEFAULT);
    }

    #[test]
    fn test_link_cycle_rejected() {
        let ops = MemoryKeyOps::new();
        let outer = ops.create_keyring(session(&ops), "outer").unwrap();
        let inner = ops.create_keyring(outer, "inner").unwrap();
        assert_eq!(ops.link(outer, inner), Err(KernelError::Os(EDEADLK)));
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let ops = MemoryKeyOps::new();
        ops.fail_next(KernelOp::AddKey, KernelError::PermissionDenied);

        assert_eq!(
            ops.add_key(session(&ops), "k", b"v"),
            Err(KernelError::PermissionDenied)
        );
        assert!(ops.add_key(session(&ops), "k", b"v").is_ok());
    }
}
