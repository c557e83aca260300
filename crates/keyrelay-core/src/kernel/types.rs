//! Kernel key types: serials, permission masks, special keyrings and descriptions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Serial number of a key or keyring in the kernel
///
/// Special keyrings are addressed by negative serials (see [`SpecialKeyring`]);
/// real objects always have positive serials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeySerial(i32);

impl KeySerial {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for KeySerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for KeySerial {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// Kernel permission mask for a key
///
/// Four bytes, most significant first: possessor, user, group, other.
/// Each byte is a combination of [`KeyPerm::VIEW`] .. [`KeyPerm::SETATTR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPerm(u32);

impl KeyPerm {
    pub const VIEW: u32 = 0x01;
    pub const READ: u32 = 0x02;
    pub const WRITE: u32 = 0x04;
    pub const SEARCH: u32 = 0x08;
    pub const LINK: u32 = 0x10;
    pub const SETATTR: u32 = 0x20;
    pub const ALL: u32 = 0x3f;

    /// Permissions the kernel assigns to a freshly created key (`alswrv-----v------------`)
    pub const KERNEL_DEFAULT: KeyPerm = KeyPerm(0x3f01_0000);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Interpret a configured mask, where zero means "keep kernel defaults"
    pub fn from_mask(mask: u32) -> Option<Self> {
        (mask != 0).then_some(Self(mask))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn possessor(self) -> u32 {
        (self.0 >> 24) & Self::ALL
    }

    pub const fn user(self) -> u32 {
        (self.0 >> 16) & Self::ALL
    }

    pub const fn group(self) -> u32 {
        (self.0 >> 8) & Self::ALL
    }

    pub const fn other(self) -> u32 {
        self.0 & Self::ALL
    }
}

impl fmt::Display for KeyPerm {
    /// Renders the mask the way `keyctl describe` does, e.g. `alswrv-----v------------`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const FLAGS: [(u32, char); 6] = [
            (KeyPerm::SETATTR, 'a'),
            (KeyPerm::LINK, 'l'),
            (KeyPerm::SEARCH, 's'),
            (KeyPerm::WRITE, 'w'),
            (KeyPerm::READ, 'r'),
            (KeyPerm::VIEW, 'v'),
        ];
        for class in [self.possessor(), self.user(), self.group(), self.other()] {
            for (bit, flag) in FLAGS {
                let c = if class & bit != 0 { flag } else { '-' };
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Well-known keyrings addressable without a serial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKeyring {
    Thread,
    Process,
    Session,
    User,
    UserSession,
    Group,
}

impl SpecialKeyring {
    /// The `KEY_SPEC_*` identifier understood by the kernel
    pub const fn id(self) -> i32 {
        match self {
            SpecialKeyring::Thread => -1,
            SpecialKeyring::Process => -2,
            SpecialKeyring::Session => -3,
            SpecialKeyring::User => -4,
            SpecialKeyring::UserSession => -5,
            SpecialKeyring::Group => -6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialKeyring::Thread => "thread",
            SpecialKeyring::Process => "process",
            SpecialKeyring::Session => "session",
            SpecialKeyring::User => "user",
            SpecialKeyring::UserSession => "user-session",
            SpecialKeyring::Group => "group",
        }
    }
}

/// Type of a kernel key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Arbitrary binary payload
    User,
    /// Container for other keys
    Keyring,
    /// Any other kernel key type (logon, big_key, asymmetric, ...)
    Other(String),
}

impl KeyType {
    pub fn as_str(&self) -> &str {
        match self {
            KeyType::User => "user",
            KeyType::Keyring => "keyring",
            KeyType::Other(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "user" => KeyType::User,
            "keyring" => KeyType::Keyring,
            other => KeyType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed result of `KEYCTL_DESCRIBE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    pub key_type: KeyType,
    pub uid: u32,
    pub gid: u32,
    pub perm: KeyPerm,
    pub description: String,
}

impl KeyDescription {
    /// Parse the kernel's `type;uid;gid;perm;description` format
    ///
    /// The description itself may contain `;`, so only the first four
    /// separators are significant. The permission field is hexadecimal.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim_end_matches('\0');
        let mut fields = raw.splitn(5, ';');
        let key_type = KeyType::parse(fields.next()?);
        let uid = fields.next()?.parse().ok()?;
        let gid = fields.next()?.parse().ok()?;
        let perm = u32::from_str_radix(fields.next()?, 16).ok()?;
        let description = fields.next()?.to_string();

        Some(Self {
            key_type,
            uid,
            gid,
            perm: KeyPerm::from_bits(perm),
            description,
        })
    }

    pub fn is_user_key(&self) -> bool {
        self.key_type == KeyType::User
    }
}
