//! Linux key retention service via raw `keyctl(2)` / `add_key(2)` system calls

use std::ffi::CString;
use std::ptr;

use libc::{c_long, c_void};

use super::error::{KernelError, KernelResult};
use super::traits::KeyOps;
use super::types::{KeyDescription, KeyPerm, KeySerial, KeyType, SpecialKeyring};

const KEYCTL_GET_KEYRING_ID: c_long = 0;
const KEYCTL_SETPERM: c_long = 5;
const KEYCTL_DESCRIBE: c_long = 6;
const KEYCTL_LINK: c_long = 8;
const KEYCTL_UNLINK: c_long = 9;
const KEYCTL_SEARCH: c_long = 10;
const KEYCTL_READ: c_long = 11;

/// [`KeyOps`] backed by the running kernel
///
/// Keyring handles are only meaningful inside the calling context: the thread
/// keyring belongs to the calling thread, the session keyring to the process
/// session, and so on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxKeyOps {
    _private: (),
}

impl LinuxKeyOps {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

fn keyctl(cmd: c_long, arg2: c_long, arg3: c_long, arg4: c_long, arg5: c_long) -> KernelResult<c_long> {
    // SAFETY: keyctl takes integer arguments; any pointer argument passed by
    // callers here references memory that outlives the call, with a length
    // that matches the allocation.
    let rc = unsafe { libc::syscall(libc::SYS_keyctl, cmd, arg2, arg3, arg4, arg5) };
    if rc < 0 {
        let err = KernelError::last_os_error();
        crate::trace_log!("keyctl({}, {}) failed: {}", cmd, arg2, err);
        return Err(err);
    }
    crate::trace_log!("keyctl({}, {}) = {}", cmd, arg2, rc);
    Ok(rc)
}

fn c_string(s: &str) -> KernelResult<CString> {
    CString::new(s).map_err(|_| KernelError::InvalidArgument)
}

fn serial_arg(serial: KeySerial) -> c_long {
    serial.as_raw() as c_long
}

fn add_key_raw(key_type: &str, description: &str, payload: Option<&[u8]>, keyring: KeySerial) -> KernelResult<KeySerial> {
    let key_type = c_string(key_type)?;
    let description = c_string(description)?;
    let (data, len) = match payload {
        Some(bytes) => (bytes.as_ptr() as *const c_void, bytes.len()),
        None => (ptr::null(), 0),
    };

    // SAFETY: both strings are NUL-terminated and live until the call returns;
    // `data` is either null with a zero length or points at `len` readable bytes.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_add_key,
            key_type.as_ptr(),
            description.as_ptr(),
            data,
            len,
            serial_arg(keyring),
        )
    };
    if rc < 0 {
        let err = KernelError::last_os_error();
        crate::trace_log!("add_key({:?}) failed: {}", description, err);
        return Err(err);
    }
    Ok(KeySerial::new(rc as i32))
}

/// Run a "fill this buffer" keyctl command, growing the buffer until the result fits
fn read_into_buffer(cmd: c_long, key: KeySerial) -> KernelResult<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let ptr = if buf.is_empty() {
            ptr::null_mut()
        } else {
            buf.as_mut_ptr()
        };
        let needed = keyctl(cmd, serial_arg(key), ptr as c_long, buf.len() as c_long, 0)? as usize;
        if needed <= buf.len() {
            buf.truncate(needed);
            return Ok(buf);
        }
        // The payload can grow between calls, so loop until it fits.
        buf.resize(needed, 0);
    }
}

impl KeyOps for LinuxKeyOps {
    fn special_keyring(&self, which: SpecialKeyring) -> KernelResult<KeySerial> {
        let id = keyctl(KEYCTL_GET_KEYRING_ID, which.id() as c_long, 1, 0, 0)?;
        Ok(KeySerial::new(id as i32))
    }

    fn search(&self, keyring: KeySerial, key_type: &KeyType, description: &str) -> KernelResult<KeySerial> {
        let key_type = c_string(key_type.as_str())?;
        let description = c_string(description)?;
        let id = keyctl(
            KEYCTL_SEARCH,
            serial_arg(keyring),
            key_type.as_ptr() as c_long,
            description.as_ptr() as c_long,
            0,
        )?;
        Ok(KeySerial::new(id as i32))
    }

    fn add_key(&self, keyring: KeySerial, description: &str, payload: &[u8]) -> KernelResult<KeySerial> {
        add_key_raw(KeyType::User.as_str(), description, Some(payload), keyring)
    }

    fn create_keyring(&self, parent: KeySerial, name: &str) -> KernelResult<KeySerial> {
        add_key_raw(KeyType::Keyring.as_str(), name, None, parent)
    }

    fn link(&self, key: KeySerial, keyring: KeySerial) -> KernelResult<()> {
        keyctl(KEYCTL_LINK, serial_arg(key), serial_arg(keyring), 0, 0).map(|_| ())
    }

    fn unlink(&self, key: KeySerial, keyring: KeySerial) -> KernelResult<()> {
        keyctl(KEYCTL_UNLINK, serial_arg(key), serial_arg(keyring), 0, 0).map(|_| ())
    }

    fn set_perm(&self, key: KeySerial, perm: KeyPerm) -> KernelResult<()> {
        keyctl(KEYCTL_SETPERM, serial_arg(key), perm.bits() as c_long, 0, 0).map(|_| ())
    }

    fn list(&self, keyring: KeySerial) -> KernelResult<Vec<KeySerial>> {
        let raw = read_into_buffer(KEYCTL_READ, keyring)?;
        Ok(raw
            .chunks_exact(4)
            .map(|chunk| KeySerial::new(i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .collect())
    }

    fn describe(&self, key: KeySerial) -> KernelResult<KeyDescription> {
        let raw = read_into_buffer(KEYCTL_DESCRIBE, key)?;
        let text = String::from_utf8_lossy(&raw);
        KeyDescription::parse(&text).ok_or(KernelError::InvalidArgument)
    }

    fn read(&self, key: KeySerial) -> KernelResult<Vec<u8>> {
        read_into_buffer(KEYCTL_READ, key)
    }
}
