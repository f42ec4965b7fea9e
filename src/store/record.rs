//! Fixed on-flash credential record.
//!
//! ```text
//!  0        32                        96     97        100
//!  ┌────────┬─────────────────────────┬──────┬─────────┐
//!  │ ssid   │ secret                  │flags │reserved │
//!  │ 32 B   │ 64 B                    │ 1 B  │ 3 B     │
//!  └────────┴─────────────────────────┴──────┴─────────┘
//! ```
//!
//! Both text fields are zero-padded.  `flags` bit 0 is set when the
//! network is WPA2 (non-empty secret); every other bit and the reserved
//! tail are written zero and ignored on read.

use core::fmt;
use core::hash::{Hash, Hasher};

use zeroize::Zeroize;

use crate::error::{Error, Result};

pub const SSID_FIELD_LEN: usize = 32;
pub const SECRET_FIELD_LEN: usize = 64;
/// Longest SSID accepted from an endpoint; one byte is kept for the
/// terminator the native stack expects.
pub const SSID_MAX_LEN: usize = SSID_FIELD_LEN - 1;
pub const SECRET_MAX_LEN: usize = SECRET_FIELD_LEN - 1;
pub const RECORD_SIZE: usize = SSID_FIELD_LEN + SECRET_FIELD_LEN + 4;

const FLAG_WPA2: u8 = 0x01;

// ---------------------------------------------------------------------------
// SSID
// ---------------------------------------------------------------------------

/// Network name, 1..=32 raw bytes (not necessarily UTF-8).
///
/// Equality and hashing follow the zero-padded field, so a name with and
/// without trailing NULs is the same network.
#[derive(Clone, Default)]
pub struct Ssid(heapless::Vec<u8, SSID_FIELD_LEN>);

impl Ssid {
    /// Build from raw bytes; anything longer than the field is rejected.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        heapless::Vec::from_slice(bytes)
            .map(Self)
            .map_err(|()| Error::InvalidArg("ssid longer than 32 bytes"))
    }

    /// Build from a name handed in by an endpoint: at most
    /// [`SSID_MAX_LEN`] bytes and no NUL bytes.
    pub fn from_peer(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > SSID_MAX_LEN {
            return Err(Error::InvalidArg("ssid longer than 31 bytes"));
        }
        if bytes.contains(&0) {
            return Err(Error::InvalidArg("ssid contains NUL"));
        }
        Self::new(bytes)
    }

    /// Build from a field that may carry trailing NUL padding.
    pub fn from_padded(field: &[u8]) -> Result<Self> {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        Self::new(&field[..end])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zero-padded wire field.
    pub fn field(&self) -> [u8; SSID_FIELD_LEN] {
        let mut out = [0u8; SSID_FIELD_LEN];
        out[..self.0.len()].copy_from_slice(&self.0);
        out
    }

    pub fn same_network(&self, other: &Ssid) -> bool {
        self == other
    }
}

impl PartialEq for Ssid {
    fn eq(&self, other: &Self) -> bool {
        self.field() == other.field()
    }
}

impl Eq for Ssid {}

impl Hash for Ssid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.field().hash(state);
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ssid({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl TryFrom<&str> for Ssid {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// Pre-shared key, 0..=64 raw bytes.  Wiped on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(heapless::Vec<u8, SECRET_FIELD_LEN>);

impl Secret {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        heapless::Vec::from_slice(bytes)
            .map(Self)
            .map_err(|()| Error::InvalidArg("secret longer than 64 bytes"))
    }

    /// Build from a key handed in by an endpoint: at most
    /// [`SECRET_MAX_LEN`] bytes and no NUL bytes.
    pub fn from_peer(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > SECRET_MAX_LEN {
            return Err(Error::InvalidArg("secret longer than 63 bytes"));
        }
        if bytes.contains(&0) {
            return Err(Error::InvalidArg("secret contains NUL"));
        }
        Self::new(bytes)
    }

    pub fn from_padded(field: &[u8]) -> Result<Self> {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        Self::new(&field[..end])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.as_mut_slice().zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}

impl TryFrom<&str> for Secret {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Security of a saved network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlags {
    Open,
    Wpa2,
}

/// One saved network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub ssid: Ssid,
    pub secret: Secret,
    pub flags: AuthFlags,
}

impl CredentialRecord {
    /// The auth flag follows the secret: empty means open.
    pub fn new(ssid: Ssid, secret: Secret) -> Self {
        let flags = if secret.is_empty() {
            AuthFlags::Open
        } else {
            AuthFlags::Wpa2
        };
        Self { ssid, secret, flags }
    }

    pub fn open(ssid: Ssid) -> Self {
        Self::new(ssid, Secret::default())
    }

    /// Records with an empty SSID are never persisted nor attempted.
    pub fn is_valid(&self) -> bool {
        !self.ssid.is_empty()
    }

    pub fn secret(&self) -> Option<&Secret> {
        (!self.secret.is_empty()).then_some(&self.secret)
    }

    /// Serialise into the fixed 100-byte layout.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..SSID_FIELD_LEN].copy_from_slice(&self.ssid.field());
        let secret = self.secret.as_bytes();
        out[SSID_FIELD_LEN..SSID_FIELD_LEN + secret.len()].copy_from_slice(secret);
        if self.flags == AuthFlags::Wpa2 {
            out[SSID_FIELD_LEN + SECRET_FIELD_LEN] = FLAG_WPA2;
        }
        out
    }

    /// Parse one 100-byte slot.  Returns `None` for a slot whose SSID
    /// field is empty.
    pub fn decode(slot: &[u8]) -> Result<Option<Self>> {
        if slot.len() != RECORD_SIZE {
            return Err(Error::CorruptStore);
        }
        let ssid = Ssid::from_padded(&slot[..SSID_FIELD_LEN])?;
        if ssid.is_empty() {
            return Ok(None);
        }
        let secret = Secret::from_padded(&slot[SSID_FIELD_LEN..SSID_FIELD_LEN + SECRET_FIELD_LEN])?;
        let flags = if slot[SSID_FIELD_LEN + SECRET_FIELD_LEN] & FLAG_WPA2 != 0 {
            AuthFlags::Wpa2
        } else {
            AuthFlags::Open
        };
        Ok(Some(Self { ssid, secret, flags }))
    }
}
