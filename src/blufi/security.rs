//! BluFi session security: DH key agreement, AES-128-CFB128, CRC-16.
//!
//! The peer drives negotiation with data-subtype `0x00` frames:
//!
//! 1. `0x00, LEN_HI, LEN_LO` announces the size of the parameter block.
//! 2. `0x01 ‖ len(P) ‖ P ‖ len(G) ‖ G ‖ len(GY) ‖ GY` (16-bit BE lengths).
//!
//! The device answers step 2 with its public key padded to `len(P)` and
//! keys the session with `MD5(shared secret)`.  Each frame is then
//! encrypted with a fresh IV whose first byte is the frame sequence number.

use core::fmt;

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use crc::{CRC_16_XMODEM, Crc};
use log::{debug, info, warn};
use md5::{Digest, Md5};
use num_bigint::BigUint;
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

/// CRC-16/XMODEM (poly 0x1021, init 0).
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Largest DH modulus accepted, in bytes.
pub const MAX_DH_LEN: usize = 128;

const NEG_SET_LEN: u8 = 0x00;
const NEG_SET_PARAM: u8 = 0x01;

const KEY_LEN: usize = 16;

type CfbEnc = cfb_mode::Encryptor<Aes128>;
type CfbDec = cfb_mode::Decryptor<Aes128>;

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Session key for frame encryption.
pub struct BlufiCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl BlufiCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    fn iv(seq: u8) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[0] = seq;
        iv
    }

    pub fn encrypt(&self, seq: u8, data: &mut [u8]) {
        let key: &[u8; KEY_LEN] = &self.key;
        CfbEnc::new(key.into(), &Self::iv(seq).into()).encrypt(data);
    }

    pub fn decrypt(&self, seq: u8, data: &mut [u8]) {
        let key: &[u8; KEY_LEN] = &self.key;
        CfbDec::new(key.into(), &Self::iv(seq).into()).decrypt(data);
    }
}

impl fmt::Debug for BlufiCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlufiCipher(..)")
    }
}

// ---------------------------------------------------------------------------
// Security mode
// ---------------------------------------------------------------------------

/// Peer-selected protection for each frame class (control-subtype `0x01`).
///
/// High nibble applies to control frames, low nibble to data frames;
/// bit 0 of a nibble requests checksums, bit 1 encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecMode(pub u8);

impl SecMode {
    pub fn ctrl_checksum(self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn ctrl_encrypt(self) -> bool {
        self.0 & 0x20 != 0
    }

    pub fn data_checksum(self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn data_encrypt(self) -> bool {
        self.0 & 0x02 != 0
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    /// Negotiation attempted while security is disabled.
    InitSecurity,
    /// Announced parameter block larger than we accept.
    DhMalloc,
    /// Parameters parse but are unusable (modulus size or range).
    DhParam,
    /// Parameter block could not be parsed.
    ReadParam,
    /// Key agreement produced a degenerate value.
    MakePublic,
}

impl SecurityError {
    /// Error code reported to the peer.
    pub fn code(self) -> u8 {
        match self {
            Self::InitSecurity => 0x04,
            Self::DhMalloc => 0x05,
            Self::DhParam => 0x06,
            Self::ReadParam => 0x07,
            Self::MakePublic => 0x08,
        }
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InitSecurity => "security not initialised",
            Self::DhMalloc => "DH parameter block too large",
            Self::DhParam => "unusable DH parameters",
            Self::ReadParam => "malformed DH parameter block",
            Self::MakePublic => "DH key agreement failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// Result of one negotiation frame.
#[derive(Debug, PartialEq, Eq)]
pub enum NegOutcome {
    /// Length announcement accepted; nothing to send.
    LengthAnnounced,
    /// Our public key, to be returned in a negotiation data frame.
    PublicKey(Vec<u8>),
}

/// Per-link security context.  Created on BLE connect, dropped on
/// disconnect.
#[derive(Debug, Default)]
pub struct SecuritySession {
    announced_len: Option<usize>,
    cipher: Option<BlufiCipher>,
}

impl SecuritySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cipher(&self) -> Option<&BlufiCipher> {
        self.cipher.as_ref()
    }

    pub fn is_keyed(&self) -> bool {
        self.cipher.is_some()
    }

    /// Handle the payload of a negotiation data frame.
    pub fn negotiate(&mut self, data: &[u8]) -> Result<NegOutcome, SecurityError> {
        match data.split_first() {
            Some((&NEG_SET_LEN, rest)) => {
                if rest.len() < 2 {
                    return Err(SecurityError::ReadParam);
                }
                let len = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
                if len > 3 * (MAX_DH_LEN + 2) {
                    return Err(SecurityError::DhMalloc);
                }
                debug!("BluFi: DH parameter block of {} bytes announced", len);
                self.announced_len = Some(len);
                Ok(NegOutcome::LengthAnnounced)
            }
            Some((&NEG_SET_PARAM, params)) => {
                if let Some(len) = self.announced_len.take() {
                    if params.len() != len {
                        warn!("BluFi: DH block {} bytes, announced {}", params.len(), len);
                        return Err(SecurityError::ReadParam);
                    }
                }
                let (public, key) = agree(params)?;
                self.cipher = Some(BlufiCipher::new(key));
                info!("BluFi: session key established");
                Ok(NegOutcome::PublicKey(public))
            }
            _ => Err(SecurityError::ReadParam),
        }
    }
}

fn take_field<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], SecurityError> {
    if buf.len() < 2 {
        return Err(SecurityError::ReadParam);
    }
    let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    let rest = &buf[2..];
    if rest.len() < len {
        return Err(SecurityError::ReadParam);
    }
    let (field, tail) = rest.split_at(len);
    *buf = tail;
    Ok(field)
}

/// Run DH over the peer's parameters.  Returns our padded public key and
/// the derived session key.
fn agree(params: &[u8]) -> Result<(Vec<u8>, [u8; KEY_LEN]), SecurityError> {
    let mut cursor = params;
    let p_bytes = take_field(&mut cursor)?;
    let g_bytes = take_field(&mut cursor)?;
    let gy_bytes = take_field(&mut cursor)?;

    let p_len = p_bytes.len();
    if p_len == 0 || p_len > MAX_DH_LEN {
        return Err(SecurityError::DhParam);
    }
    let p = BigUint::from_bytes_be(p_bytes);
    let g = BigUint::from_bytes_be(g_bytes);
    let gy = BigUint::from_bytes_be(gy_bytes);

    let two = BigUint::from(2u8);
    if p <= BigUint::from(3u8) || g < two || gy < two || gy >= &p - 1u8 {
        return Err(SecurityError::DhParam);
    }

    // Private exponent in [2, P-2].
    let mut raw = Zeroizing::new(vec![0u8; p_len]);
    OsRng.fill_bytes(raw.as_mut_slice());
    let x = BigUint::from_bytes_be(&raw) % (&p - 3u8) + &two;

    let public = g.modpow(&x, &p);
    let shared = gy.modpow(&x, &p);
    if public < two || shared < two {
        return Err(SecurityError::MakePublic);
    }

    let public_bytes = public.to_bytes_be();
    let mut padded = vec![0u8; p_len - public_bytes.len()];
    padded.extend_from_slice(&public_bytes);

    let shared_bytes = Zeroizing::new(shared.to_bytes_be());
    let digest = Md5::digest(shared_bytes.as_slice());
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest);

    Ok((padded, key))
}
