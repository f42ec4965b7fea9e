//! BluFi frame codec.
//!
//! ```text
//!  byte 0          byte 1       byte 2  byte 3     4 ..            last 2
//! ┌──────────────┬────────────┬───────┬──────────┬──────────────┬──────────┐
//! │type|subtype<<2│ frame ctrl │  seq  │ data_len │ data         │ checksum │
//! └──────────────┴────────────┴───────┴──────────┴──────────────┴──────────┘
//! ```
//!
//! A fragmented message is sent as frames with [`fc::FRAG`] set, each data
//! field starting with the 2-byte little-endian length still to come, then a
//! final frame without the flag.  The checksum (optional, [`fc::CHECKSUM`])
//! is computed over `seq ‖ data_len ‖ plaintext data`; encryption (optional,
//! [`fc::ENCRYPTED`]) covers the data field only.

use core::fmt;

use log::{debug, warn};

use super::protocol::data;
use super::security::BlufiCipher;

pub const HEADER_LEN: usize = 4;
pub const CHECKSUM_LEN: usize = 2;
const FRAG_PREFIX_LEN: usize = 2;
/// Largest reassembled message accepted from a peer.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Frame-control flag bits.
pub mod fc {
    pub const ENCRYPTED: u8 = 0x01;
    pub const CHECKSUM: u8 = 0x02;
    /// Set on frames travelling device → peer.
    pub const DIR_TO_PEER: u8 = 0x04;
    pub const REQUIRE_ACK: u8 = 0x08;
    pub const FRAG: u8 = 0x10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Control,
    Data,
}

impl FrameType {
    fn bits(self) -> u8 {
        match self {
            Self::Control => 0,
            Self::Data => 1,
        }
    }

    fn from_bits(b: u8) -> Option<Self> {
        match b & 0x03 {
            0 => Some(Self::Control),
            1 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Pack a type and 6-bit subtype into the first header byte.
pub fn type_byte(frame_type: FrameType, subtype: u8) -> u8 {
    frame_type.bits() | ((subtype & 0x3f) << 2)
}

/// A complete (reassembled, decrypted) message from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub subtype: u8,
    pub ctrl: u8,
    /// Sequence number of the last frame of the message.
    pub seq: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn requires_ack(&self) -> bool {
        self.ctrl & fc::REQUIRE_ACK != 0
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Shorter than its header claims.
    Truncated,
    /// Reserved type bits.
    BadType(u8),
    /// Sequence number out of order.
    Sequence { expected: u8, got: u8 },
    Checksum,
    /// Encrypted frame before a key was negotiated.
    NoKey,
    /// Plaintext frame where the negotiated mode asks for encryption.
    Plaintext,
    /// Reassembly would exceed the announced or maximum length.
    FragmentOverflow,
}

impl FrameError {
    /// Error code reported to the peer in an error frame.
    pub fn code(self) -> u8 {
        match self {
            Self::Sequence { .. } => 0x00,
            Self::Checksum => 0x01,
            Self::NoKey | Self::Plaintext => 0x02,
            Self::Truncated | Self::BadType(_) | Self::FragmentOverflow => 0x09,
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated frame"),
            Self::BadType(t) => write!(f, "reserved frame type {}", t),
            Self::Sequence { expected, got } => {
                write!(f, "sequence error (expected {}, got {})", expected, got)
            }
            Self::Checksum => write!(f, "checksum mismatch"),
            Self::NoKey => write!(f, "encrypted frame without a negotiated key"),
            Self::Plaintext => write!(f, "plaintext frame while encryption is required"),
            Self::FragmentOverflow => write!(f, "fragment overflow"),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Reassembling decoder for peer → device frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    expected_seq: u8,
    partial: Vec<u8>,
    partial_total: Option<usize>,
    encrypt_ctrl: bool,
    encrypt_data: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse plaintext frames of the flagged types whenever a key is
    /// supplied to [`push`](Self::push).  Negotiation frames are exempt.
    pub fn require_encryption(&mut self, ctrl: bool, data: bool) {
        self.encrypt_ctrl = ctrl;
        self.encrypt_data = data;
    }

    fn must_be_encrypted(&self, frame_type: FrameType, subtype: u8) -> bool {
        match frame_type {
            FrameType::Control => self.encrypt_ctrl,
            FrameType::Data => self.encrypt_data && subtype != data::NEG,
        }
    }

    /// Drop any partial message, restart sequence numbering and clear the
    /// encryption requirement.
    pub fn reset(&mut self) {
        self.expected_seq = 0;
        self.partial.clear();
        self.partial_total = None;
        self.encrypt_ctrl = false;
        self.encrypt_data = false;
    }

    /// Feed one raw GATT write.  Returns a message once the last fragment
    /// has arrived.
    pub fn push(&mut self, raw: &[u8], cipher: Option<&BlufiCipher>) -> Result<Option<Frame>, FrameError> {
        if raw.len() < HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        let frame_type = FrameType::from_bits(raw[0]).ok_or(FrameError::BadType(raw[0] & 0x03))?;
        let subtype = raw[0] >> 2;
        let ctrl = raw[1];
        let seq = raw[2];
        let data_len = usize::from(raw[3]);

        let has_checksum = ctrl & fc::CHECKSUM != 0;
        let need = HEADER_LEN + data_len + if has_checksum { CHECKSUM_LEN } else { 0 };
        if raw.len() < need {
            return Err(FrameError::Truncated);
        }

        if seq != self.expected_seq {
            let expected = self.expected_seq;
            // Peer restarts at zero after it sees the error report.
            self.reset();
            return Err(FrameError::Sequence { expected, got: seq });
        }
        self.expected_seq = self.expected_seq.wrapping_add(1);

        let mut data = raw[HEADER_LEN..HEADER_LEN + data_len].to_vec();
        if ctrl & fc::ENCRYPTED != 0 {
            let cipher = cipher.ok_or(FrameError::NoKey)?;
            cipher.decrypt(seq, &mut data);
        } else if cipher.is_some() && self.must_be_encrypted(frame_type, subtype) {
            warn!("BluFi: plaintext {:?} frame seq {} refused", frame_type, seq);
            self.reset_partial();
            return Err(FrameError::Plaintext);
        }

        if has_checksum {
            let stored = u16::from_le_bytes([raw[need - 2], raw[need - 1]]);
            let computed = checksum(seq, raw[3], &data);
            if stored != computed {
                warn!("BluFi: checksum mismatch on seq {}", seq);
                return Err(FrameError::Checksum);
            }
        }

        if ctrl & fc::FRAG != 0 {
            if data.len() < FRAG_PREFIX_LEN {
                return Err(FrameError::Truncated);
            }
            if self.partial_total.is_none() {
                let total = usize::from(u16::from_le_bytes([data[0], data[1]]));
                if total > MAX_MESSAGE_LEN {
                    self.reset_partial();
                    return Err(FrameError::FragmentOverflow);
                }
                self.partial_total = Some(total);
            }
            self.append(&data[FRAG_PREFIX_LEN..])?;
            debug!("BluFi: fragment seq {} ({} bytes so far)", seq, self.partial.len());
            return Ok(None);
        }

        let data = if self.partial_total.is_some() {
            self.append(&data)?;
            self.partial_total = None;
            core::mem::take(&mut self.partial)
        } else {
            data
        };

        Ok(Some(Frame {
            frame_type,
            subtype,
            ctrl,
            seq,
            data,
        }))
    }

    fn append(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        let limit = self.partial_total.unwrap_or(MAX_MESSAGE_LEN);
        if self.partial.len() + chunk.len() > limit {
            self.reset_partial();
            return Err(FrameError::FragmentOverflow);
        }
        self.partial.extend_from_slice(chunk);
        Ok(())
    }

    fn reset_partial(&mut self) {
        self.partial.clear();
        self.partial_total = None;
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Fragmenting encoder for device → peer frames.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    seq: u8,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.seq = 0;
    }

    /// Encode one message into as many frames as fit `max_frame_len`
    /// (the ATT payload size).  `cipher` encrypts the data field when
    /// present; `with_checksum` appends the CRC.
    pub fn encode(
        &mut self,
        frame_type: FrameType,
        subtype: u8,
        payload: &[u8],
        cipher: Option<&BlufiCipher>,
        with_checksum: bool,
        max_frame_len: usize,
    ) -> Vec<Vec<u8>> {
        let overhead = HEADER_LEN + if with_checksum { CHECKSUM_LEN } else { 0 };
        // data_len is a single byte.
        let room = max_frame_len.saturating_sub(overhead).clamp(FRAG_PREFIX_LEN + 1, 255);

        let mut frames = Vec::new();
        let mut rest = payload;
        loop {
            let last = rest.len() <= room;
            let mut data = Vec::with_capacity(room);
            let mut ctrl = fc::DIR_TO_PEER;
            if last {
                data.extend_from_slice(rest);
                rest = &[];
            } else {
                let take = room - FRAG_PREFIX_LEN;
                data.extend_from_slice(&(rest.len() as u16).to_le_bytes());
                data.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                ctrl |= fc::FRAG;
            }
            frames.push(self.seal(frame_type, subtype, ctrl, data, cipher, with_checksum));
            if last {
                break;
            }
        }
        frames
    }

    fn seal(
        &mut self,
        frame_type: FrameType,
        subtype: u8,
        mut ctrl: u8,
        mut data: Vec<u8>,
        cipher: Option<&BlufiCipher>,
        with_checksum: bool,
    ) -> Vec<u8> {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        let data_len = data.len() as u8;

        let crc = with_checksum.then(|| checksum(seq, data_len, &data));
        if let Some(c) = cipher {
            c.encrypt(seq, &mut data);
            ctrl |= fc::ENCRYPTED;
        }
        if crc.is_some() {
            ctrl |= fc::CHECKSUM;
        }

        let mut out = Vec::with_capacity(HEADER_LEN + data.len() + CHECKSUM_LEN);
        out.extend_from_slice(&[type_byte(frame_type, subtype), ctrl, seq, data_len]);
        out.extend_from_slice(&data);
        if let Some(c) = crc {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out
    }
}

/// CRC over `seq ‖ data_len ‖ data`.
pub fn checksum(seq: u8, data_len: u8, data: &[u8]) -> u16 {
    let mut digest = super::security::CRC16.digest();
    digest.update(&[seq, data_len]);
    digest.update(data);
    digest.finalize()
}
