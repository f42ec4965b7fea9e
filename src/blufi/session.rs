//! Per-link BluFi state: sequence counters, security context and the
//! peer-selected protection mode.

use log::{debug, warn};

use super::frame::{Frame, FrameDecoder, FrameEncoder, FrameError, FrameType};
use super::protocol::{ctrl, data};
use super::security::{NegOutcome, SecMode, SecurityError, SecuritySession};

/// Default ATT MTU before the peer negotiates a larger one.
pub const DEFAULT_ATT_MTU: u16 = 23;
const ATT_HEADER_LEN: usize = 3;

pub struct BlufiSession {
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    security: SecuritySession,
    security_enabled: bool,
    sec_mode: SecMode,
    max_frame_len: usize,
}

impl BlufiSession {
    pub fn new(security_enabled: bool) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            encoder: FrameEncoder::new(),
            security: SecuritySession::new(),
            security_enabled,
            sec_mode: SecMode::default(),
            max_frame_len: usize::from(DEFAULT_ATT_MTU) - ATT_HEADER_LEN,
        }
    }

    /// Fresh context for a new BLE link.  Any previous key is dropped.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.encoder.reset();
        self.security = SecuritySession::new();
        self.sec_mode = SecMode::default();
        self.max_frame_len = usize::from(DEFAULT_ATT_MTU) - ATT_HEADER_LEN;
    }

    pub fn set_mtu(&mut self, att_mtu: u16) {
        self.max_frame_len = usize::from(att_mtu.max(DEFAULT_ATT_MTU)) - ATT_HEADER_LEN;
        debug!("BluFi: frame size now {}", self.max_frame_len);
    }

    pub fn set_sec_mode(&mut self, mode: SecMode) {
        self.sec_mode = mode;
        self.decoder
            .require_encryption(mode.ctrl_encrypt(), mode.data_encrypt());
    }

    pub fn is_keyed(&self) -> bool {
        self.security.is_keyed()
    }

    /// Feed one GATT write.
    pub fn receive(&mut self, raw: &[u8]) -> Result<Option<Frame>, FrameError> {
        self.decoder.push(raw, self.security.cipher())
    }

    /// Run one negotiation step; returns frames to notify.
    pub fn negotiate(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, SecurityError> {
        if !self.security_enabled {
            warn!("BluFi: negotiation refused, security disabled");
            return Err(SecurityError::InitSecurity);
        }
        match self.security.negotiate(payload)? {
            NegOutcome::LengthAnnounced => Ok(Vec::new()),
            NegOutcome::PublicKey(public) => Ok(self.send(FrameType::Data, data::NEG, &public)),
        }
    }

    /// Encode a device → peer message with the protection the peer asked
    /// for.  Negotiation frames always travel in the clear.
    pub fn send(&mut self, frame_type: FrameType, subtype: u8, payload: &[u8]) -> Vec<Vec<u8>> {
        let negotiation = frame_type == FrameType::Data && subtype == data::NEG;
        let (want_enc, want_crc) = match frame_type {
            FrameType::Control => (self.sec_mode.ctrl_encrypt(), self.sec_mode.ctrl_checksum()),
            FrameType::Data => (self.sec_mode.data_encrypt(), self.sec_mode.data_checksum()),
        };
        let cipher = if want_enc && !negotiation {
            self.security.cipher()
        } else {
            None
        };
        self.encoder.encode(
            frame_type,
            subtype,
            payload,
            cipher,
            want_crc && !negotiation,
            self.max_frame_len,
        )
    }

    pub fn error_frames(&mut self, code: u8) -> Vec<Vec<u8>> {
        self.send(FrameType::Data, data::ERROR, &[code])
    }

    pub fn ack_frames(&mut self, seq: u8) -> Vec<Vec<u8>> {
        self.send(FrameType::Control, ctrl::ACK, &[seq])
    }
}
