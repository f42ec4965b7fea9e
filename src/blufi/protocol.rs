//! BluFi message vocabulary.
//!
//! Maps reassembled [`Frame`]s to [`BlufiRequest`]s and builds the payloads
//! of device → peer messages.  Framing, encryption and sequence numbers are
//! handled by [`super::session::BlufiSession`].

use core::fmt;

use super::frame::{Frame, FrameType};
use super::security::SecMode;
use crate::app::intake::SavedEntry;
use crate::app::status::{ConnState, ScanEntry, StatusProjection};
use crate::store::record::Ssid;

/// Control-frame subtypes.
pub mod ctrl {
    pub const ACK: u8 = 0x00;
    pub const SET_SEC_MODE: u8 = 0x01;
    pub const SET_OPMODE: u8 = 0x02;
    pub const CONNECT_WIFI: u8 = 0x03;
    pub const DISCONNECT_WIFI: u8 = 0x04;
    pub const GET_WIFI_STATUS: u8 = 0x05;
    pub const DEAUTHENTICATE: u8 = 0x06;
    pub const GET_VERSION: u8 = 0x07;
    pub const CLOSE_CONNECTION: u8 = 0x08;
    pub const GET_WIFI_LIST: u8 = 0x09;
}

/// Data-frame subtypes.
pub mod data {
    pub const NEG: u8 = 0x00;
    pub const STA_BSSID: u8 = 0x01;
    pub const STA_SSID: u8 = 0x02;
    pub const STA_PASSWD: u8 = 0x03;
    pub const WIFI_REPORT: u8 = 0x0f;
    pub const VERSION: u8 = 0x10;
    pub const WIFI_LIST: u8 = 0x11;
    pub const ERROR: u8 = 0x12;
    pub const CUSTOM: u8 = 0x13;
}

/// Custom-channel tags.
pub mod custom {
    pub const LIST_SAVED: u8 = 0x01;
    pub const FORGET_AT: u8 = 0x02;
}

/// Protocol version reported to the peer.
pub const VERSION: [u8; 2] = [0x01, 0x03];

/// Error code for malformed payloads.
pub const ERR_DATA_FORMAT: u8 = 0x09;
/// Error code for a failed scan.
pub const ERR_WIFI_SCAN: u8 = 0x0b;

const REPORT_TLV_SSID: u8 = 0x02;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A decoded peer → device message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlufiRequest {
    Ack { seq: u8 },
    SetSecMode(SecMode),
    SetOpMode(u8),
    ConnectSta,
    DisconnectSta,
    QueryStatus,
    Deauthenticate,
    QueryVersion,
    CloseLink,
    QueryApList,
    Negotiate(Vec<u8>),
    SetStaBssid,
    SetStaSsid(Vec<u8>),
    SetStaSecret(Vec<u8>),
    Custom(CustomCommand),
    /// Recognised frame type with a subtype we do not act on.
    Ignored { frame_type: FrameType, subtype: u8 },
}

/// Commands carried on the custom data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomCommand {
    ListSaved,
    ForgetAt(u8),
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload too short for its subtype.
    Malformed { subtype: u8 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { subtype } => write!(f, "malformed payload for subtype {:#04x}", subtype),
        }
    }
}

pub fn decode(frame: &Frame) -> Result<BlufiRequest, ProtocolError> {
    let malformed = ProtocolError::Malformed {
        subtype: frame.subtype,
    };
    let first = frame.data.first().copied();

    let req = match frame.frame_type {
        FrameType::Control => match frame.subtype {
            ctrl::ACK => BlufiRequest::Ack {
                seq: first.ok_or(malformed)?,
            },
            ctrl::SET_SEC_MODE => BlufiRequest::SetSecMode(SecMode(first.ok_or(malformed)?)),
            ctrl::SET_OPMODE => BlufiRequest::SetOpMode(first.ok_or(malformed)?),
            ctrl::CONNECT_WIFI => BlufiRequest::ConnectSta,
            ctrl::DISCONNECT_WIFI => BlufiRequest::DisconnectSta,
            ctrl::GET_WIFI_STATUS => BlufiRequest::QueryStatus,
            ctrl::DEAUTHENTICATE => BlufiRequest::Deauthenticate,
            ctrl::GET_VERSION => BlufiRequest::QueryVersion,
            ctrl::CLOSE_CONNECTION => BlufiRequest::CloseLink,
            ctrl::GET_WIFI_LIST => BlufiRequest::QueryApList,
            other => BlufiRequest::Ignored {
                frame_type: FrameType::Control,
                subtype: other,
            },
        },
        FrameType::Data => match frame.subtype {
            data::NEG => BlufiRequest::Negotiate(frame.data.clone()),
            data::STA_BSSID => BlufiRequest::SetStaBssid,
            data::STA_SSID => BlufiRequest::SetStaSsid(frame.data.clone()),
            data::STA_PASSWD => BlufiRequest::SetStaSecret(frame.data.clone()),
            data::CUSTOM => BlufiRequest::Custom(decode_custom(&frame.data).ok_or(malformed)?),
            other => BlufiRequest::Ignored {
                frame_type: FrameType::Data,
                subtype: other,
            },
        },
    };
    Ok(req)
}

fn decode_custom(payload: &[u8]) -> Option<CustomCommand> {
    let (&tag, rest) = payload.split_first()?;
    Some(match tag {
        custom::LIST_SAVED => CustomCommand::ListSaved,
        custom::FORGET_AT => CustomCommand::ForgetAt(*rest.first()?),
        other => CustomCommand::Unknown(other),
    })
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Station state in a connection report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    Success = 0,
    Fail = 1,
    Connecting = 2,
}

impl From<ConnState> for ReportState {
    fn from(state: ConnState) -> Self {
        match state {
            ConnState::Connected => Self::Success,
            ConnState::Connecting => Self::Connecting,
            ConnState::Idle | ConnState::Failed => Self::Fail,
        }
    }
}

/// Payload for data-subtype `0x0f`.
pub fn encode_report(opmode: u8, state: ReportState, ssid: Option<&Ssid>) -> Vec<u8> {
    let mut out = vec![opmode, state as u8, 0];
    if state == ReportState::Success {
        if let Some(ssid) = ssid {
            out.push(REPORT_TLV_SSID);
            out.push(ssid.len() as u8);
            out.extend_from_slice(ssid.as_bytes());
        }
    }
    out
}

/// Connection report for a status projection.
pub fn encode_status(status: &StatusProjection) -> Vec<u8> {
    encode_report(status.mode.opmode(), status.state.into(), status.ssid.as_ref())
}

/// Payload for data-subtype `0x11`.
pub fn encode_wifi_list(entries: &[ScanEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 12);
    for e in entries {
        out.push(e.ssid.len() as u8 + 1);
        out.push(e.rssi as u8);
        out.extend_from_slice(e.ssid.as_bytes());
    }
    out
}

/// Custom reply to [`CustomCommand::ListSaved`].
pub fn encode_saved_list(entries: &[SavedEntry]) -> Vec<u8> {
    let status = u8::from(entries.is_empty());
    let mut out = vec![custom::LIST_SAVED, status, entries.len() as u8];
    for e in entries {
        out.push(e.ssid.len() as u8);
        out.extend_from_slice(e.ssid.as_bytes());
        out.push(e.secret.len() as u8);
        out.extend_from_slice(e.secret.as_bytes());
    }
    out
}

/// Custom reply to [`CustomCommand::ForgetAt`].
pub fn encode_forget_result(ok: bool) -> Vec<u8> {
    vec![custom::FORGET_AT, u8::from(!ok)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::status::WifiMode;
    use crate::store::record::Secret;

    fn frame(frame_type: FrameType, subtype: u8, data: &[u8]) -> Frame {
        Frame {
            frame_type,
            subtype,
            ctrl: 0,
            seq: 0,
            data: data.to_vec(),
        }
    }

    #[test]
    fn control_subtypes_decode() {
        let cases = [
            (ctrl::CONNECT_WIFI, BlufiRequest::ConnectSta),
            (ctrl::DISCONNECT_WIFI, BlufiRequest::DisconnectSta),
            (ctrl::GET_WIFI_STATUS, BlufiRequest::QueryStatus),
            (ctrl::GET_VERSION, BlufiRequest::QueryVersion),
            (ctrl::CLOSE_CONNECTION, BlufiRequest::CloseLink),
            (ctrl::GET_WIFI_LIST, BlufiRequest::QueryApList),
        ];
        for (sub, want) in cases {
            assert_eq!(decode(&frame(FrameType::Control, sub, &[])), Ok(want));
        }
        assert_eq!(
            decode(&frame(FrameType::Control, ctrl::SET_SEC_MODE, &[0x03])),
            Ok(BlufiRequest::SetSecMode(SecMode(0x03)))
        );
    }

    #[test]
    fn credentials_decode() {
        assert_eq!(
            decode(&frame(FrameType::Data, data::STA_SSID, b"Home")),
            Ok(BlufiRequest::SetStaSsid(b"Home".to_vec()))
        );
        assert_eq!(
            decode(&frame(FrameType::Data, data::STA_PASSWD, b"pw")),
            Ok(BlufiRequest::SetStaSecret(b"pw".to_vec()))
        );
    }

    #[test]
    fn custom_commands_decode() {
        assert_eq!(
            decode(&frame(FrameType::Data, data::CUSTOM, &[0x01])),
            Ok(BlufiRequest::Custom(CustomCommand::ListSaved))
        );
        assert_eq!(
            decode(&frame(FrameType::Data, data::CUSTOM, &[0x02, 3])),
            Ok(BlufiRequest::Custom(CustomCommand::ForgetAt(3)))
        );
        assert_eq!(
            decode(&frame(FrameType::Data, data::CUSTOM, &[0x02])),
            Err(ProtocolError::Malformed { subtype: data::CUSTOM })
        );
        assert!(decode(&frame(FrameType::Data, data::CUSTOM, &[])).is_err());
    }

    #[test]
    fn unknown_subtypes_are_ignored() {
        assert_eq!(
            decode(&frame(FrameType::Data, 0x0a, b"cert")),
            Ok(BlufiRequest::Ignored {
                frame_type: FrameType::Data,
                subtype: 0x0a
            })
        );
    }

    #[test]
    fn success_report_carries_ssid_tlv() {
        let ssid = Ssid::try_from("Home").unwrap();
        assert_eq!(
            encode_report(1, ReportState::Success, Some(&ssid)),
            vec![1, 0, 0, 0x02, 4, b'H', b'o', b'm', b'e']
        );
        assert_eq!(encode_report(3, ReportState::Fail, Some(&ssid)), vec![3, 1, 0]);
    }

    #[test]
    fn status_maps_to_report() {
        let status = StatusProjection {
            state: ConnState::Connecting,
            ssid: None,
            ip: None,
            rssi: 0,
            mode: WifiMode::ApSta,
        };
        assert_eq!(encode_status(&status), vec![3, 2, 0]);
    }

    #[test]
    fn wifi_list_layout() {
        let entries = [ScanEntry {
            ssid: Ssid::try_from("AB").unwrap(),
            rssi: -40,
        }];
        assert_eq!(encode_wifi_list(&entries), vec![3, (-40i8) as u8, b'A', b'B']);
    }

    #[test]
    fn saved_list_layout() {
        assert_eq!(encode_saved_list(&[]), vec![0x01, 0x01, 0]);
        let entries = [SavedEntry {
            index: 0,
            ssid: Ssid::try_from("A").unwrap(),
            secret: Secret::try_from("pw").unwrap(),
        }];
        assert_eq!(encode_saved_list(&entries), vec![0x01, 0x00, 1, 1, b'A', 2, b'p', b'w']);
    }

    #[test]
    fn forget_result_layout() {
        assert_eq!(encode_forget_result(true), vec![0x02, 0x00]);
        assert_eq!(encode_forget_result(false), vec![0x02, 0x01]);
    }
}
