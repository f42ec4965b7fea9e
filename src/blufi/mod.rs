//! BluFi provisioning protocol.
//!
//! | Module | Role |
//! |---|---|
//! | [`frame`] | header, fragmentation, reassembly, checksum |
//! | [`security`] | DH negotiation, AES-CFB128 session key |
//! | [`protocol`] | request decoding and reply payloads |
//! | [`session`] | per-link counters and protection mode |
//!
//! Nothing here touches the radio or the BLE stack; the GATT adapter in
//! [`crate::adapters::ble`] feeds raw writes in and notifies the frames
//! that come back out.

pub mod frame;
pub mod protocol;
pub mod security;
pub mod session;

pub use frame::{Frame, FrameError, FrameType};
pub use protocol::{BlufiRequest, CustomCommand, ReportState};
pub use session::BlufiSession;
