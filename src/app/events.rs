//! Outbound provisioning events.
//!
//! The [`Coordinator`](super::coordinator::Coordinator) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them (serial log, BLE notification, …).

use core::net::Ipv4Addr;

use super::coordinator::StateId;
use super::intake::Origin;
use crate::store::record::Ssid;

/// Structured events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    /// The coordinator has started (carries the saved-list length).
    Started { saved: usize },

    /// The provisioning state changed.
    StateChanged { from: StateId, to: StateId },

    /// A connect was issued to the radio.
    ConnectIssued {
        ssid: Ssid,
        attempt: u8,
        explicit: bool,
    },

    /// The STA got an address and the network was promoted in the store.
    Online { ssid: Ssid, ip: Ipv4Addr },

    /// Promotion in the store failed; the link is up but not persisted.
    CommitFailed { ssid: Ssid },

    /// A saved network was removed on request.
    Forgotten { ssid: Ssid, origin: Origin },

    /// Every saved network was tried without success.
    RoundFailed { tried: usize },

    /// A scan completed.
    ScanCompleted { found: usize },
}
