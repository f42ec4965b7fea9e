//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing provisioning events to the ESP-IDF
//! logger (UART / USB-CDC in production, stderr on the host).

use log::{info, warn};

use crate::app::events::ProvisioningEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`ProvisioningEvent`] to the console.
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ProvisioningEvent) {
        match event {
            ProvisioningEvent::Started { saved } => {
                info!("START | saved_networks={}", saved);
            }
            ProvisioningEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            ProvisioningEvent::ConnectIssued {
                ssid,
                attempt,
                explicit,
            } => {
                info!(
                    "CONNECT | ssid='{}' | attempt={} | {}",
                    ssid,
                    attempt + 1,
                    if *explicit { "explicit" } else { "saved" }
                );
            }
            ProvisioningEvent::Online { ssid, ip } => {
                info!("ONLINE | ssid='{}' | ip={}", ssid, ip);
            }
            ProvisioningEvent::CommitFailed { ssid } => {
                warn!("STORE | promotion of '{}' not persisted", ssid);
            }
            ProvisioningEvent::Forgotten { ssid, origin } => {
                info!("STORE | forgot '{}' | via={:?}", ssid, origin);
            }
            ProvisioningEvent::RoundFailed { tried } => {
                warn!("ROUND | failed after {} network(s)", tried);
            }
            ProvisioningEvent::ScanCompleted { found } => {
                info!("SCAN | {} AP(s)", found);
            }
        }
    }
}
