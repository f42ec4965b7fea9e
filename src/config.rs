//! Provisioning configuration parameters
//!
//! All tunables for the coordinator, the soft-AP and the two endpoints.
//! Values can be overridden via NVS; anything not stored falls back to
//! [`ProvisioningConfig::default`].

use core::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Soft-AP parameters used for the web provisioning path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApConfig {
    /// AP SSID (at most 31 bytes, one byte is reserved on the wire)
    pub ssid: heapless::String<32>,
    /// AP passphrase; empty means an open AP, otherwise 8..=63 bytes
    pub password: heapless::String<64>,
    /// Static IPv4 of the AP interface; the netmask is always /24
    pub ip: [u8; 4],
    /// 2.4 GHz channel (1-13)
    pub channel: u8,
    /// Maximum simultaneous stations
    pub max_connections: u8,
}

impl ApConfig {
    pub fn ip_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    /// Empty passphrase selects open authentication.
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl Default for ApConfig {
    fn default() -> Self {
        let mut ssid = heapless::String::new();
        let _ = ssid.push_str("XN-ESP32-AP");
        let mut password = heapless::String::new();
        let _ = password.push_str("12345678");
        Self {
            ssid,
            password,
            ip: [192, 168, 5, 1],
            channel: 1,
            max_connections: 4,
        }
    }
}

/// Core provisioning configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    // --- Coordinator ---
    /// Coordinator step period (milliseconds)
    pub step_interval_ms: u32,
    /// Connect attempts per saved network before moving to the next one
    pub max_retry_per_ap: u8,
    /// Delay after a failed round before starting over; negative disables
    pub reconnect_interval_ms: i32,
    /// Capacity of the saved-network list
    pub save_wifi_count: u8,

    // --- Endpoints ---
    /// HTTP listening port
    pub http_port: u16,
    /// Maximum scan entries handed to the endpoints
    pub scan_cap: u8,
    /// Start the BLE provisioning service
    pub enable_ble: bool,
    /// Accept the DH/AES envelope on BLE sessions
    pub enable_blufi_security: bool,
    /// Advertised BLE device name
    pub ble_device_name: heapless::String<24>,

    // --- Soft-AP ---
    pub ap: ApConfig,
}

impl ProvisioningConfig {
    /// Per-target attempt cap; zero is treated as a single attempt.
    pub fn retry_cap(&self) -> u8 {
        self.max_retry_per_ap.max(1)
    }

    /// Saved-list capacity; zero is treated as one.
    pub fn max_saved(&self) -> usize {
        usize::from(self.save_wifi_count.max(1))
    }

    /// `None` when automatic retry after a failed round is disabled.
    pub fn reconnect_interval(&self) -> Option<u64> {
        u64::try_from(self.reconnect_interval_ms).ok()
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let mut ble_device_name = heapless::String::new();
        let _ = ble_device_name.push_str("XN-PROV");
        Self {
            // Coordinator
            step_interval_ms: 1000, // 1 Hz
            max_retry_per_ap: 5,
            reconnect_interval_ms: 10_000,
            save_wifi_count: 5,

            // Endpoints
            http_port: 80,
            scan_cap: 32,
            enable_ble: true,
            enable_blufi_security: true,
            ble_device_name,

            // Soft-AP
            ap: ApConfig::default(),
        }
    }
}
