//! Port traits: the hexagonal boundary between the coordinator and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Coordinator (domain)
//! ```
//!
//! Driven adapters (radio, key-value flash, event sinks, clock) implement
//! these traits.  The [`Coordinator`](super::coordinator::Coordinator) and
//! [`ProvisioningService`](super::service::ProvisioningService) consume them
//! via generics, so the state machine never touches the native stacks
//! directly and the host tests inject fakes.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **StoragePort** holds Wi-Fi secrets; on device the NVS partition should
//!   be encrypted.
//! - All port errors are typed; callers must handle every variant explicitly.

use core::net::Ipv4Addr;

use crate::config::{ApConfig, ProvisioningConfig};
use crate::error::Result;
use crate::store::record::{CredentialRecord, Secret, Ssid};

use super::events::ProvisioningEvent;
use super::intake::{IntakeReply, IntakeRequest, Origin};
use super::status::{ScanEntry, WifiMode};

// ───────────────────────────────────────────────────────────────
// Radio port (C2: domain ↔ Wi-Fi stack)
// ───────────────────────────────────────────────────────────────

/// Notifications from the Wi-Fi stack, already disambiguated by the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    /// The STA associated with an AP (no IP yet).
    StaAssociated,
    /// An established association was lost.
    StaDisassociated { reason: u16 },
    /// A connect the facade issued did not complete.
    StaConnectAttemptFailed { reason: u16 },
    /// DHCP assigned an address on the STA interface.
    StaGotIp(Ipv4Addr),
}

/// Uniform contract over the native Wi-Fi stack.
///
/// Exactly one STA connect may be outstanding at a time; the facade
/// tracks this in its `connecting` flag, exposed by [`is_connecting`].
///
/// [`is_connecting`]: RadioPort::is_connecting
pub trait RadioPort {
    /// Bring up the network stack and the selected interfaces.  Repeat
    /// calls are no-ops.
    fn init(&mut self, enable_sta: bool, ap: Option<&ApConfig>) -> Result<()>;

    /// Start associating.  Returns once the request is issued; the
    /// outcome arrives through [`poll_event`](RadioPort::poll_event).
    fn connect(&mut self, ssid: &Ssid, secret: Option<&Secret>) -> Result<()>;

    /// Request association tear-down.  Clears the `connecting` flag.
    fn disconnect(&mut self) -> Result<()>;

    /// Blocking scan, truncated to `max_out` entries.
    fn scan_sync(&mut self, max_out: usize) -> Result<Vec<ScanEntry>>;

    /// Next pending event in arrival order.
    fn poll_event(&mut self) -> Option<RadioEvent>;

    fn is_connecting(&self) -> bool;

    /// The STA configuration the driver actually holds.
    fn current_sta_config(&self) -> Result<CredentialRecord>;

    /// RSSI of the associated AP, if any.
    fn sta_rssi(&self) -> Option<i8>;

    /// Current IPv4 of the STA interface, if any.
    fn sta_ipv4(&self) -> Option<Ipv4Addr>;

    fn mode(&self) -> WifiMode;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging)
// ───────────────────────────────────────────────────────────────

/// The coordinator emits structured
/// [`ProvisioningEvent`](super::events::ProvisioningEvent)s through this
/// port.  Adapters decide where they go (serial log, BLE notify, …).
pub trait EventSink {
    fn emit(&mut self, event: &ProvisioningEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds since boot.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Provisioning capability (endpoints → coordinator)
// ───────────────────────────────────────────────────────────────

/// The capability the HTTP endpoint is bound with at init.  Endpoints
/// never touch the radio or the store directly; every request is handed
/// to the coordinator and answered with its reply.
pub trait ProvisioningApi {
    fn submit(&self, origin: Origin, request: IntakeRequest) -> Result<IntakeReply>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`ProvisioningConfig`].
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Returns [`ProvisioningConfig::default()`] if nothing is stored.
    fn load(&self) -> core::result::Result<ProvisioningConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &ProvisioningConfig) -> core::result::Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Namespaced key-value blob storage.
///
/// - Write operations MUST be atomic; no partial value is ever visible.
///   ESP-IDF NVS guarantees this per commit; the in-memory simulation
///   achieves it trivially.
/// - Keys are namespaced to prevent collisions between subsystems.
pub trait StoragePort {
    /// Initialise the backing flash.  If it reports corruption or an
    /// incompatible layout version it is erased and initialised once more.
    /// Repeat calls are no-ops.
    fn init(&mut self) -> core::result::Result<(), StorageError>;

    /// Read a whole value.
    fn read(&self, namespace: &str, key: &str) -> core::result::Result<Vec<u8>, StorageError>;

    /// Replace a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8])
    -> core::result::Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> core::result::Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// The storage backend failed.
    Storage(StorageError),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key (or namespace) does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Native error code from the flash layer.
    IoError(i32),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::Storage(e) => write!(f, "storage: {}", e),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError(code) => write!(f, "I/O error ({})", code),
        }
    }
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
