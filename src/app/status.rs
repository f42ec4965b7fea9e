//! Scan cache and status view.
//!
//! Both are read-mostly projections of coordinator state.  The scan cache
//! is replaced as a whole `Arc` so a reader holding a snapshot is never
//! affected by a later scan.

use core::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::store::record::Ssid;

// ---------------------------------------------------------------------------
// Radio mode
// ---------------------------------------------------------------------------

/// Interfaces currently enabled on the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WifiMode {
    #[default]
    Null,
    Sta,
    Ap,
    ApSta,
}

impl WifiMode {
    /// Label used in the status JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "-",
            Self::Sta => "STA",
            Self::Ap => "AP",
            Self::ApSta => "AP+STA",
        }
    }

    /// Opmode byte used by the BLE connection report.
    pub fn opmode(self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Sta => 1,
            Self::Ap => 2,
            Self::ApSta => 3,
        }
    }

    pub fn has_sta(self) -> bool {
        matches!(self, Self::Sta | Self::ApSta)
    }

    pub fn has_ap(self) -> bool {
        matches!(self, Self::Ap | Self::ApSta)
    }
}

// ---------------------------------------------------------------------------
// Scan cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub ssid: Ssid,
    pub rssi: i8,
}

/// Result of one completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSnapshot {
    pub entries: Vec<ScanEntry>,
    /// Uptime at which the scan completed.
    pub taken_at_ms: u64,
}

/// Holds the most recent [`ScanSnapshot`].
#[derive(Debug, Default)]
pub struct ScanCache {
    latest: Mutex<Arc<ScanSnapshot>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot.  Cheap: clones the `Arc`.
    pub fn latest(&self) -> Arc<ScanSnapshot> {
        match self.latest.lock() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Publish a new snapshot and return it.
    pub fn replace(&self, entries: Vec<ScanEntry>, now_ms: u64) -> Arc<ScanSnapshot> {
        let snap = Arc::new(ScanSnapshot {
            entries,
            taken_at_ms: now_ms,
        });
        match self.latest.lock() {
            Ok(mut guard) => *guard = Arc::clone(&snap),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&snap),
        }
        snap
    }
}

// ---------------------------------------------------------------------------
// Status projection
// ---------------------------------------------------------------------------

/// Coarse connection state exposed to the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnState {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusProjection {
    pub state: ConnState,
    pub ssid: Option<Ssid>,
    pub ip: Option<Ipv4Addr>,
    pub rssi: i8,
    pub mode: WifiMode,
}

impl StatusProjection {
    pub fn connected(&self) -> bool {
        self.state == ConnState::Connected
    }
}
