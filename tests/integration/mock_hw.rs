//! Mock hardware adapters for integration tests.
//!
//! `MockRadio` records every radio command and hands back scripted events,
//! so tests can drive the coordinator through exact event orderings without
//! a Wi-Fi stack.  `MockNvs` is a plain in-memory key-value store with
//! write counting and fault injection.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use wifiprov::app::coordinator::Coordinator;
use wifiprov::app::events::ProvisioningEvent;
use wifiprov::app::intake::{IntakeReply, IntakeRequest, Origin};
use wifiprov::app::ports::{
    EventSink, ProvisioningApi, RadioEvent, RadioPort, StorageError, StoragePort,
};
use wifiprov::app::status::{ScanEntry, WifiMode};
use wifiprov::config::{ApConfig, ProvisioningConfig};
use wifiprov::error::{Error, Result};
use wifiprov::store::{CredentialRecord, CredentialStore, Secret, Ssid};

pub fn ssid(s: &str) -> Ssid {
    Ssid::try_from(s).unwrap()
}

pub fn secret(s: &str) -> Secret {
    Secret::try_from(s).unwrap()
}

pub fn record(s: &str, pw: &str) -> CredentialRecord {
    CredentialRecord::new(ssid(s), secret(pw))
}

// ── Radio call record ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Init { sta: bool, ap: bool },
    Connect { ssid: String, secret: Option<String> },
    Disconnect,
    Scan,
}

// ── MockRadio ─────────────────────────────────────────────────

pub struct MockRadio {
    pub calls: Vec<RadioCall>,
    pub events: VecDeque<RadioEvent>,
    pub scan_result: Vec<ScanEntry>,
    pub fail_scan: bool,
    pub rssi: i8,
    connecting: bool,
    sta: Option<CredentialRecord>,
    ip: Option<Ipv4Addr>,
    mode: WifiMode,
    /// Highest number of simultaneously outstanding connects ever seen.
    pub max_outstanding: usize,
    outstanding: usize,
}

#[allow(dead_code)]
impl MockRadio {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            events: VecDeque::new(),
            scan_result: Vec::new(),
            fail_scan: false,
            rssi: -55,
            connecting: false,
            sta: None,
            ip: None,
            mode: WifiMode::Null,
            max_outstanding: 0,
            outstanding: 0,
        }
    }

    pub fn connects(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RadioCall::Connect { ssid, .. } => Some(ssid.clone()),
                _ => None,
            })
            .collect()
    }

    /// Script the success sequence for the current attempt.
    pub fn succeed(&mut self, ip: Ipv4Addr) {
        self.events.push_back(RadioEvent::StaAssociated);
        self.events.push_back(RadioEvent::StaGotIp(ip));
    }

    pub fn fail(&mut self, reason: u16) {
        self.events
            .push_back(RadioEvent::StaConnectAttemptFailed { reason });
    }

    pub fn lose_link(&mut self, reason: u16) {
        self.events.push_back(RadioEvent::StaDisassociated { reason });
    }

    /// Pretend the driver rewrote the STA config (e.g. corrected SSID case).
    pub fn override_sta(&mut self, record: CredentialRecord) {
        self.sta = Some(record);
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioPort for MockRadio {
    fn init(&mut self, enable_sta: bool, ap: Option<&ApConfig>) -> Result<()> {
        self.calls.push(RadioCall::Init {
            sta: enable_sta,
            ap: ap.is_some(),
        });
        self.mode = match (enable_sta, ap.is_some()) {
            (true, true) => WifiMode::ApSta,
            (true, false) => WifiMode::Sta,
            (false, true) => WifiMode::Ap,
            (false, false) => WifiMode::Null,
        };
        Ok(())
    }

    fn connect(&mut self, ssid: &Ssid, secret: Option<&Secret>) -> Result<()> {
        if self.connecting {
            return Err(Error::InvalidState("connect outstanding"));
        }
        self.calls.push(RadioCall::Connect {
            ssid: ssid.to_string(),
            secret: secret.map(|s| String::from_utf8_lossy(s.as_bytes()).into_owned()),
        });
        self.connecting = true;
        self.outstanding += 1;
        self.max_outstanding = self.max_outstanding.max(self.outstanding);
        self.sta = Some(match secret {
            Some(s) => CredentialRecord::new(ssid.clone(), s.clone()),
            None => CredentialRecord::open(ssid.clone()),
        });
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.calls.push(RadioCall::Disconnect);
        self.connecting = false;
        self.outstanding = 0;
        self.ip = None;
        Ok(())
    }

    fn scan_sync(&mut self, max_out: usize) -> Result<Vec<ScanEntry>> {
        self.calls.push(RadioCall::Scan);
        if self.connecting {
            return Err(Error::InvalidState("connect outstanding"));
        }
        if self.fail_scan {
            return Err(Error::RadioFailure(-1));
        }
        Ok(self.scan_result.iter().take(max_out).cloned().collect())
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        let event = self.events.pop_front()?;
        match event {
            RadioEvent::StaGotIp(ip) => {
                self.connecting = false;
                self.outstanding = 0;
                self.ip = Some(ip);
            }
            RadioEvent::StaConnectAttemptFailed { .. } | RadioEvent::StaDisassociated { .. } => {
                self.connecting = false;
                self.outstanding = 0;
                self.ip = None;
            }
            RadioEvent::StaAssociated => {}
        }
        Some(event)
    }

    fn is_connecting(&self) -> bool {
        self.connecting
    }

    fn current_sta_config(&self) -> Result<CredentialRecord> {
        self.sta.clone().ok_or(Error::NotFound)
    }

    fn sta_rssi(&self) -> Option<i8> {
        self.ip.map(|_| self.rssi)
    }

    fn sta_ipv4(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    fn mode(&self) -> WifiMode {
        self.mode
    }
}

// ── MockNvs ───────────────────────────────────────────────────

pub struct MockNvs {
    store: HashMap<String, Vec<u8>>,
    pub writes: usize,
    pub inits: usize,
    pub fail_writes: bool,
}

#[allow(dead_code)]
impl MockNvs {
    pub fn new() -> Self {
        Self {
            store: HashMap::new(),
            writes: 0,
            inits: 0,
            fail_writes: false,
        }
    }

    /// Raw blob, bypassing the store.
    pub fn raw(&self, namespace: &str, key: &str) -> Option<&Vec<u8>> {
        self.store.get(&format!("{}::{}", namespace, key))
    }

    pub fn put_raw(&mut self, namespace: &str, key: &str, data: &[u8]) {
        self.store
            .insert(format!("{}::{}", namespace, key), data.to_vec());
    }
}

impl Default for MockNvs {
    fn default() -> Self {
        Self::new()
    }
}

impl StoragePort for MockNvs {
    fn init(&mut self) -> core::result::Result<(), StorageError> {
        self.inits += 1;
        Ok(())
    }

    fn read(&self, namespace: &str, key: &str) -> core::result::Result<Vec<u8>, StorageError> {
        self.store
            .get(&format!("{}::{}", namespace, key))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn write(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> core::result::Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Full);
        }
        self.writes += 1;
        self.store
            .insert(format!("{}::{}", namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> core::result::Result<(), StorageError> {
        self.store.remove(&format!("{}::{}", namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&format!("{}::{}", namespace, key))
    }
}

// ── RecordingSink ─────────────────────────────────────────────

pub struct RecordingSink {
    pub events: Vec<ProvisioningEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ProvisioningEvent) {
        self.events.push(event.clone());
    }
}

// ── Harness ───────────────────────────────────────────────────

pub type TestCoordinator = Coordinator<MockNvs, MockRadio, RecordingSink>;

/// Coordinator over fresh mocks, radio initialised in AP+STA.
pub fn coordinator(config: &ProvisioningConfig) -> TestCoordinator {
    coordinator_with(MockNvs::new(), config)
}

pub fn coordinator_with(nvs: MockNvs, config: &ProvisioningConfig) -> TestCoordinator {
    let mut radio = MockRadio::new();
    radio.init(true, Some(&config.ap)).unwrap();
    let store = CredentialStore::new(nvs, config.max_saved());
    let mut c = Coordinator::new(store, radio, RecordingSink::new(), config);
    c.start().unwrap();
    c
}

/// Seed a store (MRU order: first element ends up at the head).
pub fn seed(c: &mut TestCoordinator, records: &[CredentialRecord]) {
    for r in records.iter().rev() {
        c.store_mut().on_success(r).unwrap();
    }
}

/// Drain every scripted radio event into the coordinator.
pub fn pump(c: &mut TestCoordinator, now_ms: u64) {
    while let Some(ev) = c.radio_mut().poll_event() {
        c.on_radio_event(ev, now_ms);
    }
}

/// Synchronous [`ProvisioningApi`] that calls straight into a coordinator,
/// for driving the HTTP router end to end without the mailbox thread.
pub struct DirectApi<'a> {
    pub coordinator: RefCell<&'a mut TestCoordinator>,
    pub now_ms: u64,
}

impl ProvisioningApi for DirectApi<'_> {
    fn submit(&self, origin: Origin, request: IntakeRequest) -> Result<IntakeReply> {
        self.coordinator
            .borrow_mut()
            .handle_intake(origin, request, self.now_ms)
    }
}
