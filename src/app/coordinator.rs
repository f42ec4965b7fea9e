//! Provisioning coordinator: the single state machine that reconciles the
//! saved list, endpoint requests and radio events.
//!
//! ```text
//!            tick (list non-empty)
//!   ┌──────┐ ─────────────────────▶ ┌──────────────────┐  StaGotIp   ┌────────┐
//!   │ Idle │                        │ Connecting{t, n} │ ──────────▶ │ Online │
//!   └──────┘ ◀── explicit failure ─ └──────────────────┘             └────────┘
//!      ▲                               │ failure: retry t, or next    │
//!      │ interval elapsed              │ target, or…                  │ lost
//!   ┌─────────────┐ ◀──────────────────┘                              │
//!   │ RoundFailed │                            Idle ◀─────────────────┘
//!   └─────────────┘
//! ```
//!
//! The coordinator is driven from one task: [`step`](Coordinator::step) on a
//! fixed cadence, [`on_radio_event`](Coordinator::on_radio_event) for every
//! event the facade reports, and [`handle_intake`](Coordinator::handle_intake)
//! for every endpoint request.  Nothing else mutates it, so none of these
//! need locking.
//!
//! At most one STA connect is outstanding: a new connect is only issued
//! after the previous attempt resolved, or after a hard disconnect.

use core::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::events::ProvisioningEvent;
use super::intake::{IntakeReply, IntakeRequest, Origin, SavedEntry};
use super::ports::{EventSink, RadioEvent, RadioPort, StoragePort};
use super::status::{ConnState, ScanCache, ScanSnapshot, StatusProjection};
use crate::config::ProvisioningConfig;
use crate::error::{Error, Result};
use crate::store::credentials::CredentialStore;
use crate::store::record::{CredentialRecord, Ssid};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Discriminant of [`ProvState`], used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateId {
    Idle,
    Scanning,
    Connecting,
    Online,
    RoundFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvState {
    Idle,
    Scanning,
    Connecting {
        target: CredentialRecord,
        attempt: u8,
        /// Requested by an endpoint rather than picked from the saved list.
        explicit: bool,
    },
    Online {
        ssid: Ssid,
        ip: Ipv4Addr,
        rssi: i8,
    },
    RoundFailed {
        since_ms: u64,
    },
}

impl ProvState {
    pub fn id(&self) -> StateId {
        match self {
            Self::Idle => StateId::Idle,
            Self::Scanning => StateId::Scanning,
            Self::Connecting { .. } => StateId::Connecting,
            Self::Online { .. } => StateId::Online,
            Self::RoundFailed { .. } => StateId::RoundFailed,
        }
    }
}

/// Auto-connect hold placed by a `Disconnect` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    Until(u64),
    Indefinite,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator<S: StoragePort, R: RadioPort, E: EventSink> {
    store: CredentialStore<S>,
    radio: R,
    sink: E,
    scan_cache: Arc<ScanCache>,

    state: ProvState,
    /// Index into the saved list for the current round.
    cursor: usize,
    hold: Option<Hold>,
    /// A scan was requested while a connect was outstanding.
    scan_pending: bool,

    retry_cap: u8,
    reconnect_interval_ms: Option<u64>,
    scan_cap: usize,
}

impl<S: StoragePort, R: RadioPort, E: EventSink> Coordinator<S, R, E> {
    pub fn new(store: CredentialStore<S>, radio: R, sink: E, config: &ProvisioningConfig) -> Self {
        Self {
            store,
            radio,
            sink,
            scan_cache: Arc::new(ScanCache::new()),
            state: ProvState::Idle,
            cursor: 0,
            hold: None,
            scan_pending: false,
            retry_cap: config.retry_cap(),
            reconnect_interval_ms: config.reconnect_interval(),
            scan_cap: usize::from(config.scan_cap.max(1)),
        }
    }

    /// Initialise the store and announce the saved-list length.
    pub fn start(&mut self) -> Result<()> {
        self.store.init()?;
        let saved = self.store.load_all().map(|l| l.len()).unwrap_or(0);
        self.sink.emit(&ProvisioningEvent::Started { saved });
        info!("Coordinator: started with {} saved network(s)", saved);
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> &ProvState {
        &self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn store(&self) -> &CredentialStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CredentialStore<S> {
        &mut self.store
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    pub fn scan_cache(&self) -> Arc<ScanCache> {
        Arc::clone(&self.scan_cache)
    }

    // ── Tick ──────────────────────────────────────────────────

    /// Advance timers.  Called at the configured step interval.
    pub fn step(&mut self, now_ms: u64) {
        if self.scan_pending && !self.connect_outstanding() {
            self.scan_pending = false;
            if let Err(e) = self.run_scan(now_ms) {
                warn!("Coordinator: deferred scan failed: {}", e);
            }
        }

        match self.state {
            ProvState::Idle => self.tick_idle(now_ms),
            ProvState::RoundFailed { since_ms } => {
                let Some(interval) = self.reconnect_interval_ms else {
                    return;
                };
                if now_ms.saturating_sub(since_ms) >= interval {
                    info!("Coordinator: retry interval elapsed, starting a new round");
                    self.cursor = 0;
                    self.set_state(ProvState::Idle);
                }
            }
            ProvState::Scanning | ProvState::Connecting { .. } | ProvState::Online { .. } => {}
        }
    }

    fn tick_idle(&mut self, now_ms: u64) {
        match self.hold {
            Some(Hold::Indefinite) => return,
            Some(Hold::Until(t)) if now_ms < t => return,
            Some(Hold::Until(_)) => self.hold = None,
            None => {}
        }
        if self.radio.is_connecting() {
            debug!("Coordinator: radio still connecting, waiting");
            return;
        }
        if let Some((target, attempt)) = self.target_at_cursor(now_ms) {
            self.attempt(target, attempt, false, now_ms);
        }
    }

    // ── Radio events ──────────────────────────────────────────

    /// Feed one event from the radio facade.  Events must be fed in the
    /// order the facade reported them.
    pub fn on_radio_event(&mut self, event: RadioEvent, now_ms: u64) {
        debug!("Coordinator: radio event {:?} in {:?}", event, self.state.id());
        match event {
            RadioEvent::StaAssociated => {}
            RadioEvent::StaGotIp(ip) => self.on_got_ip(ip),
            RadioEvent::StaConnectAttemptFailed { reason }
            | RadioEvent::StaDisassociated { reason } => {
                match &self.state {
                    ProvState::Connecting {
                        target,
                        attempt,
                        explicit,
                    } => {
                        warn!(
                            "Coordinator: attempt {} on '{}' failed (reason {})",
                            attempt + 1,
                            target.ssid,
                            reason
                        );
                        let (target, attempt, explicit) = (target.clone(), *attempt, *explicit);
                        if let Some((t, n)) = self.next_after_failure(target, attempt, explicit, now_ms) {
                            self.attempt(t, n, false, now_ms);
                        }
                    }
                    ProvState::Online { ssid, .. } => {
                        warn!("Coordinator: lost '{}' (reason {})", ssid, reason);
                        self.cursor = 0;
                        self.set_state(ProvState::Idle);
                    }
                    _ => {}
                }
            }
        }
    }

    fn on_got_ip(&mut self, ip: Ipv4Addr) {
        if let ProvState::Online { ssid, rssi, .. } = &self.state {
            // Lease renewal.
            let (ssid, rssi) = (ssid.clone(), *rssi);
            self.state = ProvState::Online { ssid, ip, rssi };
            return;
        }

        // Persist what the driver actually used, not our candidate.
        let used = match (self.radio.current_sta_config(), &self.state) {
            (Ok(rec), _) if rec.is_valid() => rec,
            (_, ProvState::Connecting { target, .. }) => target.clone(),
            (Ok(_) | Err(_), _) => {
                warn!("Coordinator: got IP {} but STA config is unreadable", ip);
                return;
            }
        };

        match self.store.on_success(&used) {
            Ok(()) => {}
            Err(e) => {
                error!("Coordinator: failed to persist '{}': {}", used.ssid, e);
                self.sink.emit(&ProvisioningEvent::CommitFailed {
                    ssid: used.ssid.clone(),
                });
            }
        }

        self.cursor = 0;
        self.hold = None;
        let rssi = self.radio.sta_rssi().unwrap_or(0);
        self.sink.emit(&ProvisioningEvent::Online {
            ssid: used.ssid.clone(),
            ip,
        });
        self.set_state(ProvState::Online {
            ssid: used.ssid.clone(),
            ip,
            rssi,
        });
    }

    // ── Intake ────────────────────────────────────────────────

    /// Serve one endpoint request.
    pub fn handle_intake(
        &mut self,
        origin: Origin,
        request: IntakeRequest,
        now_ms: u64,
    ) -> Result<IntakeReply> {
        info!("Coordinator: {:?} request {}", origin, describe(&request));
        match request {
            IntakeRequest::StatusQuery => Ok(IntakeReply::Status(self.status())),
            IntakeRequest::ListSaved => {
                let list = self.store.load_all()?;
                Ok(IntakeReply::Saved(
                    list.into_iter()
                        .enumerate()
                        .map(|(index, r)| SavedEntry {
                            index,
                            ssid: r.ssid.clone(),
                            secret: r.secret.clone(),
                        })
                        .collect(),
                ))
            }
            IntakeRequest::Scan => {
                if self.connect_outstanding() {
                    info!("Coordinator: connect outstanding, scan deferred");
                    self.scan_pending = true;
                    return Ok(IntakeReply::Scan(self.scan_cache.latest()));
                }
                self.run_scan(now_ms).map(IntakeReply::Scan)
            }
            IntakeRequest::ConnectExplicit { ssid, secret } => {
                if ssid.is_empty() {
                    return Err(Error::InvalidArg("empty ssid"));
                }
                let target = CredentialRecord::new(ssid, secret.unwrap_or_default());
                self.cancel_in_flight()?;
                self.attempt(target, 0, true, now_ms);
                match self.state {
                    ProvState::Connecting { .. } => Ok(IntakeReply::Ack),
                    _ => Err(Error::InvalidState("connect could not be issued")),
                }
            }
            IntakeRequest::ConnectSaved { ssid } => {
                let record = self.store.find(&ssid)?;
                self.store.on_success(&record)?;
                self.cancel_in_flight()?;
                self.set_state(ProvState::Idle);
                Ok(IntakeReply::Ack)
            }
            IntakeRequest::Forget { ssid } => {
                if self.store.forget(&ssid)? > 0 {
                    self.sink
                        .emit(&ProvisioningEvent::Forgotten { ssid, origin });
                }
                Ok(IntakeReply::Ack)
            }
            IntakeRequest::ForgetAt { index } => {
                let removed = self.store.forget_at(index)?;
                self.sink.emit(&ProvisioningEvent::Forgotten {
                    ssid: removed.ssid.clone(),
                    origin,
                });
                Ok(IntakeReply::Ack)
            }
            IntakeRequest::Disconnect => {
                self.radio.disconnect()?;
                self.cursor = 0;
                self.hold = Some(match self.reconnect_interval_ms {
                    Some(iv) => Hold::Until(now_ms.saturating_add(iv)),
                    None => Hold::Indefinite,
                });
                self.set_state(ProvState::Idle);
                Ok(IntakeReply::Ack)
            }
        }
    }

    // ── Status view ───────────────────────────────────────────

    /// Synthesize the endpoint-facing status.  When online the radio is
    /// probed once for the live SSID, RSSI and address.
    pub fn status(&self) -> StatusProjection {
        let mode = self.radio.mode();
        let mut view = StatusProjection {
            state: ConnState::Idle,
            ssid: None,
            ip: None,
            rssi: 0,
            mode,
        };
        match &self.state {
            ProvState::Idle | ProvState::Scanning => {}
            ProvState::Connecting { .. } => view.state = ConnState::Connecting,
            ProvState::RoundFailed { .. } => view.state = ConnState::Failed,
            ProvState::Online { ssid, ip, rssi } => {
                view.state = ConnState::Connected;
                view.ssid = Some(
                    self.radio
                        .current_sta_config()
                        .map(|r| r.ssid)
                        .unwrap_or_else(|_| ssid.clone()),
                );
                view.rssi = self.radio.sta_rssi().unwrap_or(*rssi);
                view.ip = Some(self.radio.sta_ipv4().unwrap_or(*ip));
            }
        }
        view
    }

    // ── Internals ─────────────────────────────────────────────

    fn connect_outstanding(&self) -> bool {
        self.radio.is_connecting() || matches!(self.state, ProvState::Connecting { .. })
    }

    /// Hard-disconnect any attempt or link and restart the round.
    fn cancel_in_flight(&mut self) -> Result<()> {
        if self.connect_outstanding() || matches!(self.state, ProvState::Online { .. }) {
            info!("Coordinator: cancelling current link");
            self.radio.disconnect()?;
        }
        self.cursor = 0;
        self.hold = None;
        Ok(())
    }

    /// Issue connects until one is accepted by the radio or the round ends.
    fn attempt(&mut self, target: CredentialRecord, attempt: u8, explicit: bool, now_ms: u64) {
        let mut next = Some((target, attempt));
        while let Some((target, attempt)) = next.take() {
            match self.radio.connect(&target.ssid, target.secret()) {
                Ok(()) => {
                    self.sink.emit(&ProvisioningEvent::ConnectIssued {
                        ssid: target.ssid.clone(),
                        attempt,
                        explicit,
                    });
                    self.set_state(ProvState::Connecting {
                        target,
                        attempt,
                        explicit,
                    });
                    return;
                }
                Err(e) => {
                    warn!("Coordinator: connect to '{}' rejected: {}", target.ssid, e);
                    next = self.next_after_failure(target, attempt, explicit, now_ms);
                }
            }
        }
    }

    /// Decide what follows a failed attempt.  Returns the next
    /// `(target, attempt)` to issue, or `None` after moving to a resting
    /// state.
    fn next_after_failure(
        &mut self,
        target: CredentialRecord,
        attempt: u8,
        explicit: bool,
        now_ms: u64,
    ) -> Option<(CredentialRecord, u8)> {
        if explicit {
            info!("Coordinator: explicit connect to '{}' failed", target.ssid);
            self.set_state(ProvState::Idle);
            return None;
        }
        if attempt.saturating_add(1) < self.retry_cap {
            return Some((target, attempt + 1));
        }
        self.cursor += 1;
        self.target_at_cursor(now_ms)
    }

    /// The saved record at the cursor, skipping invalid entries.  Ends the
    /// round when the cursor runs off the list.
    fn target_at_cursor(&mut self, now_ms: u64) -> Option<(CredentialRecord, u8)> {
        let list = match self.store.load_all() {
            Ok(list) => list,
            Err(e) => {
                warn!("Coordinator: cannot load saved list: {}", e);
                self.set_state(ProvState::Idle);
                return None;
            }
        };
        if list.is_empty() {
            self.set_state(ProvState::Idle);
            return None;
        }
        while self.cursor < list.len() && !list[self.cursor].is_valid() {
            self.cursor += 1;
        }
        match list.get(self.cursor) {
            Some(rec) => Some((rec.clone(), 0)),
            None => {
                self.sink
                    .emit(&ProvisioningEvent::RoundFailed { tried: list.len() });
                self.set_state(ProvState::RoundFailed { since_ms: now_ms });
                None
            }
        }
    }

    fn run_scan(&mut self, now_ms: u64) -> Result<Arc<ScanSnapshot>> {
        let previous = core::mem::replace(&mut self.state, ProvState::Scanning);
        let result = self.radio.scan_sync(self.scan_cap);
        self.state = previous;

        let mut entries = result?;
        entries.truncate(self.scan_cap);
        self.sink.emit(&ProvisioningEvent::ScanCompleted {
            found: entries.len(),
        });
        Ok(self.scan_cache.replace(entries, now_ms))
    }

    fn set_state(&mut self, next: ProvState) {
        let (from, to) = (self.state.id(), next.id());
        self.state = next;
        if from != to {
            self.sink.emit(&ProvisioningEvent::StateChanged { from, to });
        }
    }
}

/// Log-safe summary of a request (never includes secrets).
fn describe(request: &IntakeRequest) -> String {
    match request {
        IntakeRequest::Scan => "scan".into(),
        IntakeRequest::ConnectExplicit { ssid, secret } => format!(
            "connect '{}' (secret {} bytes)",
            ssid,
            secret.as_ref().map_or(0, |s| s.len())
        ),
        IntakeRequest::ConnectSaved { ssid } => format!("connect saved '{}'", ssid),
        IntakeRequest::Forget { ssid } => format!("forget '{}'", ssid),
        IntakeRequest::ForgetAt { index } => format!("forget slot {}", index),
        IntakeRequest::Disconnect => "disconnect".into(),
        IntakeRequest::ListSaved => "list saved".into(),
        IntakeRequest::StatusQuery => "status".into(),
    }
}
