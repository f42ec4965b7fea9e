//! Provisioning service: the coordinator task.
//!
//! [`ProvisioningService`] owns the [`Coordinator`] and is the only thing
//! that drives it.  Each [`poll`](ProvisioningService::poll) drains every
//! input in a fixed order and then steps the state machine when its
//! interval has elapsed:
//!
//! ```text
//!  RadioPort events ──┐
//!  IntakeMailbox ─────┼──▶ ┌─────────────────────┐ ──▶ EventSink
//!  BLE link events ───┘    │ ProvisioningService │
//!                          │   └─ Coordinator    │ ──▶ BLE notify
//!  ClockPort ─────────────▶└─────────────────────┘
//! ```
//!
//! While a BLE peer is connected, connection progress is pushed to it
//! without being asked: `Connecting` when an attempt starts, `Success`
//! with the SSID once online, `Fail` when an attempt ends any other way.

use log::debug;

use crate::adapters::ble::{BleAdapter, BleEndpoint, BleLinkEvent};
use crate::blufi::protocol::ReportState;
use crate::config::ProvisioningConfig;

use super::coordinator::{Coordinator, StateId};
use super::intake::{IntakeMailbox, Origin};
use super::ports::{ClockPort, EventSink, RadioPort, StoragePort};

/// How often the binary calls [`ProvisioningService::poll`].
pub const POLL_INTERVAL_MS: u32 = 50;

/// The BLE stack handle plus the BluFi state of its current link.
pub struct BleLink {
    pub adapter: BleAdapter,
    pub endpoint: BleEndpoint,
}

impl BleLink {
    pub fn new(adapter: BleAdapter, security_enabled: bool) -> Self {
        Self {
            adapter,
            endpoint: BleEndpoint::new(security_enabled),
        }
    }
}

pub struct ProvisioningService<'a, S, R, E, C>
where
    S: StoragePort,
    R: RadioPort,
    E: EventSink,
    C: ClockPort,
{
    coordinator: Coordinator<S, R, E>,
    mailbox: &'a IntakeMailbox,
    clock: C,
    ble: Option<BleLink>,
    step_interval_ms: u64,
    last_step_ms: Option<u64>,
    last_state: StateId,
}

impl<'a, S, R, E, C> ProvisioningService<'a, S, R, E, C>
where
    S: StoragePort,
    R: RadioPort,
    E: EventSink,
    C: ClockPort,
{
    pub fn new(
        coordinator: Coordinator<S, R, E>,
        mailbox: &'a IntakeMailbox,
        clock: C,
        ble: Option<BleLink>,
        config: &ProvisioningConfig,
    ) -> Self {
        let last_state = coordinator.state().id();
        Self {
            coordinator,
            mailbox,
            clock,
            ble,
            step_interval_ms: u64::from(config.step_interval_ms.max(1)),
            last_step_ms: None,
            last_state,
        }
    }

    pub fn coordinator(&self) -> &Coordinator<S, R, E> {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut Coordinator<S, R, E> {
        &mut self.coordinator
    }

    pub fn ble_mut(&mut self) -> Option<&mut BleLink> {
        self.ble.as_mut()
    }

    /// One pass over every input.
    pub fn poll(&mut self) {
        let now = self.clock.now_ms();

        while let Some(event) = self.coordinator.radio_mut().poll_event() {
            self.coordinator.on_radio_event(event, now);
        }

        while let Some(envelope) = self.mailbox.try_next() {
            let ticket = envelope.ticket();
            let result = self
                .coordinator
                .handle_intake(envelope.origin, envelope.request, now);
            self.mailbox.reply(ticket, result);
        }

        self.pump_ble(now);

        let due = self
            .last_step_ms
            .is_none_or(|t| now.saturating_sub(t) >= self.step_interval_ms);
        if due {
            self.coordinator.step(now);
            self.last_step_ms = Some(now);
        }

        self.report_transition();
    }

    fn pump_ble(&mut self, now: u64) {
        let Some(link) = self.ble.as_mut() else {
            return;
        };
        let coordinator = &mut self.coordinator;

        while let Some(event) = link.adapter.poll_event() {
            match event {
                BleLinkEvent::Connected => link.endpoint.on_connected(),
                BleLinkEvent::Disconnected => link.endpoint.on_disconnected(),
                BleLinkEvent::Mtu(mtu) => link.endpoint.on_mtu(mtu),
                BleLinkEvent::Write(raw) => {
                    let outcome = link
                        .endpoint
                        .handle_write(&raw, |req| coordinator.handle_intake(Origin::Ble, req, now));
                    for frame in &outcome.notify {
                        link.adapter.notify(frame);
                    }
                    if outcome.close_link {
                        link.adapter.close_link();
                    }
                }
            }
        }
    }

    fn report_transition(&mut self) {
        let current = self.coordinator.state().id();
        let previous = core::mem::replace(&mut self.last_state, current);
        if previous == current {
            return;
        }
        let Some(link) = self.ble.as_mut() else {
            return;
        };
        if !link.endpoint.is_connected() {
            return;
        }

        let status = self.coordinator.status();
        let opmode = status.mode.opmode();
        let frames = match current {
            StateId::Connecting => link.endpoint.report_state(opmode, ReportState::Connecting, None),
            StateId::Online => {
                link.endpoint
                    .report_state(opmode, ReportState::Success, status.ssid.as_ref())
            }
            _ if previous == StateId::Connecting => {
                link.endpoint.report_state(opmode, ReportState::Fail, None)
            }
            _ => return,
        };
        debug!("Service: reporting {:?} -> {:?} to BLE peer", previous, current);
        for frame in &frames {
            link.adapter.notify(frame);
        }
    }
}
