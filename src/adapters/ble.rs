//! BLE provisioning adapter (BluFi over GATT).
//!
//! Two halves:
//!
//! - [`BleAdapter`] owns the Bluetooth stack: GATT service registration,
//!   advertising and notifications.  Raw characteristic writes are queued,
//!   never interpreted in the stack's callback.
//! - [`BleEndpoint`] turns those raw writes into BluFi frames, maps them to
//!   intake requests and encodes the replies.  It runs inside the
//!   coordinator task and touches no native API, so it is host-testable.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via raw `esp_idf_svc::sys` FFI.
//! - **all other targets**: an in-memory link driven by the `sim_*` helpers.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID     | Perms        |
//! |----------------|----------|--------------|
//! | Service        | `0xFFFF` |              |
//! | Peer → device  | `0xFF01` | Write        |
//! | Device → peer  | `0xFF02` | Read+Notify  |

#[cfg(not(target_os = "espidf"))]
use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::app::intake::{IntakeReply, IntakeRequest};
use crate::app::status::StatusProjection;
use crate::blufi::frame::FrameType;
use crate::blufi::protocol::{self, BlufiRequest, CustomCommand, ReportState, data};
use crate::blufi::session::BlufiSession;
use crate::error::Result;
use crate::store::record::{Secret, Ssid};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u16 = 0xFFFF;
pub const CHAR_P2E_UUID: u16 = 0xFF01;
pub const CHAR_E2P_UUID: u16 = 0xFF02;

/// Depth of the raw link-event queue between the BLE stack and the
/// coordinator task.
pub const LINK_QUEUE_DEPTH: usize = 16;

// ───────────────────────────────────────────────────────────────
// Link events
// ───────────────────────────────────────────────────────────────

/// What the BLE stack reports; consumed by [`BleEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleLinkEvent {
    Connected,
    Disconnected,
    /// One write to the peer → device characteristic.
    Write(Vec<u8>),
    /// ATT MTU negotiated by the peer.
    Mtu(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF BLE static state
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures.  Handles live in atomics; link events go through a bounded
// channel the coordinator task drains.

#[cfg(target_os = "espidf")]
mod stack {
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use esp_idf_svc::sys::*;

    use super::{BleLinkEvent, CHAR_E2P_UUID, CHAR_P2E_UUID, LINK_QUEUE_DEPTH, SERVICE_UUID};

    pub(super) static LINK_EVENTS: Channel<CriticalSectionRawMutex, BleLinkEvent, LINK_QUEUE_DEPTH> =
        Channel::new();

    pub(super) static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    pub(super) static CONN_ID: AtomicU32 = AtomicU32::new(0);
    pub(super) static CONNECTED: AtomicBool = AtomicBool::new(false);
    pub(super) static E2P_HANDLE: AtomicU32 = AtomicU32::new(0);
    static P2E_HANDLE: AtomicU32 = AtomicU32::new(0);
    static SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    static CHAR_STEP: AtomicU32 = AtomicU32::new(0);

    const CCCD_UUID: u16 = 0x2902;

    /// 128-bit form of the service UUID for the advertising payload.
    static mut ADV_SERVICE_UUID128: [u8; 16] = [
        0xfb, 0x34, 0x9b, 0x5f, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0xFF, 0xFF, 0x00,
        0x00,
    ];

    fn uuid16(uuid: u16) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 2;
        t.uuid.uuid16 = uuid;
        t
    }

    fn adv_params() -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x100,
            adv_int_max: 0x100,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        }
    }

    pub(super) unsafe fn start_advertising() {
        let mut params = adv_params();
        unsafe {
            esp_ble_gap_start_advertising(&mut params);
        }
    }

    pub(super) unsafe fn config_adv_data() {
        let mut adv = esp_ble_adv_data_t {
            set_scan_rsp: false,
            include_name: true,
            include_txpower: true,
            min_interval: 0x0006,
            max_interval: 0x0010,
            appearance: 0,
            manufacturer_len: 0,
            p_manufacturer_data: core::ptr::null_mut(),
            service_data_len: 0,
            p_service_data: core::ptr::null_mut(),
            service_uuid_len: 16,
            p_service_uuid: core::ptr::addr_of_mut!(ADV_SERVICE_UUID128).cast(),
            flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
        };
        unsafe {
            esp_ble_gap_config_adv_data(&mut adv);
        }
    }

    fn push(event: BleLinkEvent) {
        if LINK_EVENTS.try_send(event).is_err() {
            log::warn!("BLE: link event queue full, event dropped");
        }
    }

    pub(super) unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        _param: *mut esp_ble_gap_cb_param_t,
    ) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT => unsafe {
                start_advertising();
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                log::info!("BLE GAP: advertising started");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
                log::info!("BLE GAP: advertising stopped");
            }
            _ => {}
        }
    }

    pub(super) unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                GATTS_IF.store(u32::from(gatts_if), Ordering::Relaxed);
                log::info!("BLE GATTS: app registered (if={})", gatts_if);
                unsafe {
                    config_adv_data();
                    let mut svc_id = esp_gatt_srvc_id_t {
                        id: esp_gatt_id_t {
                            uuid: uuid16(SERVICE_UUID),
                            inst_id: 0,
                        },
                        is_primary: true,
                    };
                    esp_ble_gatts_create_service(gatts_if, &mut svc_id, 8);
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let svc_handle = unsafe { (*param).create.service_handle };
                SVC_HANDLE.store(u32::from(svc_handle), Ordering::Relaxed);
                log::info!("BLE GATTS: service created (handle={})", svc_handle);
                CHAR_STEP.store(1, Ordering::Relaxed);
                unsafe {
                    esp_ble_gatts_start_service(svc_handle);
                    let mut uuid = uuid16(CHAR_P2E_UUID);
                    esp_ble_gatts_add_char(
                        svc_handle,
                        &mut uuid,
                        ESP_GATT_PERM_WRITE as esp_gatt_perm_t,
                        ESP_GATT_CHAR_PROP_BIT_WRITE as esp_gatt_char_prop_t,
                        core::ptr::null_mut(),
                        core::ptr::null_mut(),
                    );
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let handle = unsafe { (*param).add_char.attr_handle };
                let svc_handle = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                match CHAR_STEP.load(Ordering::Relaxed) {
                    1 => {
                        P2E_HANDLE.store(u32::from(handle), Ordering::Relaxed);
                        log::info!("BLE GATTS: p2e char (handle={})", handle);
                        CHAR_STEP.store(2, Ordering::Relaxed);
                        unsafe {
                            let mut uuid = uuid16(CHAR_E2P_UUID);
                            esp_ble_gatts_add_char(
                                svc_handle,
                                &mut uuid,
                                ESP_GATT_PERM_READ as esp_gatt_perm_t,
                                (ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY)
                                    as esp_gatt_char_prop_t,
                                core::ptr::null_mut(),
                                core::ptr::null_mut(),
                            );
                        }
                    }
                    2 => {
                        E2P_HANDLE.store(u32::from(handle), Ordering::Relaxed);
                        log::info!("BLE GATTS: e2p char (handle={})", handle);
                        CHAR_STEP.store(3, Ordering::Relaxed);
                        unsafe {
                            let mut uuid = uuid16(CCCD_UUID);
                            esp_ble_gatts_add_char_descr(
                                svc_handle,
                                &mut uuid,
                                (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                                core::ptr::null_mut(),
                                core::ptr::null_mut(),
                            );
                        }
                    }
                    _ => {}
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
                log::info!("BLE GATTS: service ready");
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let conn_id = unsafe { (*param).connect.conn_id };
                CONN_ID.store(u32::from(conn_id), Ordering::Relaxed);
                CONNECTED.store(true, Ordering::Relaxed);
                log::info!("BLE GATTS: client connected (conn_id={})", conn_id);
                unsafe {
                    esp_ble_gap_stop_advertising();
                }
                push(BleLinkEvent::Connected);
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                CONNECTED.store(false, Ordering::Relaxed);
                log::info!("BLE GATTS: client disconnected");
                push(BleLinkEvent::Disconnected);
                unsafe {
                    start_advertising();
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
                let mtu = unsafe { (*param).mtu.mtu };
                push(BleLinkEvent::Mtu(mtu));
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let p = unsafe { &(*param).write };
                if u32::from(p.handle) == P2E_HANDLE.load(Ordering::Relaxed) {
                    let data = unsafe { core::slice::from_raw_parts(p.value, usize::from(p.len)) };
                    push(BleLinkEvent::Write(data.to_vec()));
                }
                if p.need_rsp {
                    unsafe {
                        esp_ble_gatts_send_response(
                            gatts_if,
                            p.conn_id,
                            p.trans_id,
                            esp_gatt_status_t_ESP_GATT_OK,
                            core::ptr::null_mut(),
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// BLE adapter
// ───────────────────────────────────────────────────────────────

pub struct BleAdapter {
    state: BleState,
    device_name: heapless::String<24>,
    #[cfg(not(target_os = "espidf"))]
    sim_events: VecDeque<BleLinkEvent>,
    #[cfg(not(target_os = "espidf"))]
    sim_notified: Vec<Vec<u8>>,
}

impl BleAdapter {
    pub fn new(device_name: heapless::String<24>) -> Self {
        Self {
            state: BleState::Idle,
            device_name,
            #[cfg(not(target_os = "espidf"))]
            sim_events: VecDeque::new(),
            #[cfg(not(target_os = "espidf"))]
            sim_notified: Vec::new(),
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, BleState::Advertising | BleState::Connected)
    }

    pub fn start(&mut self) -> Result<()> {
        info!("BLE: starting advertising as '{}'", self.device_name);
        if let Err(e) = self.platform_start() {
            self.state = BleState::Failed;
            return Err(e);
        }
        self.state = BleState::Advertising;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.platform_stop();
        self.state = BleState::Idle;
        info!("BLE: stopped");
    }

    /// Next link event, if any.  Keeps [`state`](Self::state) in step with
    /// the link.
    pub fn poll_event(&mut self) -> Option<BleLinkEvent> {
        let event = self.platform_poll()?;
        match event {
            BleLinkEvent::Connected => self.state = BleState::Connected,
            BleLinkEvent::Disconnected if self.state != BleState::Idle => {
                self.state = BleState::Advertising;
            }
            _ => {}
        }
        Some(event)
    }

    /// Send one frame on the device → peer characteristic.
    pub fn notify(&mut self, frame: &[u8]) {
        if self.state != BleState::Connected {
            debug!("BLE: notify dropped, no peer");
            return;
        }
        self.platform_notify(frame);
    }

    /// Drop the current peer; advertising resumes on the disconnect event.
    pub fn close_link(&mut self) {
        info!("BLE: closing link on peer request");
        self.platform_close();
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> Result<()> {
        use esp_idf_svc::sys::*;

        let check = |what: &str, ret: esp_err_t| -> Result<()> {
            if ret == ESP_OK as esp_err_t {
                Ok(())
            } else {
                log::error!("BLE: {} failed ({})", what, ret);
                Err(crate::error::Error::RadioFailure(ret))
            }
        };

        unsafe {
            // BLE only; classic BT memory is handed back to the heap.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check("bt_controller_init", esp_bt_controller_init(&mut bt_cfg))?;
            check(
                "bt_controller_enable",
                esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
            )?;
            check("bluedroid_init", esp_bluedroid_init())?;
            check("bluedroid_enable", esp_bluedroid_enable())?;

            check(
                "gap_register_callback",
                esp_ble_gap_register_callback(Some(stack::gap_event_handler)),
            )?;
            check(
                "gatts_register_callback",
                esp_ble_gatts_register_callback(Some(stack::gatts_event_handler)),
            )?;

            let mut name = [0u8; 25];
            name[..self.device_name.len()].copy_from_slice(self.device_name.as_bytes());
            check(
                "set_device_name",
                esp_ble_gap_set_device_name(name.as_ptr().cast()),
            )?;
            check("gatts_app_register", esp_ble_gatts_app_register(0))?;
        }
        info!(
            "BLE(espidf): Bluedroid stack initialized, advertising as '{}'",
            self.device_name
        );
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> Result<()> {
        info!(
            "BLE(sim): advertising '{}' (service {:#06x})",
            self.device_name, SERVICE_UUID
        );
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) {
        use esp_idf_svc::sys::*;
        unsafe {
            esp_ble_gap_stop_advertising();
            esp_bluedroid_disable();
            esp_bluedroid_deinit();
            esp_bt_controller_disable();
            esp_bt_controller_deinit();
        }
        info!("BLE(espidf): stack shut down");
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) {
        self.sim_events.clear();
        info!("BLE(sim): stopped");
    }

    #[cfg(target_os = "espidf")]
    fn platform_poll(&mut self) -> Option<BleLinkEvent> {
        stack::LINK_EVENTS.try_receive().ok()
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_poll(&mut self) -> Option<BleLinkEvent> {
        self.sim_events.pop_front()
    }

    #[cfg(target_os = "espidf")]
    fn platform_notify(&mut self, frame: &[u8]) {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;

        let handle = stack::E2P_HANDLE.load(Ordering::Relaxed);
        if handle == 0 || !stack::CONNECTED.load(Ordering::Relaxed) {
            return;
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                stack::GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t,
                stack::CONN_ID.load(Ordering::Relaxed) as u16,
                handle as u16,
                frame.len() as u16,
                frame.as_ptr().cast_mut(),
                false,
            )
        };
        if ret != ESP_OK as esp_err_t {
            warn!("BLE: notify failed ({})", ret);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_notify(&mut self, frame: &[u8]) {
        self.sim_notified.push(frame.to_vec());
    }

    #[cfg(target_os = "espidf")]
    fn platform_close(&mut self) {
        use core::sync::atomic::Ordering;
        unsafe {
            esp_idf_svc::sys::esp_ble_gatts_close(
                stack::GATTS_IF.load(Ordering::Relaxed) as esp_idf_svc::sys::esp_gatt_if_t,
                stack::CONN_ID.load(Ordering::Relaxed) as u16,
            );
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_close(&mut self) {
        if self.state == BleState::Connected {
            self.sim_events.push_back(BleLinkEvent::Disconnected);
        }
    }

    // ── Simulation hooks ──────────────────────────────────────

    /// Queue a link event as if the stack had reported it.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_push(&mut self, event: BleLinkEvent) {
        self.sim_events.push_back(event);
    }

    /// Frames notified since the last call.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_take_notified(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.sim_notified)
    }
}

// ───────────────────────────────────────────────────────────────
// BluFi endpoint
// ───────────────────────────────────────────────────────────────

/// Result of one peer write.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Frames to notify, in order.
    pub notify: Vec<Vec<u8>>,
    /// The peer asked the device to drop the BLE link.
    pub close_link: bool,
}

/// Per-link BluFi state plus the STA credentials the peer has written so far.
pub struct BleEndpoint {
    session: BlufiSession,
    pending_ssid: Option<Ssid>,
    pending_secret: Option<Secret>,
    connected: bool,
}

impl BleEndpoint {
    pub fn new(security_enabled: bool) -> Self {
        Self {
            session: BlufiSession::new(security_enabled),
            pending_ssid: None,
            pending_secret: None,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn on_connected(&mut self) {
        info!("BLE: peer connected, security context reset");
        self.session.reset();
        self.pending_ssid = None;
        self.pending_secret = None;
        self.connected = true;
    }

    pub fn on_disconnected(&mut self) {
        info!("BLE: peer disconnected, security context dropped");
        self.session.reset();
        self.pending_ssid = None;
        self.pending_secret = None;
        self.connected = false;
    }

    pub fn on_mtu(&mut self, att_mtu: u16) {
        self.session.set_mtu(att_mtu);
    }

    /// Handle one peer write.  `handler` forwards intake requests to the
    /// coordinator.
    pub fn handle_write<F>(&mut self, raw: &[u8], mut handler: F) -> WriteOutcome
    where
        F: FnMut(IntakeRequest) -> Result<IntakeReply>,
    {
        let mut out = WriteOutcome::default();

        let frame = match self.session.receive(raw) {
            Ok(Some(frame)) => frame,
            Ok(None) => return out,
            Err(e) => {
                warn!("BLE: bad frame: {}", e);
                out.notify = self.session.error_frames(e.code());
                return out;
            }
        };

        if frame.requires_ack() {
            out.notify.extend(self.session.ack_frames(frame.seq));
        }

        match protocol::decode(&frame) {
            Ok(request) => self.dispatch(request, &mut handler, &mut out),
            Err(e) => {
                warn!("BLE: {}", e);
                out.notify
                    .extend(self.session.error_frames(protocol::ERR_DATA_FORMAT));
            }
        }
        out
    }

    /// Connection report for `status`, or nothing without a peer.
    pub fn report(&mut self, status: &StatusProjection) -> Vec<Vec<u8>> {
        if !self.connected {
            return Vec::new();
        }
        self.send_report(status.mode.opmode(), status.state.into(), status.ssid.as_ref())
    }

    /// Explicit-state connection report, or nothing without a peer.
    pub fn report_state(&mut self, opmode: u8, state: ReportState, ssid: Option<&Ssid>) -> Vec<Vec<u8>> {
        if !self.connected {
            return Vec::new();
        }
        self.send_report(opmode, state, ssid)
    }

    fn send_report(&mut self, opmode: u8, state: ReportState, ssid: Option<&Ssid>) -> Vec<Vec<u8>> {
        let payload = protocol::encode_report(opmode, state, ssid);
        self.session.send(FrameType::Data, data::WIFI_REPORT, &payload)
    }

    fn dispatch<F>(&mut self, request: BlufiRequest, handler: &mut F, out: &mut WriteOutcome)
    where
        F: FnMut(IntakeRequest) -> Result<IntakeReply>,
    {
        match request {
            BlufiRequest::Ack { seq } => debug!("BLE: peer ack for #{}", seq),
            BlufiRequest::SetSecMode(mode) => {
                debug!("BLE: security mode {:#04x}", mode.0);
                self.session.set_sec_mode(mode);
            }
            BlufiRequest::SetOpMode(mode) => {
                info!("BLE: opmode {} requested, radio stays in AP+STA", mode);
            }
            BlufiRequest::Negotiate(payload) => match self.session.negotiate(&payload) {
                Ok(frames) => out.notify.extend(frames),
                Err(e) => {
                    warn!("BLE: negotiation failed: {}", e);
                    out.notify.extend(self.session.error_frames(e.code()));
                }
            },
            BlufiRequest::SetStaBssid => debug!("BLE: BSSID ignored"),
            BlufiRequest::SetStaSsid(bytes) => match Ssid::from_peer(&bytes) {
                Ok(ssid) => {
                    info!("BLE: STA ssid '{}'", ssid);
                    self.pending_ssid = Some(ssid);
                }
                Err(e) => {
                    warn!("BLE: STA ssid rejected ({} bytes): {}", bytes.len(), e);
                    self.pending_ssid = None;
                    out.notify
                        .extend(self.session.error_frames(protocol::ERR_DATA_FORMAT));
                }
            },
            BlufiRequest::SetStaSecret(bytes) => match Secret::from_peer(&bytes) {
                Ok(secret) => {
                    info!("BLE: STA secret ({} bytes)", secret.len());
                    self.pending_secret = Some(secret);
                }
                Err(e) => {
                    warn!("BLE: STA secret rejected ({} bytes): {}", bytes.len(), e);
                    self.pending_secret = None;
                    out.notify
                        .extend(self.session.error_frames(protocol::ERR_DATA_FORMAT));
                }
            },
            BlufiRequest::ConnectSta => self.connect_sta(handler, out),
            BlufiRequest::DisconnectSta => {
                if let Err(e) = handler(IntakeRequest::Disconnect) {
                    warn!("BLE: disconnect failed: {}", e);
                }
            }
            BlufiRequest::Deauthenticate => debug!("BLE: deauthenticate ignored"),
            BlufiRequest::QueryStatus => {
                if let Ok(IntakeReply::Status(status)) = handler(IntakeRequest::StatusQuery) {
                    out.notify.extend(self.send_report(
                        status.mode.opmode(),
                        status.state.into(),
                        status.ssid.as_ref(),
                    ));
                }
            }
            BlufiRequest::QueryVersion => {
                out.notify
                    .extend(self.session.send(FrameType::Data, data::VERSION, &protocol::VERSION));
            }
            BlufiRequest::CloseLink => out.close_link = true,
            BlufiRequest::QueryApList => match handler(IntakeRequest::Scan) {
                Ok(IntakeReply::Scan(snapshot)) => {
                    let payload = protocol::encode_wifi_list(&snapshot.entries);
                    out.notify
                        .extend(self.session.send(FrameType::Data, data::WIFI_LIST, &payload));
                }
                other => {
                    warn!("BLE: scan failed: {:?}", other.err());
                    out.notify
                        .extend(self.session.error_frames(protocol::ERR_WIFI_SCAN));
                }
            },
            BlufiRequest::Custom(command) => self.custom(command, handler, out),
            BlufiRequest::Ignored {
                frame_type,
                subtype,
            } => debug!("BLE: {:?} subtype {:#04x} ignored", frame_type, subtype),
        }
    }

    fn connect_sta<F>(&mut self, handler: &mut F, out: &mut WriteOutcome)
    where
        F: FnMut(IntakeRequest) -> Result<IntakeReply>,
    {
        let ssid = match &self.pending_ssid {
            Some(ssid) if !ssid.is_empty() => ssid.clone(),
            _ => {
                warn!("BLE: connect without ssid");
                self.fail_report(handler, out);
                return;
            }
        };
        let secret = self.pending_secret.clone().filter(|s| !s.is_empty());
        if let Err(e) = handler(IntakeRequest::ConnectExplicit { ssid, secret }) {
            warn!("BLE: connect rejected: {}", e);
            self.fail_report(handler, out);
        }
    }

    fn fail_report<F>(&mut self, handler: &mut F, out: &mut WriteOutcome)
    where
        F: FnMut(IntakeRequest) -> Result<IntakeReply>,
    {
        let opmode = match handler(IntakeRequest::StatusQuery) {
            Ok(IntakeReply::Status(status)) => status.mode.opmode(),
            _ => 0,
        };
        out.notify
            .extend(self.send_report(opmode, ReportState::Fail, None));
    }

    fn custom<F>(&mut self, command: CustomCommand, handler: &mut F, out: &mut WriteOutcome)
    where
        F: FnMut(IntakeRequest) -> Result<IntakeReply>,
    {
        let payload = match command {
            CustomCommand::ListSaved => match handler(IntakeRequest::ListSaved) {
                Ok(IntakeReply::Saved(list)) => protocol::encode_saved_list(&list),
                other => {
                    warn!("BLE: saved list unavailable: {:?}", other.err());
                    protocol::encode_saved_list(&[])
                }
            },
            CustomCommand::ForgetAt(index) => {
                let result = handler(IntakeRequest::ForgetAt {
                    index: usize::from(index),
                });
                if let Err(e) = &result {
                    warn!("BLE: forget #{} failed: {}", index, e);
                }
                protocol::encode_forget_result(matches!(result, Ok(IntakeReply::Ack)))
            }
            CustomCommand::Unknown(tag) => {
                warn!("BLE: unknown custom tag {:#04x}", tag);
                return;
            }
        };
        out.notify
            .extend(self.session.send(FrameType::Data, data::CUSTOM, &payload));
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
