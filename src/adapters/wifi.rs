//! Wi-Fi radio facade.
//!
//! Implements [`RadioPort`], the hexagonal boundary between the
//! coordinator and the Wi-Fi stack.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspWifi` for the driver lifecycle, raw
//!   `esp_event_handler_register` for STA/IP events, raw netif calls for the
//!   soft-AP static address.
//! - **all other targets**: a simulated set of access points for host tests.
//!
//! ## Event disambiguation
//!
//! The native stack reports a single "STA disconnected" event.  The facade
//! turns it into one of three things:
//!
//! | `connecting` | self-initiated | reported as                 |
//! |--------------|----------------|-----------------------------|
//! | any          | yes            | nothing (swallowed)         |
//! | set          | no             | `StaConnectAttemptFailed`   |
//! | clear        | no             | `StaDisassociated`          |

use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::app::ports::{RadioEvent, RadioPort};
use crate::app::status::{ScanEntry, WifiMode};
use crate::config::ApConfig;
use crate::error::{Error, Result};
use crate::store::record::{CredentialRecord, Secret, Ssid};

#[cfg(not(target_os = "espidf"))]
use std::collections::VecDeque;

#[cfg(target_os = "espidf")]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(target_os = "espidf")]
use embassy_sync::channel::Channel;
#[cfg(target_os = "espidf")]
use esp_idf_svc::eventloop::EspSystemEventLoop;
#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::modem::Modem;
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};

/// Reason codes the simulation reports.
#[cfg(not(target_os = "espidf"))]
const REASON_ASSOC_LEAVE: u16 = 8;
#[cfg(not(target_os = "espidf"))]
const REASON_NO_AP_FOUND: u16 = 201;
#[cfg(not(target_os = "espidf"))]
const REASON_HANDSHAKE_TIMEOUT: u16 = 15;

/// One scan at a time across the whole driver.
static SCAN_BUSY: AtomicBool = AtomicBool::new(false);

// ───────────────────────────────────────────────────────────────
// Native event bridge
// ───────────────────────────────────────────────────────────────

/// Events as the native stack reports them, before disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawEvent {
    Connected,
    Disconnected { reason: u16 },
    GotIp(Ipv4Addr),
}

/// Bridge from the ESP-IDF event task to the coordinator task.
#[cfg(target_os = "espidf")]
static RAW_EVENTS: Channel<CriticalSectionRawMutex, RawEvent, 16> = Channel::new();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn radio_event_handler(
    _arg: *mut core::ffi::c_void,
    base: esp_event_base_t,
    id: i32,
    data: *mut core::ffi::c_void,
) {
    // SAFETY: the event bases are link-time constants; `data` points to the
    // payload type documented for each event id.
    let ev = unsafe {
        if base == WIFI_EVENT {
            if id == wifi_event_t_WIFI_EVENT_STA_CONNECTED as i32 {
                Some(RawEvent::Connected)
            } else if id == wifi_event_t_WIFI_EVENT_STA_DISCONNECTED as i32 && !data.is_null() {
                let d = &*(data as *const wifi_event_sta_disconnected_t);
                Some(RawEvent::Disconnected {
                    reason: u16::from(d.reason),
                })
            } else {
                None
            }
        } else if base == IP_EVENT && id == ip_event_t_IP_EVENT_STA_GOT_IP as i32 && !data.is_null() {
            let d = &*(data as *const ip_event_got_ip_t);
            Some(RawEvent::GotIp(Ipv4Addr::from(d.ip_info.ip.addr.to_le_bytes())))
        } else {
            None
        }
    };
    if let Some(ev) = ev {
        if RAW_EVENTS.try_send(ev).is_err() {
            warn!("WiFi: event queue full, dropped {:?}", ev);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Link flags
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LinkFlags {
    /// A connect is outstanding.
    connecting: bool,
    associated: bool,
    /// The next disconnect event is our own.
    own_disconnect: bool,
}

impl LinkFlags {
    fn translate(&mut self, raw: RawEvent) -> Option<RadioEvent> {
        match raw {
            RawEvent::Connected => {
                self.connecting = false;
                self.associated = true;
                Some(RadioEvent::StaAssociated)
            }
            RawEvent::Disconnected { reason } => {
                self.associated = false;
                if self.own_disconnect {
                    self.own_disconnect = false;
                    info!("WiFi: self-initiated disconnect consumed (reason {})", reason);
                    return None;
                }
                if self.connecting {
                    self.connecting = false;
                    Some(RadioEvent::StaConnectAttemptFailed { reason })
                } else {
                    Some(RadioEvent::StaDisassociated { reason })
                }
            }
            RawEvent::GotIp(ip) => {
                self.connecting = false;
                self.associated = true;
                Some(RadioEvent::StaGotIp(ip))
            }
        }
    }

    /// Note an outgoing disconnect.  The stack only reports one if a link
    /// or an attempt existed.
    fn begin_disconnect(&mut self) -> bool {
        let expect_event = self.associated || self.connecting;
        self.own_disconnect = expect_event;
        self.connecting = false;
        self.associated = false;
        expect_event
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

/// An access point the host simulation can "see".
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone)]
pub struct SimNetwork {
    pub ssid: Ssid,
    pub secret: Option<Secret>,
    pub rssi: i8,
}

// ───────────────────────────────────────────────────────────────
// Radio adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiRadio {
    flags: LinkFlags,
    mode: WifiMode,
    initialised: bool,
    ap: Option<ApConfig>,

    #[cfg(target_os = "espidf")]
    modem: Option<Modem>,
    #[cfg(target_os = "espidf")]
    sysloop: EspSystemEventLoop,
    #[cfg(target_os = "espidf")]
    wifi: Option<EspWifi<'static>>,

    #[cfg(not(target_os = "espidf"))]
    sim_networks: Vec<SimNetwork>,
    #[cfg(not(target_os = "espidf"))]
    sim_queue: VecDeque<RawEvent>,
    #[cfg(not(target_os = "espidf"))]
    sim_sta: Option<CredentialRecord>,
    #[cfg(not(target_os = "espidf"))]
    sim_link: Option<(Ipv4Addr, i8)>,
}

impl WifiRadio {
    #[cfg(target_os = "espidf")]
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Self {
        Self {
            flags: LinkFlags::default(),
            mode: WifiMode::Null,
            initialised: false,
            ap: None,
            modem: Some(modem),
            sysloop,
            wifi: None,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            flags: LinkFlags::default(),
            mode: WifiMode::Null,
            initialised: false,
            ap: None,
            sim_networks: Vec::new(),
            sim_queue: VecDeque::new(),
            sim_sta: None,
            sim_link: None,
        }
    }

    /// Make an access point visible to the simulation.
    #[cfg(not(target_os = "espidf"))]
    pub fn add_sim_network(&mut self, network: SimNetwork) {
        self.sim_networks.push(network);
    }

    /// Drop the current association as if the AP went away.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_drop_link(&mut self, reason: u16) {
        self.sim_link = None;
        self.sim_queue.push_back(RawEvent::Disconnected { reason });
    }

    fn target_mode(&self, want_sta: bool) -> WifiMode {
        match (want_sta || self.mode.has_sta(), self.ap.is_some()) {
            (true, true) => WifiMode::ApSta,
            (true, false) => WifiMode::Sta,
            (false, true) => WifiMode::Ap,
            (false, false) => WifiMode::Null,
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn esp_err(e: EspError) -> Error {
        Error::RadioFailure(e.code())
    }

    #[cfg(target_os = "espidf")]
    fn client_conf(ssid: &Ssid, secret: Option<&Secret>) -> Result<ClientConfiguration> {
        let ssid_str = core::str::from_utf8(ssid.as_bytes())
            .map_err(|_| Error::InvalidArg("ssid is not UTF-8"))?;
        let pw_str = match secret {
            Some(s) => core::str::from_utf8(s.as_bytes())
                .map_err(|_| Error::InvalidArg("secret is not UTF-8"))?,
            None => "",
        };
        Ok(ClientConfiguration {
            ssid: ssid_str.try_into().map_err(|_| Error::InvalidArg("ssid too long"))?,
            password: pw_str.try_into().map_err(|_| Error::InvalidArg("secret too long"))?,
            auth_method: if pw_str.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        })
    }

    #[cfg(target_os = "espidf")]
    fn ap_conf(ap: &ApConfig) -> Result<AccessPointConfiguration> {
        Ok(AccessPointConfiguration {
            ssid: ap.ssid.as_str().try_into().map_err(|_| Error::InvalidArg("ap ssid"))?,
            password: ap
                .password
                .as_str()
                .try_into()
                .map_err(|_| Error::InvalidArg("ap password"))?,
            auth_method: if ap.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPAWPA2Personal
            },
            channel: ap.channel,
            max_connections: u16::from(ap.max_connections),
            ..Default::default()
        })
    }

    #[cfg(target_os = "espidf")]
    fn apply_configuration(&mut self, mode: WifiMode, sta: Option<ClientConfiguration>) -> Result<()> {
        let ap = self.ap.as_ref().map(Self::ap_conf).transpose()?;
        let wifi = self.wifi.as_mut().ok_or(Error::InvalidState("radio not initialised"))?;
        let sta = match sta {
            Some(c) => c,
            None => match wifi.get_configuration().map_err(Self::esp_err)? {
                Configuration::Client(c) | Configuration::Mixed(c, _) => c,
                _ => ClientConfiguration::default(),
            },
        };
        let conf = match (mode, ap) {
            (WifiMode::ApSta, Some(ap)) => Configuration::Mixed(sta, ap),
            (WifiMode::Ap, Some(ap)) => Configuration::AccessPoint(ap),
            _ => Configuration::Client(sta),
        };
        wifi.set_configuration(&conf).map_err(Self::esp_err)?;
        self.mode = mode;
        Ok(())
    }

    /// Stop the AP DHCP server, pin the address (/24), restart DHCP.
    #[cfg(target_os = "espidf")]
    fn set_ap_static_ip(&mut self, ip: Ipv4Addr) -> Result<()> {
        let wifi = self.wifi.as_ref().ok_or(Error::InvalidState("radio not initialised"))?;
        let handle = wifi.ap_netif().handle();
        let addr = |a: Ipv4Addr| esp_ip4_addr_t {
            addr: u32::from_le_bytes(a.octets()),
        };
        let info_ = esp_netif_ip_info_t {
            ip: addr(ip),
            gw: addr(ip),
            netmask: addr(Ipv4Addr::new(255, 255, 255, 0)),
        };
        // SAFETY: handle belongs to the live AP netif owned by `wifi`.
        unsafe {
            let ret = esp_netif_dhcps_stop(handle);
            if ret != ESP_OK && ret != ESP_ERR_ESP_NETIF_DHCP_ALREADY_STOPPED {
                return Err(Error::RadioFailure(ret));
            }
            esp!(esp_netif_set_ip_info(handle, &info_)).map_err(Self::esp_err)?;
            let ret = esp_netif_dhcps_start(handle);
            if ret != ESP_OK && ret != ESP_ERR_ESP_NETIF_DHCP_ALREADY_STARTED {
                return Err(Error::RadioFailure(ret));
            }
        }
        info!("WiFi: AP address {} /24", ip);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_init(&mut self, enable_sta: bool) -> Result<()> {
        let modem = self
            .modem
            .take()
            .ok_or(Error::InvalidState("modem already taken"))?;
        let wifi = EspWifi::new(modem, self.sysloop.clone(), None).map_err(Self::esp_err)?;
        self.wifi = Some(wifi);

        // SAFETY: handler is a plain function; the default loop exists
        // because `sysloop` was taken.
        unsafe {
            esp!(esp_event_handler_register(
                WIFI_EVENT,
                ESP_EVENT_ANY_ID,
                Some(radio_event_handler),
                core::ptr::null_mut(),
            ))
            .map_err(Self::esp_err)?;
            esp!(esp_event_handler_register(
                IP_EVENT,
                ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                Some(radio_event_handler),
                core::ptr::null_mut(),
            ))
            .map_err(Self::esp_err)?;
        }

        let mode = self.target_mode(enable_sta);
        self.apply_configuration(mode, None)?;
        if let Some(wifi) = self.wifi.as_mut() {
            wifi.start().map_err(Self::esp_err)?;
        }
        if let Some(ip) = self.ap.as_ref().map(ApConfig::ip_addr) {
            self.set_ap_static_ip(ip)?;
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_init(&mut self, enable_sta: bool) -> Result<()> {
        self.mode = self.target_mode(enable_sta);
        info!("WiFi(sim): {} AP(s) in range", self.sim_networks.len());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, ssid: &Ssid, secret: Option<&Secret>) -> Result<()> {
        let conf = Self::client_conf(ssid, secret)?;
        let mode = self.target_mode(true);
        self.apply_configuration(mode, Some(conf))?;
        let wifi = self.wifi.as_mut().ok_or(Error::InvalidState("radio not initialised"))?;
        wifi.connect().map_err(Self::esp_err)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, ssid: &Ssid, secret: Option<&Secret>) -> Result<()> {
        self.mode = self.target_mode(true);
        self.sim_sta = Some(match secret {
            Some(s) => CredentialRecord::new(ssid.clone(), s.clone()),
            None => CredentialRecord::open(ssid.clone()),
        });
        let found = self
            .sim_networks
            .iter()
            .enumerate()
            .find(|(_, n)| n.ssid.same_network(ssid));
        match found {
            None => self.sim_queue.push_back(RawEvent::Disconnected {
                reason: REASON_NO_AP_FOUND,
            }),
            Some((_, n)) if n.secret.as_ref().filter(|s| !s.is_empty()) != secret.filter(|s| !s.is_empty()) => {
                self.sim_queue.push_back(RawEvent::Disconnected {
                    reason: REASON_HANDSHAKE_TIMEOUT,
                });
            }
            Some((idx, n)) => {
                let ip = Ipv4Addr::new(192, 168, 1, 100 + (idx % 100) as u8);
                self.sim_link = Some((ip, n.rssi));
                self.sim_queue.push_back(RawEvent::Connected);
                self.sim_queue.push_back(RawEvent::GotIp(ip));
            }
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) -> Result<()> {
        let wifi = self.wifi.as_mut().ok_or(Error::InvalidState("radio not initialised"))?;
        wifi.disconnect().map_err(Self::esp_err)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self, expect_event: bool) {
        self.sim_link = None;
        if expect_event {
            self.sim_queue.push_back(RawEvent::Disconnected {
                reason: REASON_ASSOC_LEAVE,
            });
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_scan(&mut self) -> Result<Vec<ScanEntry>> {
        let wifi = self.wifi.as_mut().ok_or(Error::InvalidState("radio not initialised"))?;
        let aps = wifi.scan().map_err(Self::esp_err)?;
        Ok(aps
            .into_iter()
            .filter_map(|ap| {
                Some(ScanEntry {
                    ssid: Ssid::new(ap.ssid.as_bytes()).ok()?,
                    rssi: ap.signal_strength,
                })
            })
            .collect())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_scan(&mut self) -> Result<Vec<ScanEntry>> {
        Ok(self
            .sim_networks
            .iter()
            .map(|n| ScanEntry {
                ssid: n.ssid.clone(),
                rssi: n.rssi,
            })
            .collect())
    }

    #[cfg(target_os = "espidf")]
    fn platform_next_raw(&mut self) -> Option<RawEvent> {
        RAW_EVENTS.try_receive().ok()
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_next_raw(&mut self) -> Option<RawEvent> {
        self.sim_queue.pop_front()
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiRadio {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// RadioPort
// ───────────────────────────────────────────────────────────────

impl RadioPort for WifiRadio {
    fn init(&mut self, enable_sta: bool, ap: Option<&ApConfig>) -> Result<()> {
        if self.initialised {
            return Ok(());
        }
        self.ap = ap.cloned();
        self.platform_init(enable_sta)?;
        self.initialised = true;
        info!("WiFi: initialised (mode {})", self.mode.as_str());
        Ok(())
    }

    fn connect(&mut self, ssid: &Ssid, secret: Option<&Secret>) -> Result<()> {
        if !self.initialised {
            return Err(Error::InvalidState("radio not initialised"));
        }
        if ssid.is_empty() {
            return Err(Error::InvalidArg("empty ssid"));
        }
        if self.flags.associated {
            info!("WiFi: leaving current AP before connecting");
            self.disconnect()?;
        }
        self.platform_connect(ssid, secret)?;
        self.flags.connecting = true;
        info!(
            "WiFi: connecting to '{}' (secret {} bytes)",
            ssid,
            secret.map_or(0, Secret::len)
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if !self.initialised {
            return Err(Error::InvalidState("radio not initialised"));
        }
        // Anything still queued belongs to the link or attempt being torn
        // down.  It is not reported but still settles the link flags, so a
        // failure that already arrived is not waited for a second time.
        while let Some(raw) = self.platform_next_raw() {
            let _ = self.flags.translate(raw);
        }
        let expect_event = self.flags.begin_disconnect();

        #[cfg(target_os = "espidf")]
        {
            let _ = expect_event;
            self.platform_disconnect()?;
        }
        #[cfg(not(target_os = "espidf"))]
        self.platform_disconnect(expect_event);

        info!("WiFi: disconnect requested");
        Ok(())
    }

    fn scan_sync(&mut self, max_out: usize) -> Result<Vec<ScanEntry>> {
        if !self.initialised {
            return Err(Error::InvalidState("radio not initialised"));
        }
        if self.flags.connecting {
            return Err(Error::InvalidState("connect in progress"));
        }
        if SCAN_BUSY.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidState("scan in progress"));
        }
        let result = self.platform_scan();
        SCAN_BUSY.store(false, Ordering::Release);

        let mut entries = result?;
        entries.truncate(max_out);
        info!("WiFi: scan found {} AP(s)", entries.len());
        Ok(entries)
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        while let Some(raw) = self.platform_next_raw() {
            if let Some(ev) = self.flags.translate(raw) {
                return Some(ev);
            }
        }
        None
    }

    fn is_connecting(&self) -> bool {
        self.flags.connecting
    }

    #[cfg(target_os = "espidf")]
    fn current_sta_config(&self) -> Result<CredentialRecord> {
        let wifi = self.wifi.as_ref().ok_or(Error::InvalidState("radio not initialised"))?;
        match wifi.get_configuration().map_err(Self::esp_err)? {
            Configuration::Client(c) | Configuration::Mixed(c, _) => {
                let ssid = Ssid::new(c.ssid.as_bytes())?;
                Ok(if c.password.is_empty() {
                    CredentialRecord::open(ssid)
                } else {
                    CredentialRecord::new(ssid, Secret::new(c.password.as_bytes())?)
                })
            }
            _ => Err(Error::InvalidState("STA not configured")),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn current_sta_config(&self) -> Result<CredentialRecord> {
        self.sim_sta.clone().ok_or(Error::InvalidState("STA not configured"))
    }

    #[cfg(target_os = "espidf")]
    fn sta_rssi(&self) -> Option<i8> {
        let mut ap_info: wifi_ap_record_t = Default::default();
        // SAFETY: ap_info is a valid out-pointer for the duration of the call.
        let ret = unsafe { esp_wifi_sta_get_ap_info(&mut ap_info) };
        (ret == ESP_OK).then_some(ap_info.rssi)
    }

    #[cfg(not(target_os = "espidf"))]
    fn sta_rssi(&self) -> Option<i8> {
        self.sim_link.map(|(_, rssi)| rssi)
    }

    #[cfg(target_os = "espidf")]
    fn sta_ipv4(&self) -> Option<Ipv4Addr> {
        let wifi = self.wifi.as_ref()?;
        let info_ = wifi.sta_netif().get_ip_info().ok()?;
        (!info_.ip.is_unspecified()).then_some(info_.ip)
    }

    #[cfg(not(target_os = "espidf"))]
    fn sta_ipv4(&self) -> Option<Ipv4Addr> {
        self.sim_link.map(|(ip, _)| ip)
    }

    fn mode(&self) -> WifiMode {
        self.mode
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
