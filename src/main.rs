//! wifiprov: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  NvsAdapter      WifiRadio     LogEventSink   Esp32TimeAdapter │
//! │  (Storage+Cfg)   (RadioPort)   (EventSink)    (ClockPort)      │
//! │  EspHttpServer ──▶ IntakeMailbox      BleAdapter (BluFi GATT)  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │         ProvisioningService ─▶ Coordinator             │    │
//! │  │         CredentialStore · ScanCache · BleEndpoint      │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use log::{error, info, warn};

use wifiprov::adapters::ble::BleAdapter;
use wifiprov::adapters::http::start_server;
use wifiprov::adapters::log_sink::LogEventSink;
use wifiprov::adapters::nvs::NvsAdapter;
use wifiprov::adapters::time::Esp32TimeAdapter;
use wifiprov::adapters::wifi::WifiRadio;
use wifiprov::app::coordinator::Coordinator;
use wifiprov::app::intake::IntakeMailbox;
use wifiprov::app::ports::{ConfigPort, RadioPort, StoragePort};
use wifiprov::app::service::{BleLink, POLL_INTERVAL_MS, ProvisioningService};
use wifiprov::config::ProvisioningConfig;
use wifiprov::store::credentials::CredentialStore;

/// HTTP workers post here; the coordinator loop drains it.
static MAILBOX: IntakeMailbox = IntakeMailbox::new();

fn mount_spiffs() -> Result<()> {
    use esp_idf_svc::sys::{esp, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register};

    // Must match `adapters::http::ASSET_ROOT`.
    let conf = esp_vfs_spiffs_conf_t {
        base_path: c"/spiffs".as_ptr(),
        partition_label: core::ptr::null(),
        max_files: 5,
        format_if_mount_failed: false,
    };
    esp!(unsafe { esp_vfs_spiffs_register(&conf) })?;
    info!("SPIFFS mounted at /spiffs");
    Ok(())
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  wifiprov v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. NVS (erase-once) + config ──────────────────────────
    let mut nvs = NvsAdapter::new();
    if let Err(e) = nvs.init() {
        warn!("NVS init failed ({}), running with defaults and no persistence", e);
    }
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            ProvisioningConfig::default()
        }
    };

    // ── 3. Radio: STA + soft-AP with static address ───────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let mut radio = WifiRadio::new(peripherals.modem, sysloop);
    radio.init(true, Some(&config.ap))?;
    info!(
        "Soft-AP '{}' up at {} (channel {})",
        config.ap.ssid,
        config.ap.ip_addr(),
        config.ap.channel
    );

    // ── 4. Static assets + HTTP endpoint ──────────────────────
    if let Err(e) = mount_spiffs() {
        warn!("SPIFFS mount failed ({}), pages will return 500", e);
    }
    let _server = start_server(config.http_port, &MAILBOX)?;

    // ── 5. BLE BluFi endpoint ─────────────────────────────────
    let ble = if config.enable_ble {
        let mut adapter = BleAdapter::new(config.ble_device_name.clone());
        match adapter.start() {
            Ok(()) => Some(BleLink::new(adapter, config.enable_blufi_security)),
            Err(e) => {
                error!("BLE start failed ({}), continuing with HTTP only", e);
                None
            }
        }
    } else {
        info!("BLE disabled by config");
        None
    };

    // ── 6. Coordinator loop ───────────────────────────────────
    let store = CredentialStore::new(nvs, config.max_saved());
    let mut coordinator = Coordinator::new(store, radio, LogEventSink::new(), &config);
    if let Err(e) = coordinator.start() {
        error!("Credential store unavailable ({}), saved networks disabled", e);
    }

    let mut service =
        ProvisioningService::new(coordinator, &MAILBOX, Esp32TimeAdapter::new(), ble, &config);

    info!("Entering provisioning loop ({} ms poll)", POLL_INTERVAL_MS);
    loop {
        service.poll();
        FreeRtos::delay_ms(POLL_INTERVAL_MS);
    }
}
