//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements         | Connects to                  |
//! |------------|--------------------|------------------------------|
//! | `ble`      | BluFi link         | Bluedroid GATT server        |
//! | `http`     | ProvisioningApi (client) | ESP-IDF HTTP server    |
//! | `log_sink` | EventSink          | Serial log output            |
//! | `nvs`      | ConfigPort         | NVS / in-memory store        |
//! |            | StoragePort        |                              |
//! | `time`     | ClockPort          | ESP32 system timer           |
//! | `wifi`     | RadioPort          | ESP-IDF Wi-Fi STA + soft-AP  |

pub mod ble;
pub mod http;
pub mod log_sink;
pub mod nvs;
pub mod time;
pub mod utils;
pub mod wifi;
