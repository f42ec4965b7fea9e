//! wifiprov library.
//!
//! Wi-Fi provisioning for ESP32: a saved-network store, a coordinator that
//! cycles through it, and two endpoints (BluFi over BLE, HTTP on the
//! soft-AP) that feed it requests.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; everything else runs
//! on the host for testing.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod blufi;
pub mod config;
pub mod error;
pub mod store;
