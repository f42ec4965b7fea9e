//! Application core: provisioning logic with no direct I/O.
//!
//! The coordinator, intake and status views live here.  All interaction
//! with the radio, flash and clock happens through **port traits** defined
//! in [`ports`], keeping this layer testable without real peripherals.

pub mod coordinator;
pub mod events;
pub mod intake;
pub mod ports;
pub mod service;
pub mod status;
