//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one endpoint or the
//! coordinator against mock adapters.  All tests run on the host with no
//! real hardware required.

#![cfg(not(target_os = "espidf"))]

mod ble_endpoint_tests;
mod coordinator_flow_tests;
mod http_api_tests;
mod mock_hw;
