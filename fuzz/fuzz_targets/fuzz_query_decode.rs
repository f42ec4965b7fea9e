//! Fuzz target: HTTP query parsing
//!
//! Any query string must split and percent-decode without panicking, and a
//! decoded `ssid` value must never be longer than its encoded form.
//!
//! cargo fuzz run fuzz_query_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use wifiprov::adapters::utils::{query_param, split_uri};

fuzz_target!(|data: &[u8]| {
    let Ok(uri) = std::str::from_utf8(data) else {
        return;
    };
    let (_, query) = split_uri(uri);
    if let Some(ssid) = query_param(query, "ssid") {
        assert!(ssid.len() <= query.len());
    }
    let _ = query_param(query, "password");
});
