//! Fuzz target: BluFi peer writes
//!
//! Splits the input into GATT-sized writes and feeds them through a BLE
//! endpoint whose handler always acknowledges.  The endpoint must never
//! panic and must never queue a notification larger than the ATT payload.
//!
//! cargo fuzz run fuzz_blufi_frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use wifiprov::adapters::ble::BleEndpoint;
use wifiprov::app::intake::IntakeReply;

const ATT_PAYLOAD: usize = 20;

fuzz_target!(|data: &[u8]| {
    let mut endpoint = BleEndpoint::new(true);
    endpoint.on_connected();

    for write in data.chunks(ATT_PAYLOAD + 4) {
        let outcome = endpoint.handle_write(write, |_| Ok(IntakeReply::Ack));
        for frame in &outcome.notify {
            assert!(frame.len() <= ATT_PAYLOAD, "notification exceeds ATT payload");
        }
        if outcome.close_link {
            endpoint.on_disconnected();
            endpoint.on_connected();
        }
    }
});
