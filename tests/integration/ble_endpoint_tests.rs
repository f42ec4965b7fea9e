//! BluFi endpoint wired to a real coordinator over the mocks.

use std::net::Ipv4Addr;

use wifiprov::adapters::ble::BleEndpoint;
use wifiprov::app::coordinator::StateId;
use wifiprov::app::intake::Origin;
use wifiprov::app::status::ScanEntry;
use wifiprov::blufi::ReportState;
use wifiprov::blufi::frame::{FrameType, HEADER_LEN, type_byte};
use wifiprov::blufi::protocol::{ctrl, custom, data};
use wifiprov::config::ProvisioningConfig;

use crate::mock_hw::{TestCoordinator, coordinator, pump, record, seed, ssid};

/// Peer → device frame without checksum or encryption.
fn frame(frame_type: FrameType, subtype: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![type_byte(frame_type, subtype), 0, seq, payload.len() as u8];
    out.extend_from_slice(payload);
    out
}

fn endpoint() -> BleEndpoint {
    let mut ep = BleEndpoint::new(false);
    ep.on_connected();
    ep.on_mtu(512);
    ep
}

fn write(ep: &mut BleEndpoint, c: &mut TestCoordinator, raw: &[u8]) -> Vec<Vec<u8>> {
    ep.handle_write(raw, |req| c.handle_intake(Origin::Ble, req, 0))
        .notify
}

#[test]
fn custom_list_returns_saved_networks() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "p1"), record("B", "")]);
    let mut ep = endpoint();

    let out = write(
        &mut ep,
        &mut c,
        &frame(FrameType::Data, data::CUSTOM, 0, &[custom::LIST_SAVED]),
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0][0], type_byte(FrameType::Data, data::CUSTOM));
    assert_eq!(
        &out[0][HEADER_LEN..],
        &[0x01, 0x00, 2, 1, b'A', 2, b'p', b'1', 1, b'B', 0]
    );
}

#[test]
fn custom_forget_removes_by_index() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    let mut ep = endpoint();

    let out = write(
        &mut ep,
        &mut c,
        &frame(FrameType::Data, data::CUSTOM, 0, &[custom::FORGET_AT, 1]),
    );
    assert_eq!(&out[0][HEADER_LEN..], &[0x02, 0x00]);
    let left: Vec<_> = c.store().load_all().unwrap();
    assert_eq!(left, vec![record("A", "pa")]);

    let out = write(
        &mut ep,
        &mut c,
        &frame(FrameType::Data, data::CUSTOM, 1, &[custom::FORGET_AT, 9]),
    );
    assert_eq!(&out[0][HEADER_LEN..], &[0x02, 0x01]);
}

#[test]
fn credentials_and_connect_reach_the_radio() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let mut ep = endpoint();

    write(&mut ep, &mut c, &frame(FrameType::Data, data::STA_SSID, 0, b"Home"));
    write(&mut ep, &mut c, &frame(FrameType::Data, data::STA_PASSWD, 1, b"pass1234"));
    let out = write(&mut ep, &mut c, &frame(FrameType::Control, ctrl::CONNECT_WIFI, 2, &[]));
    assert!(out.is_empty());
    assert_eq!(c.state().id(), StateId::Connecting);
    assert_eq!(c.radio().connects(), vec!["Home"]);

    c.radio_mut().succeed(Ipv4Addr::new(192, 168, 1, 42));
    pump(&mut c, 1);

    let out = write(&mut ep, &mut c, &frame(FrameType::Control, ctrl::GET_WIFI_STATUS, 3, &[]));
    let mut expected = vec![3, ReportState::Success as u8, 0, 0x02, 4];
    expected.extend_from_slice(b"Home");
    assert_eq!(&out[0][HEADER_LEN..], expected.as_slice());
    assert_eq!(c.store().load_all().unwrap(), vec![record("Home", "pass1234")]);
}

#[test]
fn disconnect_request_drops_the_link() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa")]);
    c.step(0);
    c.radio_mut().succeed(Ipv4Addr::new(10, 0, 0, 2));
    pump(&mut c, 1);
    let mut ep = endpoint();

    write(&mut ep, &mut c, &frame(FrameType::Control, ctrl::DISCONNECT_WIFI, 0, &[]));
    assert_eq!(c.state().id(), StateId::Idle);
    c.step(100);
    assert_eq!(c.state().id(), StateId::Idle);
}

#[test]
fn ap_list_carries_scan_results() {
    let mut c = coordinator(&ProvisioningConfig::default());
    c.radio_mut().scan_result = vec![ScanEntry {
        ssid: ssid("Cafe"),
        rssi: -61,
    }];
    let mut ep = endpoint();

    let out = write(&mut ep, &mut c, &frame(FrameType::Control, ctrl::GET_WIFI_LIST, 0, &[]));
    assert_eq!(out[0][0], type_byte(FrameType::Data, data::WIFI_LIST));
    assert_eq!(&out[0][HEADER_LEN..], &[5, (-61i8) as u8, b'C', b'a', b'f', b'e']);
}

#[test]
fn scan_failure_is_an_error_frame() {
    let mut c = coordinator(&ProvisioningConfig::default());
    c.radio_mut().fail_scan = true;
    let mut ep = endpoint();

    let out = write(&mut ep, &mut c, &frame(FrameType::Control, ctrl::GET_WIFI_LIST, 0, &[]));
    assert_eq!(out[0][0], type_byte(FrameType::Data, data::ERROR));
    assert_eq!(&out[0][HEADER_LEN..], &[0x0b]);
}
