//! HTTP router driven end to end against a real coordinator.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::path::Path;

use wifiprov::adapters::http::{ASSET_ROOT, Body, HttpMethod, HttpResponse, route};
use wifiprov::app::status::ScanEntry;
use wifiprov::config::ProvisioningConfig;

use crate::mock_hw::{DirectApi, TestCoordinator, coordinator, pump, record, seed, ssid};

fn json(resp: &HttpResponse) -> serde_json::Value {
    match &resp.body {
        Body::Bytes(b) => serde_json::from_slice(b).unwrap(),
        Body::File(p) => panic!("expected JSON, got file {}", p.display()),
    }
}

fn api(c: &mut TestCoordinator) -> DirectApi<'_> {
    DirectApi {
        coordinator: RefCell::new(c),
        now_ms: 0,
    }
}

fn get(api: &DirectApi<'_>, uri: &str) -> HttpResponse {
    route(HttpMethod::Get, uri, api, Path::new(ASSET_ROOT))
}

fn post(api: &DirectApi<'_>, uri: &str) -> HttpResponse {
    route(HttpMethod::Post, uri, api, Path::new(ASSET_ROOT))
}

#[test]
fn cold_boot_status_and_saved() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let api = api(&mut c);

    let status = get(&api, "/api/wifi/status");
    assert_eq!(status.status, 200);
    assert_eq!(
        json(&status),
        serde_json::json!({
            "connected": false, "state": 0, "ssid": "-",
            "ip": "-", "rssi": 0, "mode": "AP+STA"
        })
    );

    let saved = get(&api, "/api/wifi/saved");
    assert_eq!(saved.body, Body::Bytes(br#"{"items":[]}"#.to_vec()));
}

#[test]
fn connect_via_form_then_status_reports_online() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let api = api(&mut c);

    let resp = post(&api, "/api/wifi/connect?ssid=Home&password=pass1234");
    assert_eq!(resp.status, 200);
    assert_eq!(json(&resp), serde_json::json!({"ok": true}));
    assert_eq!(json(&get(&api, "/api/wifi/status"))["state"], 1);

    {
        let mut c = api.coordinator.borrow_mut();
        c.radio_mut().succeed(Ipv4Addr::new(192, 168, 1, 42));
        pump(&mut **c, 5);
    }

    let v = json(&get(&api, "/api/wifi/status"));
    assert_eq!(v["connected"], true);
    assert_eq!(v["state"], 2);
    assert_eq!(v["ssid"], "Home");
    assert_eq!(v["ip"], "192.168.1.42");

    let saved = json(&get(&api, "/api/wifi/saved"));
    assert_eq!(saved, serde_json::json!({"items": [{"index": 0, "ssid": "Home"}]}));
}

#[test]
fn empty_ssid_is_rejected_before_the_coordinator() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let api = api(&mut c);
    assert_eq!(post(&api, "/api/wifi/connect?ssid=&password=x").status, 400);
    assert!(api.coordinator.borrow().radio().connects().is_empty());
}

#[test]
fn scan_returns_at_most_32_entries() {
    let mut c = coordinator(&ProvisioningConfig {
        scan_cap: 64,
        ..ProvisioningConfig::default()
    });
    c.radio_mut().scan_result = (0..50)
        .map(|i| ScanEntry {
            ssid: ssid(&format!("net{i:02}")),
            rssi: -30 - i as i8,
        })
        .collect();
    let api = api(&mut c);

    let v = json(&get(&api, "/api/wifi/scan"));
    let items = v["items"].as_array().unwrap();
    assert_eq!(items.len(), 32);
    assert_eq!(items[0], serde_json::json!({"index": 0, "ssid": "net00", "rssi": -30}));
    assert_eq!(items[31]["ssid"], "net31");
}

#[test]
fn empty_scan_is_well_formed() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let api = api(&mut c);
    let resp = get(&api, "/api/wifi/scan");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, Body::Bytes(br#"{"items":[]}"#.to_vec()));
}

#[test]
fn delete_removes_saved_entry() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    let api = api(&mut c);

    assert_eq!(post(&api, "/api/wifi/saved/delete?ssid=A").status, 200);
    let saved = json(&get(&api, "/api/wifi/saved"));
    assert_eq!(saved, serde_json::json!({"items": [{"index": 0, "ssid": "B"}]}));

    // Deleting an unknown network still acknowledges.
    assert_eq!(post(&api, "/api/wifi/saved/delete?ssid=Z").status, 200);
}

#[test]
fn saved_connect_unknown_is_500() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let api = api(&mut c);
    let resp = post(&api, "/api/wifi/saved/connect?ssid=Nope");
    assert_eq!(resp.status, 500);
    assert_eq!(json(&resp)["error"], "not found");
}

#[test]
fn saved_connect_promotes_entry() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    let api = api(&mut c);
    assert_eq!(post(&api, "/api/wifi/saved/connect?ssid=B").status, 200);
    let saved = json(&get(&api, "/api/wifi/saved"));
    assert_eq!(saved["items"][0]["ssid"], "B");
    assert_eq!(saved["items"][1]["ssid"], "A");
}

#[test]
fn url_encoded_credentials_reach_the_radio() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let api = api(&mut c);
    post(&api, "/api/wifi/connect?ssid=Caf%C3%A9+Guest&password=p%26ss%3Dword");
    let c = api.coordinator.borrow();
    assert_eq!(
        c.radio().calls.last(),
        Some(&crate::mock_hw::RadioCall::Connect {
            ssid: "Café Guest".to_string(),
            secret: Some("p&ss=word".to_string()),
        })
    );
}
