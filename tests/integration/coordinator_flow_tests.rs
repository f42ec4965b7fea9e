//! Coordinator scenarios driven through the mock radio and store.
//!
//! Each test scripts the radio's events in the exact order the driver
//! would deliver them and checks the saved list and status view.

use std::net::Ipv4Addr;

use wifiprov::app::coordinator::StateId;
use wifiprov::app::events::ProvisioningEvent;
use wifiprov::app::intake::{IntakeReply, IntakeRequest, Origin};
use wifiprov::app::ports::RadioPort;
use wifiprov::app::status::{ConnState, ScanEntry, WifiMode};
use wifiprov::config::ProvisioningConfig;
use wifiprov::error::Error;
use wifiprov::store::credentials::{STORE_KEY, STORE_NAMESPACE};
use wifiprov::store::record::RECORD_SIZE;

use crate::mock_hw::{
    MockNvs, RadioCall, coordinator, coordinator_with, pump, record, secret, seed, ssid,
};

const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);

fn config_with_retries(n: u8) -> ProvisioningConfig {
    ProvisioningConfig {
        max_retry_per_ap: n,
        ..ProvisioningConfig::default()
    }
}

fn saved_ssids(c: &crate::mock_hw::TestCoordinator) -> Vec<String> {
    c.store()
        .load_all()
        .unwrap()
        .iter()
        .map(|r| r.ssid.to_string())
        .collect()
}

// ── Cold boot ─────────────────────────────────────────────────

#[test]
fn cold_boot_with_empty_store_stays_idle() {
    let mut c = coordinator(&ProvisioningConfig::default());
    c.step(0);
    c.step(1_000);
    assert_eq!(c.state().id(), StateId::Idle);
    assert!(c.radio().connects().is_empty());

    let status = c.status();
    assert_eq!(status.state, ConnState::Idle);
    assert_eq!(status.mode, WifiMode::ApSta);
    assert_eq!(status.ssid, None);
    assert_eq!(
        c.handle_intake(Origin::Http, IntakeRequest::ListSaved, 0),
        Ok(IntakeReply::Saved(Vec::new()))
    );
}

#[test]
fn first_tick_connects_to_head() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    c.step(0);
    assert_eq!(c.state().id(), StateId::Connecting);
    assert_eq!(c.radio().connects(), vec!["A"]);
}

// ── Explicit connect ──────────────────────────────────────────

#[test]
fn explicit_connect_then_success_persists_record() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let reply = c.handle_intake(
        Origin::Http,
        IntakeRequest::ConnectExplicit {
            ssid: ssid("Home"),
            secret: Some(secret("pass1234")),
        },
        0,
    );
    assert_eq!(reply, Ok(IntakeReply::Ack));
    assert_eq!(c.status().state, ConnState::Connecting);

    c.radio_mut().succeed(IP);
    pump(&mut c, 10);

    assert_eq!(c.state().id(), StateId::Online);
    let list = c.store().load_all().unwrap();
    assert_eq!(list, vec![record("Home", "pass1234")]);

    let status = c.status();
    assert!(status.connected());
    assert_eq!(status.ssid, Some(ssid("Home")));
    assert_eq!(status.ip, Some(IP));
    assert_eq!(status.rssi, -55);
}

#[test]
fn explicit_failure_returns_to_idle_without_advancing_cursor() {
    let mut c = coordinator(&config_with_retries(3));
    seed(&mut c, &[record("A", "pa")]);
    c.handle_intake(
        Origin::Ble,
        IntakeRequest::ConnectExplicit {
            ssid: ssid("Nope"),
            secret: None,
        },
        0,
    )
    .unwrap();
    c.radio_mut().fail(201);
    pump(&mut c, 1);

    assert_eq!(c.state().id(), StateId::Idle);
    assert_eq!(c.cursor(), 0);
    // Only one attempt for an explicit target.
    assert_eq!(c.radio().connects(), vec!["Nope"]);
    // Nothing persisted for the failed network.
    assert_eq!(saved_ssids(&c), vec!["A"]);
}

#[test]
fn explicit_connect_cancels_in_flight_attempt() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa")]);
    c.step(0);
    assert!(c.radio().is_connecting());

    c.handle_intake(
        Origin::Http,
        IntakeRequest::ConnectExplicit {
            ssid: ssid("B"),
            secret: Some(secret("pb123456")),
        },
        5,
    )
    .unwrap();

    let calls = &c.radio().calls;
    let n = calls.len();
    assert_eq!(calls[n - 2], RadioCall::Disconnect);
    assert!(matches!(&calls[n - 1], RadioCall::Connect { ssid, .. } if ssid == "B"));
    assert_eq!(c.radio().max_outstanding, 1);
}

#[test]
fn empty_ssid_is_rejected() {
    let mut c = coordinator(&ProvisioningConfig::default());
    let reply = c.handle_intake(
        Origin::Http,
        IntakeRequest::ConnectExplicit {
            ssid: ssid(""),
            secret: None,
        },
        0,
    );
    assert!(matches!(reply, Err(Error::InvalidArg(_))));
    assert!(c.radio().connects().is_empty());
}

// ── Rounds ────────────────────────────────────────────────────

#[test]
fn two_saved_first_offline_promotes_second() {
    let mut c = coordinator(&config_with_retries(2));
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);

    c.step(0);
    c.radio_mut().fail(201);
    pump(&mut c, 1);
    c.radio_mut().fail(201);
    pump(&mut c, 2);
    assert_eq!(c.cursor(), 1);

    c.radio_mut().succeed(IP);
    pump(&mut c, 3);

    assert_eq!(c.radio().connects(), vec!["A", "A", "B"]);
    assert_eq!(c.state().id(), StateId::Online);
    assert_eq!(saved_ssids(&c), vec!["B", "A"]);
    assert_eq!(c.cursor(), 0);
}

#[test]
fn exhausted_round_waits_for_interval() {
    let config = ProvisioningConfig {
        max_retry_per_ap: 1,
        reconnect_interval_ms: 5_000,
        ..ProvisioningConfig::default()
    };
    let mut c = coordinator(&config);
    seed(&mut c, &[record("A", "pa")]);

    c.step(0);
    c.radio_mut().fail(201);
    pump(&mut c, 100);
    assert_eq!(c.state().id(), StateId::RoundFailed);
    assert!(
        c.sink()
            .events
            .iter()
            .any(|e| matches!(e, ProvisioningEvent::RoundFailed { tried: 1 }))
    );

    c.step(4_000);
    assert_eq!(c.state().id(), StateId::RoundFailed);
    c.step(5_100);
    assert_eq!(c.state().id(), StateId::Idle);
    c.step(6_100);
    assert_eq!(c.state().id(), StateId::Connecting);
    assert_eq!(c.radio().connects(), vec!["A", "A"]);
}

#[test]
fn negative_interval_disables_auto_retry() {
    let config = ProvisioningConfig {
        max_retry_per_ap: 1,
        reconnect_interval_ms: -1,
        ..ProvisioningConfig::default()
    };
    let mut c = coordinator(&config);
    seed(&mut c, &[record("A", "pa")]);
    c.step(0);
    c.radio_mut().fail(201);
    pump(&mut c, 1);
    c.step(1_000_000);
    assert_eq!(c.state().id(), StateId::RoundFailed);

    // An external request still works.
    c.handle_intake(
        Origin::Http,
        IntakeRequest::ConnectExplicit {
            ssid: ssid("A"),
            secret: Some(secret("pa")),
        },
        1_000_001,
    )
    .unwrap();
    assert_eq!(c.state().id(), StateId::Connecting);
}

#[test]
fn lost_link_restarts_round_from_head() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    c.step(0);
    c.radio_mut().succeed(IP);
    pump(&mut c, 1);
    assert_eq!(c.state().id(), StateId::Online);

    c.radio_mut().lose_link(8);
    pump(&mut c, 2);
    assert_eq!(c.state().id(), StateId::Idle);
    assert_eq!(c.cursor(), 0);
    c.step(3);
    assert_eq!(c.radio().connects(), vec!["A", "A"]);
}

#[test]
fn promotion_uses_driver_sta_config() {
    let mut c = coordinator(&ProvisioningConfig::default());
    c.handle_intake(
        Origin::Http,
        IntakeRequest::ConnectExplicit {
            ssid: ssid("home"),
            secret: Some(secret("pass1234")),
        },
        0,
    )
    .unwrap();
    c.radio_mut().override_sta(record("Home", "pass1234"));
    c.radio_mut().succeed(IP);
    pump(&mut c, 1);
    assert_eq!(saved_ssids(&c), vec!["Home"]);
}

// ── Saved-list intake ─────────────────────────────────────────

#[test]
fn forget_current_head_then_loss_picks_next() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    c.step(0);
    c.radio_mut().succeed(IP);
    pump(&mut c, 1);

    c.handle_intake(Origin::Http, IntakeRequest::Forget { ssid: ssid("A") }, 2)
        .unwrap();
    assert_eq!(saved_ssids(&c), vec!["B"]);

    c.radio_mut().lose_link(8);
    pump(&mut c, 3);
    c.step(4);
    assert_eq!(c.radio().connects().last().map(String::as_str), Some("B"));
}

#[test]
fn forget_unknown_ssid_is_acknowledged() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa")]);
    assert_eq!(
        c.handle_intake(Origin::Http, IntakeRequest::Forget { ssid: ssid("Z") }, 0),
        Ok(IntakeReply::Ack)
    );
    assert_eq!(saved_ssids(&c), vec!["A"]);
}

#[test]
fn forget_at_out_of_range_fails() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa")]);
    assert!(
        c.handle_intake(Origin::Ble, IntakeRequest::ForgetAt { index: 3 }, 0)
            .is_err()
    );
    assert_eq!(
        c.handle_intake(Origin::Ble, IntakeRequest::ForgetAt { index: 0 }, 0),
        Ok(IntakeReply::Ack)
    );
    assert!(saved_ssids(&c).is_empty());
}

#[test]
fn connect_saved_promotes_and_reconnects() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    c.step(0);
    c.radio_mut().succeed(IP);
    pump(&mut c, 1);

    assert_eq!(
        c.handle_intake(Origin::Http, IntakeRequest::ConnectSaved { ssid: ssid("B") }, 2),
        Ok(IntakeReply::Ack)
    );
    assert_eq!(saved_ssids(&c), vec!["B", "A"]);
    assert_eq!(c.radio().calls.last(), Some(&RadioCall::Disconnect));
    assert_eq!(c.state().id(), StateId::Idle);

    c.step(3);
    assert_eq!(c.radio().connects().last().map(String::as_str), Some("B"));
}

#[test]
fn connect_saved_unknown_is_not_found() {
    let mut c = coordinator(&ProvisioningConfig::default());
    assert_eq!(
        c.handle_intake(Origin::Http, IntakeRequest::ConnectSaved { ssid: ssid("X") }, 0),
        Err(Error::NotFound)
    );
}

#[test]
fn disconnect_holds_auto_connect() {
    let config = ProvisioningConfig {
        reconnect_interval_ms: 10_000,
        ..ProvisioningConfig::default()
    };
    let mut c = coordinator(&config);
    seed(&mut c, &[record("A", "pa")]);
    c.step(0);
    c.radio_mut().succeed(IP);
    pump(&mut c, 1);

    c.handle_intake(Origin::Ble, IntakeRequest::Disconnect, 1_000)
        .unwrap();
    assert_eq!(c.state().id(), StateId::Idle);
    c.step(2_000);
    assert_eq!(c.state().id(), StateId::Idle);
    c.step(11_000);
    assert_eq!(c.state().id(), StateId::Connecting);
}

#[test]
fn save_wifi_count_one_keeps_only_latest() {
    let config = ProvisioningConfig {
        save_wifi_count: 1,
        ..ProvisioningConfig::default()
    };
    let mut c = coordinator(&config);
    for (i, name) in ["A", "B"].iter().enumerate() {
        c.handle_intake(
            Origin::Http,
            IntakeRequest::ConnectExplicit {
                ssid: ssid(name),
                secret: Some(secret("pw")),
            },
            i as u64,
        )
        .unwrap();
        c.radio_mut().succeed(IP);
        pump(&mut c, i as u64);
    }
    assert_eq!(saved_ssids(&c), vec!["B"]);
}

#[test]
fn reconnecting_same_ssid_keeps_one_record() {
    let mut c = coordinator(&ProvisioningConfig::default());
    for t in 0..2u64 {
        c.handle_intake(
            Origin::Http,
            IntakeRequest::ConnectExplicit {
                ssid: ssid("Home"),
                secret: Some(secret("pass1234")),
            },
            t * 10,
        )
        .unwrap();
        c.radio_mut().succeed(IP);
        pump(&mut c, t * 10 + 1);
        c.handle_intake(Origin::Http, IntakeRequest::Disconnect, t * 10 + 2)
            .unwrap();
    }
    assert_eq!(saved_ssids(&c), vec!["Home"]);
}

// ── Scan ──────────────────────────────────────────────────────

#[test]
fn scan_during_connect_is_deferred() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa")]);
    c.radio_mut().scan_result = vec![ScanEntry {
        ssid: ssid("Visible"),
        rssi: -40,
    }];
    c.step(0);

    let reply = c.handle_intake(Origin::Http, IntakeRequest::Scan, 1).unwrap();
    let IntakeReply::Scan(snap) = reply else {
        panic!("expected a scan reply");
    };
    assert!(snap.entries.is_empty());
    assert!(!c.radio().calls.contains(&RadioCall::Scan));

    c.radio_mut().succeed(IP);
    pump(&mut c, 2);
    c.step(3);
    assert!(c.radio().calls.contains(&RadioCall::Scan));
    assert_eq!(c.scan_cache().latest().entries.len(), 1);
}

#[test]
fn scan_failure_is_reported() {
    let mut c = coordinator(&ProvisioningConfig::default());
    c.radio_mut().fail_scan = true;
    assert_eq!(
        c.handle_intake(Origin::Http, IntakeRequest::Scan, 0),
        Err(Error::RadioFailure(-1))
    );
}

// ── Store persistence ─────────────────────────────────────────

#[test]
fn corrupt_blob_is_erased_at_start() {
    let mut nvs = MockNvs::new();
    nvs.put_raw(STORE_NAMESPACE, STORE_KEY, &[0xAB; RECORD_SIZE + 3]);
    let c = coordinator_with(nvs, &ProvisioningConfig::default());
    assert!(c.store().load_all().unwrap().is_empty());
    assert!(c.store().storage().raw(STORE_NAMESPACE, STORE_KEY).is_none());
}

#[test]
fn commit_failure_still_goes_online() {
    let mut nvs = MockNvs::new();
    nvs.fail_writes = true;
    let mut c = coordinator_with(nvs, &ProvisioningConfig::default());
    c.handle_intake(
        Origin::Http,
        IntakeRequest::ConnectExplicit {
            ssid: ssid("Home"),
            secret: None,
        },
        0,
    )
    .unwrap();
    c.radio_mut().succeed(IP);
    pump(&mut c, 1);
    assert_eq!(c.state().id(), StateId::Online);
    assert!(
        c.sink()
            .events
            .iter()
            .any(|e| matches!(e, ProvisioningEvent::CommitFailed { .. }))
    );
}

#[test]
fn repeated_init_and_promotion_are_idempotent() {
    let mut c = coordinator(&ProvisioningConfig::default());
    seed(&mut c, &[record("A", "pa"), record("B", "pb")]);
    let blob = c.store().storage().raw(STORE_NAMESPACE, STORE_KEY).cloned();
    let writes = c.store().storage().writes;

    c.store_mut().init().unwrap();
    c.store_mut().init().unwrap();
    assert_eq!(c.store().storage().inits, 1);

    c.store_mut().on_success(&record("A", "pa")).unwrap();
    c.store_mut().on_success(&record("A", "pa")).unwrap();
    assert_eq!(c.store().storage().raw(STORE_NAMESPACE, STORE_KEY).cloned(), blob);
    assert_eq!(c.store().storage().writes, writes + 2);
}
