//! Protocol layering through the session: phase-driven opens, gating, and
//! teardown.

use std::{fs, os::unix::fs::PermissionsExt, rc::Rc};

use bytes::Bytes;
use linkd_core::{ExitCode, LinkConfig, NotifyKind, Phase, ProtocolAction};
use linkd_daemon::{Config, StaticLinkControl};
use linkd_harness::{
    CallLog, SimCall, SimProtocol,
    scenario::{Scenario, oracle},
};
use linkd_proto::{
    Frame,
    protocols::{IPCP, PAP},
};
use nix::sys::signal::Signal;
use serial_test::serial;

fn calls_for(log: &CallLog, protocol: u16) -> Vec<SimCall> {
    log.borrow().iter().filter(|(number, _)| *number == protocol).map(|(_, call)| call.clone()).collect()
}

#[test]
#[serial]
fn network_up_enters_running_and_resets_failures() {
    let log = CallLog::default();
    let ipcp = SimProtocol::new(IPCP, "IPCP", &log).on_open(vec![ProtocolAction::NetworkUp]);
    let calls = Rc::clone(&log);

    let result = Scenario::new("network up")
        .network_control(ipcp)
        .raise(1, Signal::SIGHUP)
        .iterations(5)
        .oracle(oracle::all_of(vec![
            oracle::visited(Phase::Running),
            oracle::exit_code(ExitCode::UserRequest),
            Box::new(move |world| {
                assert_eq!(world.unsuccessful_attempts(), 0);
                assert_eq!(calls_for(&calls, IPCP), vec![
                    SimCall::LowerUp,
                    SimCall::Open,
                    SimCall::LowerDown,
                    SimCall::Close("LCP down".into()),
                ]);
                assert_eq!(world.notifications(NotifyKind::LinkDown).len(), 1);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn network_traffic_waits_for_network_phase() {
    let log = CallLog::default();
    let pap = SimProtocol::new(PAP, "PAP", &log);
    let ipcp = SimProtocol::new(IPCP, "IPCP", &log);
    let calls = Rc::clone(&log);

    let result = Scenario::new("authentication gate")
        .link_control(StaticLinkControl::new(LinkConfig::default()).with_authentication())
        .authentication(pap)
        .network_control(ipcp)
        .peer_frame(0, Frame::new(IPCP, Bytes::from_static(&[1, 1, 0, 4])))
        .peer_frame(1, Frame::new(PAP, Bytes::from_static(&[1, 1, 0, 4])))
        .iterations(3)
        .oracle(Box::new(move |world| {
            assert_eq!(world.phase_before_shutdown(), Phase::Authenticate);
            assert!(world.protocol_rejects().is_empty(), "gated frames are dropped, not rejected");

            let pap_calls = calls_for(&calls, PAP);
            assert!(pap_calls.contains(&SimCall::Open));
            assert!(pap_calls.contains(&SimCall::Input(vec![1, 1, 0, 4])));

            let ipcp_calls = calls_for(&calls, IPCP);
            assert!(ipcp_calls.iter().all(|call| !matches!(call, SimCall::Input(_))));
            assert!(!ipcp_calls.contains(&SimCall::Open));
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn protocol_timeouts_fire_in_virtual_time() {
    let log = CallLog::default();
    let ipcp = SimProtocol::new(IPCP, "IPCP", &log)
        .on_open(vec![ProtocolAction::ScheduleTimeout { token: 3, delay: std::time::Duration::from_secs(2) }]);
    let calls = Rc::clone(&log);

    let result = Scenario::new("protocol timeout")
        .network_control(ipcp)
        .iterations(2)
        .oracle(Box::new(move |world| {
            assert!(calls_for(&calls, IPCP).contains(&SimCall::Timeout(3)));
            assert!(world.elapsed() >= std::time::Duration::from_secs(2));
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn init_script_receives_interface_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("args");
    let script = dir.path().join("net-init");
    fs::write(&script, format!("#!/bin/sh\nprintf '%s|%s|%s|%s\\n' \"$1\" \"$2\" \"$3\" \"$4\" > {}\n", out.display()))
        .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let config = Config {
        net_init: Some(script),
        net_pre_up: None,
        net_down: None,
        baud_rate: 115_200,
        ipparam: Some("office".into()),
        ..Config::default()
    };
    let result = Scenario::new("init script")
        .config(config)
        .iterations(1)
        .oracle(Box::new(move |world| {
            let args = fs::read_to_string(&out).map_err(|e| e.to_string())?;
            assert_eq!(args.trim_end(), "ppp0|sim0|115200|office");
            assert!(!world.notifications(NotifyKind::Fork).is_empty());
            assert_eq!(world.script_env().get("IFNAME"), Some("ppp0"));
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}
