//! End-to-end session scenarios over a simulated link.

use std::time::Duration;

use bytes::Bytes;
use linkd_core::{ExitCode, NotifyKind, Phase};
use linkd_daemon::Config;
use linkd_harness::scenario::{Scenario, oracle};
use linkd_proto::{ControlCode, Frame};
use nix::sys::signal::Signal;
use serial_test::serial;

fn quiet_config() -> Config {
    Config { net_init: None, net_pre_up: None, net_down: None, ..Config::default() }
}

#[test]
#[serial]
fn unsupported_protocol_is_rejected_without_phase_change() {
    let result = Scenario::new("unsupported protocol")
        .peer_frame(0, Frame::new(0x1234, Bytes::from_static(b"xyz")))
        .iterations(3)
        .oracle(Box::new(|world| {
            assert_eq!(world.protocol_rejects(), vec![0x1234]);
            assert_eq!(world.visits(Phase::Network), 1, "reject must not move the phase");
            assert_eq!(world.phase_before_shutdown(), Phase::Network);
            assert_eq!(world.exit_code(), ExitCode::Ok);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn terminate_signal_closes_link_and_exits() {
    let result = Scenario::new("terminate")
        .raise(1, Signal::SIGTERM)
        .iterations(10)
        .oracle(oracle::all_of(vec![
            oracle::exit_code(ExitCode::UserRequest),
            oracle::visited(Phase::Terminate),
            oracle::visited(Phase::Disconnect),
            oracle::never_visited(Phase::Holdoff),
            Box::new(|world| {
                let terminate = world
                    .link_control_packets()
                    .into_iter()
                    .find(|packet| packet.code() == Some(ControlCode::TerminateRequest))
                    .ok_or("no Terminate-Request sent")?;
                assert_eq!(terminate.data.as_ref(), b"User request");

                assert_eq!(world.notifications(NotifyKind::Signaled), vec![Signal::SIGTERM as i32]);
                assert_eq!(world.notifications(NotifyKind::Exit), vec![ExitCode::UserRequest.as_i32()]);
                assert_eq!(world.phase_before_shutdown(), Phase::Dead);
                assert_eq!(world.attempts(), 1);
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn persistent_session_holds_off_then_gives_up_after_maxfail() {
    let config = Config { persist: true, holdoff: Duration::from_secs(5), maxfail: 2, ..quiet_config() };

    let result = Scenario::new("persist with maxfail")
        .config(config)
        .peer_hangup(0)
        .peer_hangup(1)
        .iterations(10)
        .oracle(oracle::all_of(vec![
            oracle::exit_code(ExitCode::Hangup),
            Box::new(|world| {
                assert_eq!(world.unsuccessful_attempts(), 2);
                assert_eq!(world.attempts(), 2);
                assert_eq!(world.visits(Phase::Holdoff), 1);
                assert_eq!(world.elapsed(), Duration::from_secs(5));
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn hangup_signal_without_persist_reports_user_request() {
    let result = Scenario::new("sighup")
        .raise(0, Signal::SIGHUP)
        .iterations(5)
        .oracle(oracle::all_of(vec![
            oracle::exit_code(ExitCode::UserRequest),
            oracle::never_visited(Phase::Holdoff),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn seeded_random_traffic_is_rejected_in_order() {
    let result = Scenario::new("random traffic")
        .random_frames(0x5eed, 0, 16)
        .iterations(20)
        .oracle(Box::new(|world| {
            assert_eq!(world.protocol_rejects().len(), 16);
            assert_eq!(world.phase_before_shutdown(), Phase::Network);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}

#[test]
#[serial]
fn short_packets_are_ignored() {
    let result = Scenario::new("short packet")
        .peer_raw(0, vec![0xff, 0x03])
        .iterations(3)
        .oracle(Box::new(|world| {
            assert!(world.protocol_rejects().is_empty());
            assert_eq!(world.phase_before_shutdown(), Phase::Network);
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {:?}", result);
}
