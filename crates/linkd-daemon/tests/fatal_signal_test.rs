//! Abnormal signals end the process, so each case re-runs this test binary
//! filtered to itself and inspects how the child exited.

use std::{
    cell::RefCell,
    env, fs,
    io::Write,
    os::unix::{net::UnixDatagram, process::ExitStatusExt},
    path::Path,
    process::Command,
    rc::Rc,
};

use linkd_core::{NotifyKind, Notifiers, ProtocolTable};
use linkd_daemon::{Config, DatagramChannel, Session, StaticLinkControl, SystemEnv};
use nix::sys::signal::{Signal, raise};
use serial_test::serial;

const MARKER_VAR: &str = "LINKD_FATAL_SIGNAL_MARKER";

/// Run `test` in a fresh copy of this binary with the marker path exported.
fn rerun(test: &str, marker: &Path) -> std::process::ExitStatus {
    Command::new(env::current_exe().unwrap())
        .args([test, "--exact", "--test-threads=1", "--nocapture"])
        .env(MARKER_VAR, marker)
        .status()
        .unwrap()
}

/// Build a session whose signal and exit notifiers append to the marker
/// file.
fn session_logging_to(marker: &Path) -> (Session<SystemEnv, DatagramChannel>, UnixDatagram) {
    let run_dir = marker.with_extension("run");
    fs::create_dir_all(&run_dir).unwrap();
    let config = Config { run_dir, net_init: None, net_pre_up: None, net_down: None, ..Config::default() };
    let (ours, theirs) = UnixDatagram::pair().unwrap();
    let channel = DatagramChannel::from_socket("test0", ours).unwrap();
    let protocols = ProtocolTable::builder().link_control(StaticLinkControl::default()).build().unwrap();

    let log = Rc::new(RefCell::new(fs::File::create(marker).unwrap()));
    let mut notifiers = Notifiers::new();
    for (kind, label) in [(NotifyKind::Signaled, "signaled"), (NotifyKind::Exit, "exit")] {
        let log = Rc::clone(&log);
        notifiers.subscribe(kind, move |value| {
            writeln!(log.borrow_mut(), "{label} {value}").unwrap();
        });
    }

    let session = Session::builder(config, SystemEnv::new(), channel, protocols).notifiers(notifiers).build().unwrap();
    (session, theirs)
}

#[test]
#[serial]
fn abnormal_signal_shuts_down_and_exits_127() {
    if let Some(marker) = env::var_os(MARKER_VAR) {
        let (mut session, _peer) = session_logging_to(Path::new(&marker));
        raise(Signal::SIGABRT).unwrap();
        session.handle_events();
        unreachable!("the event loop returned after a fatal signal");
    }

    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("events");
    let status = rerun("abnormal_signal_shuts_down_and_exits_127", &marker);

    assert_eq!(status.code(), Some(127), "child ended with {status:?}");
    let events = fs::read_to_string(&marker).unwrap();
    assert_eq!(events, format!("signaled {}\nexit 127\n", Signal::SIGABRT as i32));
}

#[test]
#[serial]
fn second_abnormal_signal_aborts() {
    if let Some(marker) = env::var_os(MARKER_VAR) {
        let (_session, _peer) = session_logging_to(Path::new(&marker));
        raise(Signal::SIGSEGV).unwrap();
        raise(Signal::SIGSEGV).unwrap();
        unreachable!("the repeat delivery returned");
    }

    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("events");
    let status = rerun("second_abnormal_signal_aborts", &marker);

    assert_eq!(status.signal(), Some(Signal::SIGABRT as i32), "child ended with {status:?}");
    assert_eq!(fs::read_to_string(&marker).unwrap(), "", "no orderly shutdown after the abort");
}
