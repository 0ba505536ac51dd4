//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern.

use std::{cell::RefCell, io, path::Path, rc::Rc};

use bytes::Bytes;
use linkd_core::{Notifiers, NotifyKind, Phase, Protocol, ProtocolTable, ProtocolTableBuilder};
use linkd_daemon::{Config, Session, StaticLinkControl, config::DEFAULT_RUN_DIR};
use linkd_proto::{Frame, protocols::LCP};
use nix::sys::signal::{Signal, raise};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    SimEnv, SimPeer, sim_link,
    scenario::{OracleFn, World},
};

/// Iterations run when no budget is given.
const DEFAULT_BUDGET: usize = 64;

#[derive(Debug, Clone)]
enum PeerEvent {
    Frame(Frame),
    Raw(Vec<u8>),
    Hangup,
    Raise(Signal),
}

/// Scenario builder.
///
/// Must call `.oracle()` to get a [`RunnableScenario`] that can be
/// executed.
pub struct Scenario {
    name: String,
    config: Config,
    table: ProtocolTableBuilder,
    events: Vec<(usize, PeerEvent)>,
    budget: usize,
}

impl Scenario {
    /// Create a scenario with default options, static link control, and no
    /// hook scripts.
    pub fn new(name: impl Into<String>) -> Self {
        let config = Config { net_init: None, net_pre_up: None, net_down: None, ..Config::default() };
        Self {
            name: name.into(),
            config,
            table: ProtocolTable::builder().link_control(StaticLinkControl::default()),
            events: Vec::new(),
            budget: DEFAULT_BUDGET,
        }
    }

    /// Replace the session configuration.
    ///
    /// Unless `run_dir` is changed from the default, pid files go to a
    /// scratch directory.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replace the link-control protocol.
    pub fn link_control(mut self, protocol: impl Protocol + 'static) -> Self {
        self.table = self.table.link_control(protocol);
        self
    }

    /// Add an authentication protocol.
    pub fn authentication(mut self, protocol: impl Protocol + 'static) -> Self {
        self.table = self.table.authentication(protocol);
        self
    }

    /// Add a network-control protocol.
    pub fn network_control(mut self, protocol: impl Protocol + 'static) -> Self {
        self.table = self.table.network_control(protocol);
        self
    }

    /// Add a compression-control protocol.
    pub fn compression_control(mut self, protocol: impl Protocol + 'static) -> Self {
        self.table = self.table.compression_control(protocol);
        self
    }

    /// Peer sends `frame` before loop iteration `iteration`.
    pub fn peer_frame(mut self, iteration: usize, frame: Frame) -> Self {
        self.events.push((iteration, PeerEvent::Frame(frame)));
        self
    }

    /// Peer sends raw bytes before loop iteration `iteration`.
    pub fn peer_raw(mut self, iteration: usize, bytes: impl Into<Vec<u8>>) -> Self {
        self.events.push((iteration, PeerEvent::Raw(bytes.into())));
        self
    }

    /// Peer hangs up before loop iteration `iteration`.
    pub fn peer_hangup(mut self, iteration: usize) -> Self {
        self.events.push((iteration, PeerEvent::Hangup));
        self
    }

    /// Raise `signal` in this process before loop iteration `iteration`.
    pub fn raise(mut self, iteration: usize, signal: Signal) -> Self {
        self.events.push((iteration, PeerEvent::Raise(signal)));
        self
    }

    /// Peer sends `count` frames with random protocol numbers, one per
    /// iteration from `start`. Link-control frames are never generated.
    pub fn random_frames(mut self, seed: u64, start: usize, count: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for offset in 0..count {
            let protocol = loop {
                let candidate: u16 = rng.r#gen();
                if candidate != LCP {
                    break candidate;
                }
            };
            let len = rng.gen_range(0..16);
            let payload: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            self.events.push((start + offset, PeerEvent::Frame(Frame::new(protocol, Bytes::from(payload)))));
        }
        self
    }

    /// Stop after this many loop iterations even if the session is still
    /// up.
    pub fn iterations(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// Builds the session over a simulated link and runs attempts the way
    /// [`Session::run`] does, delivering peer events before each inner loop
    /// iteration. When the iteration budget runs out the loop stops where
    /// it is. Children are then waited for, the session is shut down, and
    /// the oracle is invoked on the recorded world.
    pub fn run(self) -> Result<(), String> {
        let Scenario { name, mut config, table, events, budget } = self.scenario;
        let fail = |what: &str, err: &dyn std::fmt::Display| format!("Scenario '{name}': {what}: {err}");

        let run_dir = tempfile::tempdir().map_err(|e| fail("run directory", &e))?;
        if config.run_dir == Path::new(DEFAULT_RUN_DIR) {
            config.run_dir = run_dir.path().to_path_buf();
        }

        let protocols = table.build().map_err(|e| fail("protocol table", &e))?;
        let (channel, peer) = sim_link("sim0").map_err(|e| fail("link", &e))?;
        let env = SimEnv::new();

        let phases = Rc::new(RefCell::new(Vec::new()));
        let notifications = Rc::new(RefCell::new(Vec::new()));
        let mut notifiers = Notifiers::new();
        for kind in NotifyKind::ALL {
            let notifications = Rc::clone(&notifications);
            notifiers.subscribe(kind, move |value| notifications.borrow_mut().push((kind, value)));
        }
        let phase_log = Rc::clone(&phases);

        let mut session = Session::builder(config, env.clone(), channel, protocols)
            .notifiers(notifiers)
            .phase_hook(move |phase| phase_log.borrow_mut().push(phase))
            .build()
            .map_err(|e| fail("session build", &e))?;

        let mut iteration = 0;
        let mut attempts = 0;
        'session: loop {
            if !session.begin_attempt() {
                break;
            }
            attempts += 1;

            while session.phase() != Phase::Dead {
                if iteration >= budget {
                    break 'session;
                }
                for (_, event) in events.iter().filter(|(at, _)| *at == iteration) {
                    tracing::debug!(scenario = %name, iteration, ?event, "peer event");
                    deliver(&peer, event).map_err(|e| fail("peer event", &e))?;
                }
                session.iterate();
                iteration += 1;
            }

            if !session.finish_attempt() {
                break;
            }
        }

        let phase_before_shutdown = session.phase();
        session.wait_for_children();
        let exit = session.shutdown();

        let world = World {
            name: name.clone(),
            phases: phases.borrow().clone(),
            notifications: notifications.borrow().clone(),
            sent: peer.received().map_err(|e| fail("peer receive", &e))?,
            exit,
            unsuccess: session.unsuccessful_attempts(),
            attempts,
            iterations: iteration,
            phase_before_shutdown,
            elapsed: env.elapsed(),
            script_env: session.script_env().clone(),
        };
        drop(session);

        (self.oracle)(&world)
    }
}

fn deliver(peer: &SimPeer, event: &PeerEvent) -> io::Result<()> {
    match event {
        PeerEvent::Frame(frame) => peer.send_frame(frame),
        PeerEvent::Raw(bytes) => peer.send_raw(bytes),
        PeerEvent::Hangup => peer.hang_up(),
        PeerEvent::Raise(signal) => raise(*signal).map_err(io::Error::from),
    }
}
