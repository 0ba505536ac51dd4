//! The link session: one owned context driving the whole daemon.
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────────┐   wake byte   ┌──────────────┐
//!  signals ──▶│ SignalBridge │──────────────▶│              │
//!             └──────────────┘               │              │◀── timers (TimerQueue)
//!             ┌──────────────┐   frames      │   Session    │
//!  peer ─────▶│   Channel    │──────────────▶│  event loop  │──▶ ProtocolTable
//!             └──────────────┘               │              │      │
//!             ┌──────────────┐   exits       │              │◀─────┘ ProtocolActions
//!  children ─▶│ Subprocesses │──────────────▶│              │──▶ Notifiers, scripts
//!             └──────────────┘               └──────────────┘
//! ```
//!
//! Everything runs on one thread. The only place the session blocks is the
//! wait inside [`Session::handle_events`]; it wakes for a signal, a due
//! timer, or a readable channel or demand descriptor.
//!
//! # Attempts
//!
//! [`Session::run`] repeats attempts until told to stop:
//!
//! 1. [`begin_attempt`](Session::begin_attempt): demand dormancy, then open
//!    link control and connect the channel
//! 2. [`iterate`](Session::iterate) until the phase returns to `Dead`
//! 3. [`finish_attempt`](Session::finish_attempt): retry policy and holdoff
//!
//! then waits for children and runs [`shutdown`](Session::shutdown).
//!
//! Tests drive the same steps one at a time.

mod events;
mod lifecycle;

use std::{
    fmt,
    time::{Duration, Instant},
};

pub use events::{ChildEvent, TimerEvent};
use linkd_core::{
    Environment, ExitCode, LinkStats, MemoryStatusStore, NotifyKind, Notifiers, Phase, PhaseMachine,
    ProtocolTable, ScriptEnv, StatusStore, TimerQueue, Unit,
};
use linkd_proto::{Frame, FrameHeader};
use nix::unistd::{Uid, User};

use crate::{
    channel::{Channel, DemandLink},
    config::Config,
    error::SessionError,
    ifname::{InterfaceResolver, SysfsResolver},
    pidfile::PidFiles,
    signals::SignalBridge,
    subprocess::SubprocessRegistry,
};

/// Overrides the holdoff delay before a retry.
pub type HoldoffHook = Box<dyn FnMut() -> Duration>;

/// Runs on every phase change, before phase-change notifiers.
pub type PhaseHook = Box<dyn FnMut(Phase)>;

/// Applies a debug toggle requested by SIGUSR1.
pub type DebugHook = Box<dyn FnMut(bool)>;

#[derive(Default)]
struct Hooks {
    holdoff: Option<HoldoffHook>,
    phase: Option<PhaseHook>,
    debug: Option<DebugHook>,
}

/// Builds a [`Session`].
pub struct SessionBuilder<E, C> {
    config: Config,
    env: E,
    channel: C,
    protocols: ProtocolTable,
    notifiers: Notifiers,
    status_store: Box<dyn StatusStore>,
    resolver: Box<dyn InterfaceResolver>,
    demand: Option<Box<dyn DemandLink>>,
    hooks: Hooks,
}

impl<E: Environment, C: Channel> SessionBuilder<E, C> {
    /// Subscribers that should see startup events such as the first
    /// pid change.
    pub fn notifiers(mut self, notifiers: Notifiers) -> Self {
        self.notifiers = notifiers;
        self
    }

    /// Store that mirrors the script environment.
    pub fn status_store(mut self, store: impl StatusStore + 'static) -> Self {
        self.status_store = Box::new(store);
        self
    }

    /// Interface name resolver.
    pub fn resolver(mut self, resolver: impl InterfaceResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Outbound traffic watcher for demand mode.
    pub fn demand(mut self, demand: impl DemandLink + 'static) -> Self {
        self.demand = Some(Box::new(demand));
        self
    }

    /// Policy for the delay before a retry.
    pub fn holdoff_hook(mut self, hook: impl FnMut() -> Duration + 'static) -> Self {
        self.hooks.holdoff = Some(Box::new(hook));
        self
    }

    /// Hook run on every phase change.
    pub fn phase_hook(mut self, hook: impl FnMut(Phase) + 'static) -> Self {
        self.hooks.phase = Some(Box::new(hook));
        self
    }

    /// Hook applying SIGUSR1 debug toggles.
    pub fn debug_hook(mut self, hook: impl FnMut(bool) + 'static) -> Self {
        self.hooks.debug = Some(Box::new(hook));
        self
    }

    /// Install signal handling, validate options and prepare the first
    /// attempt.
    ///
    /// # Errors
    ///
    /// - `Signals` if handlers or the wakeup pipe cannot be set up
    /// - `Options` if a protocol or channel rejects its options, or demand
    ///   mode has no demand link
    /// - `NoKernelSupport` if the channel is unsupported here
    pub fn build(self) -> Result<Session<E, C>, SessionError> {
        let signals = SignalBridge::install()?;
        let pid = std::process::id();
        let unit = self.config.unit;

        let mut session = Session {
            persist: self.config.persist,
            debug: self.config.debug,
            pid_files: PidFiles::new(&self.config.run_dir),
            ifname: String::new(),
            config: self.config,
            env: self.env,
            channel: self.channel,
            protocols: self.protocols,
            phase: PhaseMachine::new(),
            timers: TimerQueue::new(),
            notifiers: self.notifiers,
            children: SubprocessRegistry::new(),
            signals,
            script_env: ScriptEnv::new(),
            status_store: self.status_store,
            resolver: self.resolver,
            demand: self.demand,
            hooks: self.hooks,
            stats: LinkStats::new(),
            status: ExitCode::Ok,
            record_key: format!("linkd{pid}"),
            unit,
            ifindex: None,
            inbuf: vec![0; FrameHeader::SIZE + Frame::MAX_SIZE],
            asked_to_quit: false,
            kill_link: false,
            open_ccp: false,
            need_holdoff: true,
            hungup: false,
            unsuccess: 0,
            networks_up: 0,
            connectors_running: 0,
            channel_attached: false,
            watch_demand: false,
            shut_down: false,
        };

        session.new_phase(Phase::Initialize);
        session.protocols.init_all(unit);

        session.channel.process_extra_options()?;
        session.protocols.check_options()?;
        session.channel.check_options()?;
        if !session.channel.supported() {
            return Err(SessionError::NoKernelSupport(session.channel.device_name().to_string()));
        }

        session.export_startup_env(pid);

        if let Some(linkname) = session.config.linkname.clone() {
            if let Err(err) = session.pid_files.write_link(&linkname, pid, None) {
                tracing::error!("{err}");
            }
        }
        session.notifiers.fire(NotifyKind::PidChange, pid as i32);

        if session.config.demand {
            let demand = session
                .demand
                .as_mut()
                .ok_or_else(|| SessionError::Options("demand mode requires a demand link".into()))?;
            demand.configure()?;
            session.set_ifunit(true);
        }

        tracing::debug!(device = session.channel.device_name(), unit, "session ready");
        Ok(session)
    }
}

/// A link session.
pub struct Session<E, C> {
    config: Config,
    env: E,
    channel: C,
    protocols: ProtocolTable,
    phase: PhaseMachine,
    timers: TimerQueue<TimerEvent>,
    notifiers: Notifiers,
    children: SubprocessRegistry<ChildEvent>,
    signals: SignalBridge,
    script_env: ScriptEnv,
    status_store: Box<dyn StatusStore>,
    resolver: Box<dyn InterfaceResolver>,
    demand: Option<Box<dyn DemandLink>>,
    pid_files: PidFiles,
    hooks: Hooks,
    stats: LinkStats,

    status: ExitCode,
    record_key: String,
    unit: Unit,
    ifname: String,
    ifindex: Option<u32>,
    inbuf: Vec<u8>,

    // Loop state
    persist: bool,
    debug: bool,
    asked_to_quit: bool,
    kill_link: bool,
    open_ccp: bool,
    need_holdoff: bool,
    hungup: bool,
    unsuccess: u32,
    networks_up: u32,
    connectors_running: u32,
    channel_attached: bool,
    watch_demand: bool,
    shut_down: bool,
}

impl<E: Environment, C: Channel> Session<E, C> {
    /// Start building a session.
    pub fn builder(config: Config, env: E, channel: C, protocols: ProtocolTable) -> SessionBuilder<E, C> {
        SessionBuilder {
            config,
            env,
            channel,
            protocols,
            notifiers: Notifiers::new(),
            status_store: Box::new(MemoryStatusStore::new()),
            resolver: Box::new(SysfsResolver::new()),
            demand: None,
            hooks: Hooks::default(),
        }
    }

    /// Run attempts until the session is finished, then shut down.
    ///
    /// Returns the exit status for the process.
    pub fn run(&mut self) -> ExitCode {
        loop {
            if !self.begin_attempt() {
                break;
            }
            while self.phase() != Phase::Dead {
                self.iterate();
            }
            if !self.finish_attempt() {
                break;
            }
        }

        self.wait_for_children();
        self.shutdown()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    /// Exit status the session would report now.
    pub fn status(&self) -> ExitCode {
        self.status
    }

    /// Consecutive attempts without a network protocol coming up.
    pub fn unsuccessful_attempts(&self) -> u32 {
        self.unsuccess
    }

    /// Whether a terminate signal asked the daemon to exit.
    pub fn asked_to_quit(&self) -> bool {
        self.asked_to_quit
    }

    /// Whether the session restarts after an attempt ends.
    pub fn persist(&self) -> bool {
        self.persist
    }

    /// Whether debug logging is on.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether the last attempt ended with the peer hanging up.
    pub fn hung_up(&self) -> bool {
        self.hungup
    }

    /// Current interface name.
    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// Variables exported to scripts.
    pub fn script_env(&self) -> &ScriptEnv {
        &self.script_env
    }

    /// Session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Notifier registry, for subscribing after startup.
    pub fn notifiers_mut(&mut self) -> &mut Notifiers {
        &mut self.notifiers
    }

    /// Protocol handlers.
    pub fn protocols(&self) -> &ProtocolTable {
        &self.protocols
    }

    /// The link channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Pid files written so far.
    pub fn pid_files(&self) -> &PidFiles {
        &self.pid_files
    }

    /// Number of live child processes.
    pub fn live_children(&self) -> usize {
        self.children.live()
    }

    /// Number of pending timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    fn now(&self) -> Instant {
        self.env.now()
    }

    fn export_startup_env(&mut self, pid: u32) {
        let uid = Uid::current();
        let login = match User::from_uid(uid) {
            Ok(Some(user)) => user.name,
            _ => uid.to_string(),
        };
        self.script_setenv("PPPLOGNAME", &login, false);
        self.script_setenv("ORIG_UID", &uid.to_string(), false);

        let device = self.channel.device_name().to_string();
        self.script_setenv("DEVICE", &device, true);
        self.script_setenv("PPPD_PID", &pid.to_string(), true);

        if let Some(linkname) = self.config.linkname.clone() {
            self.script_setenv("LINKNAME", &linkname, false);
        }
    }
}

impl<E, C> fmt::Debug for Session<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase.current())
            .field("status", &self.status)
            .field("ifname", &self.ifname)
            .field("unsuccess", &self.unsuccess)
            .field("networks_up", &self.networks_up)
            .field("asked_to_quit", &self.asked_to_quit)
            .finish_non_exhaustive()
    }
}
