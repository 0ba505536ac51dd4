//! linkd daemon
//!
//! Binds the core session logic to the operating system: the event loop,
//! signals, child processes, the link channel, pid files, and the command
//! line.
//!
//! # Architecture
//!
//! A single [`Session`] owns every resource. The loop blocks in one place,
//! the readiness wait, and everything else (signal flags, timers, child
//! exits, inbound frames) is handled synchronously on the same thread.
//!
//! ```text
//!  main.rs ── Args ──▶ Config ──▶ SessionBuilder ──▶ Session::run ──▶ ExitCode
//!                                     │
//!            SignalBridge, Channel, ProtocolTable, Notifiers, StatusStore
//! ```
//!
//! # Components
//!
//! - [`session`]: Session context, main loop, lifecycle
//! - [`signals`]: Self-pipe signal bridge
//! - [`subprocess`]: Child process registry
//! - [`channel`]: Link channel trait and the datagram channel
//! - [`static_link`]: Link control for links with fixed parameters
//! - [`config`]: Session configuration and command line
//! - [`pidfile`]: Interface and link pid files
//! - [`ifname`]: Interface index and name lookup
//! - [`realms`]: Radius realms file lookup
//! - [`logging`]: Log subscriber setup
//! - [`mod@env`]: Production environment
//! - [`error`]: Daemon error types

pub mod channel;
pub mod config;
pub mod env;
pub mod error;
pub mod ifname;
pub mod logging;
pub mod pidfile;
pub mod realms;
pub mod session;
pub mod signals;
pub mod static_link;
pub mod subprocess;

pub use channel::{Channel, ConnectContext, DatagramChannel, DemandLink, ReadOutcome};
pub use config::{Args, Config};
pub use env::SystemEnv;
pub use error::{ChannelError, PidFileError, RealmError, SessionError, SignalError, SubprocessError};
pub use ifname::{InterfaceResolver, SysfsResolver};
pub use logging::LogControl;
pub use pidfile::PidFiles;
pub use realms::{RealmServers, ServerAddress};
pub use session::{ChildEvent, Session, SessionBuilder, TimerEvent};
pub use signals::{PendingSignals, SignalBridge};
pub use static_link::StaticLinkControl;
pub use subprocess::{Credentials, Reaped, SpawnOptions, Spawned, SubprocessRegistry};
