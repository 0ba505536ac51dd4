//! linkd session core logic
//!
//! The pieces of a link session that can be reasoned about without touching
//! the operating system: timers, phases, protocol dispatch, observer
//! registration, and the script environment.
//!
//! # Architecture
//!
//! Everything here is a plain state machine. Time comes in as an `Instant`
//! argument, and protocol collaborators describe their effects as
//! [`ProtocolAction`] values rather than performing them. The daemon's
//! session loop interprets those actions against real file descriptors,
//! processes, and signals; the test harness interprets them against a
//! virtual clock.
//!
//! ```text
//!            ┌──────────────┐   Vec<ProtocolAction>   ┌──────────────┐
//!  frame ───>│ ProtocolTable│────────────────────────>│ session loop │
//!            └──────────────┘                         │  (daemon)    │
//!  ┌──────────────┐  pop_due(now)                     │              │
//!  │  TimerQueue  │──────────────────────────────────>│              │
//!  └──────────────┘                                   └──────┬───────┘
//!  ┌──────────────┐  begin/finish                            │
//!  │ PhaseMachine │<─────────────────────────────────────────┤
//!  └──────────────┘                                          │
//!  ┌──────────────┐  fire(kind, value)                       │
//!  │  Notifiers   │<─────────────────────────────────────────┘
//!  └──────────────┘
//! ```
//!
//! # Components
//!
//! - [`timer`]: Ordered one-shot timer queue
//! - [`phase`]: Session phase machine
//! - [`protocol`]: Protocol collaborator trait and the actions it returns
//! - [`dispatch`]: Protocol table and inbound frame routing
//! - [`notify`]: Observer registries keyed by event kind
//! - [`script_env`]: Environment handed to child scripts
//! - [`status`]: Status store mirroring the script environment
//! - [`stats`]: Link statistics and connect-time reporting
//! - [`exit`]: Process exit codes
//! - [`mod@env`]: Environment abstraction (time, readiness waits)
//! - [`error`]: Core error types

pub mod dispatch;
pub mod env;
pub mod error;
pub mod exit;
pub mod notify;
pub mod phase;
pub mod protocol;
pub mod script_env;
pub mod stats;
pub mod status;
pub mod timer;

pub use dispatch::{DiscardReason, Dispatch, ProtocolRole, ProtocolTable, ProtocolTableBuilder};
pub use env::Environment;
pub use error::CoreError;
pub use exit::ExitCode;
pub use notify::{NotifyKind, Notifiers, SubscriptionId};
pub use phase::{NetScript, Phase, PhaseAction, PhaseMachine, Transition};
pub use protocol::{LinkConfig, Protocol, ProtocolAction, Unit};
pub use script_env::ScriptEnv;
pub use stats::{LinkCounters, LinkReport, LinkStats};
pub use status::{MemoryStatusStore, StatusStore};
pub use timer::{TimerId, TimerQueue};
