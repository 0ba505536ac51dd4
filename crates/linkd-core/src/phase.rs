//! Session phase machine.
//!
//! # Phases
//!
//! ```text
//! Dead < Initialize < Dormant < Establish < Authenticate < Network
//!      < Running < Terminate < Disconnect < Holdoff < Master
//! ```
//!
//! The ordering is meaningful: dispatch gating compares phases with `<=`,
//! and the network pre-up hook runs only when entering `Network` from a
//! phase at or below it.
//!
//! # Transitions
//!
//! A transition happens in two steps so side effects land in the right
//! place relative to the phase change:
//!
//! 1. [`PhaseMachine::begin`] returns a [`Transition`] listing the actions the
//!    session must perform *before* the phase is committed.
//! 2. [`PhaseMachine::finish`] commits the target phase. The session then
//!    runs its phase hook and fires the phase-change notification.
//!
//! Transitions are not validated against a graph. A request for the current
//! phase still produces a transition and a notification, and moving
//! backwards is allowed.

use std::fmt;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(i32)]
pub enum Phase {
    /// No link; the main loop exits its inner loop here
    #[default]
    Dead = 0,
    /// Startup before the first attempt
    Initialize = 1,
    /// Demand mode, waiting for outbound traffic
    Dormant = 2,
    /// Link-control negotiation in progress
    Establish = 3,
    /// Authentication in progress
    Authenticate = 4,
    /// Network-control negotiation in progress
    Network = 5,
    /// At least one network protocol is up
    Running = 6,
    /// Link-control termination in progress
    Terminate = 7,
    /// Releasing the link
    Disconnect = 8,
    /// Waiting before a retry
    Holdoff = 9,
    /// Multilink bundle master with no live links
    Master = 10,
}

impl Phase {
    /// Numeric value used in notifications.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Phase for a numeric notification value.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Dead,
            1 => Self::Initialize,
            2 => Self::Dormant,
            3 => Self::Establish,
            4 => Self::Authenticate,
            5 => Self::Network,
            6 => Self::Running,
            7 => Self::Terminate,
            8 => Self::Disconnect,
            9 => Self::Holdoff,
            10 => Self::Master,
            _ => return None,
        })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dead => "dead",
            Self::Initialize => "initialize",
            Self::Dormant => "dormant",
            Self::Establish => "establish",
            Self::Authenticate => "authenticate",
            Self::Network => "network",
            Self::Running => "running",
            Self::Terminate => "terminate",
            Self::Disconnect => "disconnect",
            Self::Holdoff => "holdoff",
            Self::Master => "master",
        };
        f.write_str(name)
    }
}

/// Network hook scripts run around phase changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetScript {
    /// Run once the interface unit is known
    Init,
    /// Run before network-control negotiation
    PreUp,
    /// Run when the link is being released
    Down,
}

/// Work the session performs before a phase is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    /// Record the kernel index of the current interface name
    CaptureInterfaceIndex,
    /// Run a hook script
    RunScript {
        /// Which script
        script: NetScript,
        /// Block until the script exits
        wait: bool,
    },
    /// Re-resolve the interface name from the captured index
    ReconcileInterfaceName,
}

/// A pending phase change produced by [`PhaseMachine::begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a transition does nothing until passed to PhaseMachine::finish"]
pub struct Transition {
    from: Phase,
    to: Phase,
    actions: Vec<PhaseAction>,
}

impl Transition {
    /// Phase being left.
    pub fn from(&self) -> Phase {
        self.from
    }

    /// Phase being entered.
    pub fn to(&self) -> Phase {
        self.to
    }

    /// Actions to perform before committing.
    pub fn actions(&self) -> &[PhaseAction] {
        &self.actions
    }
}

/// Holds the current phase and plans transitions.
#[derive(Debug, Clone, Default)]
pub struct PhaseMachine {
    current: Phase,
}

impl PhaseMachine {
    /// Create a machine in [`Phase::Dead`].
    pub fn new() -> Self {
        Self { current: Phase::Dead }
    }

    /// Current phase.
    pub fn current(&self) -> Phase {
        self.current
    }

    /// Plan a transition to `target`.
    ///
    /// Entering `Network` from at or below it captures the interface index,
    /// runs the pre-up script to completion, then reconciles the interface
    /// name in case the script renamed it. Entering `Disconnect` starts the
    /// down script without waiting.
    pub fn begin(&self, target: Phase) -> Transition {
        let actions = match target {
            Phase::Network if self.current <= Phase::Network => vec![
                PhaseAction::CaptureInterfaceIndex,
                PhaseAction::RunScript { script: NetScript::PreUp, wait: true },
                PhaseAction::ReconcileInterfaceName,
            ],
            Phase::Disconnect => {
                vec![PhaseAction::RunScript { script: NetScript::Down, wait: false }]
            },
            _ => Vec::new(),
        };

        Transition { from: self.current, to: target, actions }
    }

    /// Commit a planned transition, returning the phase that was left.
    pub fn finish(&mut self, transition: Transition) -> Phase {
        let previous = self.current;
        self.current = transition.to;
        previous
    }
}
