//! Protocol collaborator trait.
//!
//! Negotiation algorithms (link control, authentication, network control,
//! compression) live outside the orchestrator. Each one plugs in through
//! [`Protocol`] and reports what it wants done as a list of
//! [`ProtocolAction`]s, which the session loop executes in order.

use std::{path::PathBuf, time::Duration};

use linkd_proto::Frame;

use crate::{error::CoreError, exit::ExitCode, notify::NotifyKind, phase::Phase};

/// Link unit number. Every session drives a single unit.
pub type Unit = u32;

/// Transmit or receive parameters for the link channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Maximum transmit or receive unit
    pub mtu: u16,
    /// Async control-character map
    pub accm: u32,
    /// Protocol-field compression enabled
    pub protocol_compression: bool,
    /// Address/control-field compression enabled
    pub address_compression: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { mtu: 1500, accm: 0xffff_ffff, protocol_compression: false, address_compression: false }
    }
}

/// Effects requested by a protocol collaborator.
///
/// Timer tokens are scoped to the protocol that scheduled them, so two
/// protocols can both use token `0` without colliding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolAction {
    /// Transmit a frame on the link
    Send(Frame),

    /// Move the session to a phase
    RequestPhase(Phase),

    /// Call back into [`Protocol::timeout`] with `token` after `delay`
    ScheduleTimeout {
        /// Protocol-scoped token
        token: u32,
        /// Delay from now
        delay: Duration,
    },

    /// Cancel a previously scheduled timeout
    CancelTimeout {
        /// Token passed to `ScheduleTimeout`
        token: u32,
    },

    /// Fire observers of `kind`
    Notify {
        /// Event kind
        kind: NotifyKind,
        /// Event value
        value: i32,
    },

    /// Record the exit status the session reports if it ends now
    SetStatus(ExitCode),

    /// A network protocol came up
    NetworkUp,

    /// A network protocol went down
    NetworkDown,

    /// The link layer went down but may come back
    LinkDown,

    /// Link-control finished; release the link
    LinkTerminated,

    /// Apply transmit parameters to the channel
    ConfigureSend(LinkConfig),

    /// Apply receive parameters to the channel
    ConfigureRecv(LinkConfig),

    /// Export a variable to child scripts
    SetEnv {
        /// Variable name
        name: String,
        /// Variable value
        value: String,
        /// Also index this variable in the status store
        is_key: bool,
    },

    /// Remove a variable from the script environment
    UnsetEnv {
        /// Variable name
        name: String,
    },

    /// Run a script, reporting completion through
    /// [`Protocol::script_done`] when `token` is set
    RunScript {
        /// Program to run
        program: PathBuf,
        /// Arguments after the program name
        args: Vec<String>,
        /// Block until it exits
        wait: bool,
        /// Completion token
        token: Option<u32>,
    },
}

/// A protocol handler registered in the dispatch table.
///
/// Only [`number`](Protocol::number), [`name`](Protocol::name),
/// [`open`](Protocol::open), [`close`](Protocol::close) and
/// [`input`](Protocol::input) are required. Everything else defaults to a
/// no-op.
pub trait Protocol {
    /// Protocol number this handler claims.
    fn number(&self) -> u16;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the handler currently accepts frames.
    fn enabled(&self) -> bool {
        true
    }

    /// Reset state for `unit`. Called once at startup.
    fn init(&mut self, _unit: Unit) {}

    /// Validate configured options.
    fn check_options(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Administrative open.
    fn open(&mut self, unit: Unit) -> Vec<ProtocolAction>;

    /// Administrative close.
    fn close(&mut self, unit: Unit, reason: &str) -> Vec<ProtocolAction>;

    /// Lower layer is up.
    fn lower_up(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        Vec::new()
    }

    /// Lower layer is down.
    fn lower_down(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        Vec::new()
    }

    /// Handle a frame addressed to [`number`](Protocol::number). `payload`
    /// excludes the link header.
    fn input(&mut self, unit: Unit, payload: &[u8]) -> Vec<ProtocolAction>;

    /// Whether [`data_input`](Protocol::data_input) is implemented.
    fn accepts_data(&self) -> bool {
        false
    }

    /// Handle a data frame whose protocol is this handler's number with the
    /// control bit cleared.
    fn data_input(&mut self, _unit: Unit, _payload: &[u8]) -> Vec<ProtocolAction> {
        Vec::new()
    }

    /// Peer rejected this protocol.
    fn protocol_rejected(&mut self, _unit: Unit) -> Vec<ProtocolAction> {
        Vec::new()
    }

    /// Link control only: send a Protocol-Reject for `frame`.
    fn reject(&mut self, _unit: Unit, _frame: &Frame) -> Vec<ProtocolAction> {
        Vec::new()
    }

    /// A timeout scheduled with `token` has fired.
    fn timeout(&mut self, _unit: Unit, _token: u32) -> Vec<ProtocolAction> {
        Vec::new()
    }

    /// A script started with `token` has exited.
    fn script_done(&mut self, _unit: Unit, _token: u32, _status: i32) -> Vec<ProtocolAction> {
        Vec::new()
    }

    /// Link control only: negotiation has reached the opened state.
    fn is_open(&self) -> bool {
        false
    }
}
