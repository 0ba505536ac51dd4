//! World state recorded during scenario execution.
//!
//! The World is what an oracle sees: the phases the session went through,
//! every notification it fired, every frame the peer received, and how the
//! session ended.

use std::time::Duration;

use linkd_core::{ExitCode, NotifyKind, Phase, ScriptEnv};
use linkd_proto::{ControlCode, ControlPacket, Frame, protocols::LCP};

/// Recorded outcome of a scenario.
#[derive(Debug, Clone)]
pub struct World {
    pub(crate) name: String,
    pub(crate) phases: Vec<Phase>,
    pub(crate) notifications: Vec<(NotifyKind, i32)>,
    pub(crate) sent: Vec<Frame>,
    pub(crate) exit: ExitCode,
    pub(crate) unsuccess: u32,
    pub(crate) attempts: u32,
    pub(crate) iterations: usize,
    pub(crate) phase_before_shutdown: Phase,
    pub(crate) elapsed: Duration,
    pub(crate) script_env: ScriptEnv,
}

impl World {
    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every phase entered, in order, including repeats.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Whether the session ever entered `phase`.
    pub fn visited(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    /// How many times the session entered `phase`.
    pub fn visits(&self, phase: Phase) -> usize {
        self.phases.iter().filter(|&&p| p == phase).count()
    }

    /// Values fired for `kind`, in order.
    pub fn notifications(&self, kind: NotifyKind) -> Vec<i32> {
        self.notifications.iter().filter(|(k, _)| *k == kind).map(|(_, value)| *value).collect()
    }

    /// Every notification, in firing order.
    pub fn all_notifications(&self) -> &[(NotifyKind, i32)] {
        &self.notifications
    }

    /// Frames the peer received from the session.
    pub fn sent_frames(&self) -> &[Frame] {
        &self.sent
    }

    /// Link-control packets the peer received, decoded.
    pub fn link_control_packets(&self) -> Vec<ControlPacket> {
        self.sent
            .iter()
            .filter(|frame| frame.protocol() == LCP)
            .filter_map(|frame| ControlPacket::decode(&frame.payload).ok())
            .collect()
    }

    /// Protocol numbers the session sent Protocol-Rejects for, in order.
    pub fn protocol_rejects(&self) -> Vec<u16> {
        self.link_control_packets()
            .iter()
            .filter(|packet| packet.code() == Some(ControlCode::ProtocolReject))
            .filter_map(ControlPacket::rejected_protocol)
            .collect()
    }

    /// Exit status returned by shutdown.
    pub fn exit_code(&self) -> ExitCode {
        self.exit
    }

    /// Unsuccessful-attempt counter at the end.
    pub fn unsuccessful_attempts(&self) -> u32 {
        self.unsuccess
    }

    /// Attempts started.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Loop iterations run.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Phase the session was in when the loop stopped.
    pub fn phase_before_shutdown(&self) -> Phase {
        self.phase_before_shutdown
    }

    /// Virtual time consumed.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Script environment at the end of the run.
    pub fn script_env(&self) -> &ScriptEnv {
        &self.script_env
    }
}
