//! Event handling: the wait, signals, timers, child exits, inbound frames,
//! and protocol actions.

use std::os::fd::RawFd;

use linkd_core::{Dispatch, Environment, ExitCode, NotifyKind, Phase, ProtocolAction, ProtocolRole};
use linkd_proto::{Frame, FrameHeader};
use nix::sys::signal::Signal;

use super::Session;
use crate::{
    channel::{Channel, ReadOutcome},
    subprocess::{Credentials, Reaped, SpawnOptions, Spawned},
};

/// Completion events attached to child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    /// A connector started without waiting has exited
    ConnectorExited,
    /// A protocol's script finished
    Script {
        /// Protocol that started it
        protocol: u16,
        /// Protocol-scoped token
        token: u32,
    },
}

/// Events held in the session timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Holdoff delay elapsed
    HoldoffEnd,
    /// Gave up waiting for children at exit
    ChildWaitEnd,
    /// A protocol timeout
    Protocol {
        /// Protocol that scheduled it
        protocol: u16,
        /// Protocol-scoped token
        token: u32,
    },
}

impl<E: Environment, C: Channel> Session<E, C> {
    /// One pass of the inner loop: wait and handle events, read at most one
    /// frame, then act on the kill and compression flags.
    pub fn iterate(&mut self) {
        self.handle_events();
        self.get_input();

        if self.kill_link {
            self.lcp_close("User request");
            self.need_holdoff = false;
        }
        if self.asked_to_quit && self.phase() == Phase::Master {
            self.bundle_terminated();
        }
        if self.open_ccp && matches!(self.phase(), Phase::Network | Phase::Running) {
            let unit = self.unit;
            let opened = self.protocols.first_of_mut(ProtocolRole::CompressionControl).map(|ccp| {
                let number = ccp.number();
                (number, ccp.open(unit))
            });
            if let Some((number, actions)) = opened {
                self.apply_actions(number, actions);
            }
        }
    }

    /// Wait for something to happen and respond to it.
    ///
    /// Clears the per-iteration kill and compression flags, drains the
    /// wakeup pipe, blocks unless a signal is already pending, fires due
    /// timers, then acts on signal flags.
    pub fn handle_events(&mut self) {
        self.kill_link = false;
        self.open_ccp = false;

        self.signals.drain();
        if !self.signals.has_pending() {
            let fds = self.wait_set();
            let timeout = self.timers.time_until_next(self.now());
            if let Err(err) = self.env.wait_readable(&fds, timeout) {
                tracing::error!("Error waiting for events: {err}");
            }
        }

        self.fire_timers();
        self.process_signals();
    }

    fn wait_set(&self) -> Vec<RawFd> {
        let mut fds = vec![self.signals.wake_fd()];
        if self.channel_attached {
            fds.extend(self.channel.raw_fd());
        }
        if self.watch_demand {
            fds.extend(self.demand.as_ref().and_then(|demand| demand.raw_fd()));
        }
        fds
    }

    fn fire_timers(&mut self) {
        loop {
            let now = self.now();
            let Some(event) = self.timers.pop_due(now) else {
                break;
            };
            match event {
                TimerEvent::HoldoffEnd => self.new_phase(Phase::Dormant),
                TimerEvent::ChildWaitEnd => self.child_wait_end(),
                TimerEvent::Protocol { protocol, token } => {
                    let unit = self.unit;
                    let Some(handler) = self.protocols.get_mut(protocol) else {
                        continue;
                    };
                    let actions = handler.timeout(unit, token);
                    self.apply_actions(protocol, actions);
                },
            }
        }
    }

    fn process_signals(&mut self) {
        let pending = self.signals.take();
        if pending.is_empty() {
            return;
        }

        if let Some(signal) = pending.fatal {
            self.fatal_signal(signal);
        }

        if pending.hangup {
            tracing::info!("Hangup (SIGHUP)");
            self.kill_link = true;
            if self.status != ExitCode::Hangup {
                self.status = ExitCode::UserRequest;
            }
            self.forward_to_connectors(Signal::SIGHUP);
            self.notifiers.fire(NotifyKind::Signaled, Signal::SIGHUP as i32);
        }

        if let Some(signal) = pending.terminate {
            tracing::info!("Terminating on signal {}", signal as i32);
            self.kill_link = true;
            self.asked_to_quit = true;
            self.persist = false;
            self.status = ExitCode::UserRequest;
            self.forward_to_connectors(signal);
            self.notifiers.fire(NotifyKind::Signaled, signal as i32);
        }

        if pending.child_exited {
            self.reap_children();
        }

        // Each delivery flips the flag
        if pending.debug_toggles % 2 == 1 {
            self.debug = !self.debug;
            if let Some(hook) = self.hooks.debug.as_mut() {
                hook(self.debug);
            }
        }

        if pending.reopen_compression {
            self.open_ccp = true;
        }
    }

    fn forward_to_connectors(&self, signal: Signal) {
        if self.connectors_running > 0 {
            self.children.signal_killable(signal);
        }
    }

    /// Shut down after an abnormal signal and exit the process.
    fn fatal_signal(&mut self, signal: Signal) -> ! {
        tracing::error!("Fatal signal {}", signal as i32);
        if self.connectors_running > 0 {
            self.children.signal_killable(Signal::SIGTERM);
        }
        self.notifiers.fire(NotifyKind::Signaled, signal as i32);
        self.status = ExitCode::FatalSignal;
        let status = self.shutdown();
        std::process::exit(status.as_i32())
    }

    /// Reap every exited child and run its completion.
    pub(super) fn reap_children(&mut self) {
        for reaped in self.children.reap_all_exited() {
            self.child_done(&reaped);
        }
    }

    fn child_done(&mut self, reaped: &Reaped<ChildEvent>) {
        match reaped.on_exit {
            None => {},
            Some(ChildEvent::ConnectorExited) => {
                self.connectors_running = self.connectors_running.saturating_sub(1);
            },
            Some(ChildEvent::Script { protocol, token }) => {
                let unit = self.unit;
                let status = reaped.status_value();
                if let Some(handler) = self.protocols.get_mut(protocol) {
                    let actions = handler.script_done(unit, token, status);
                    self.apply_actions(protocol, actions);
                }
            },
        }
    }

    fn child_wait_end(&mut self) {
        for (pid, program) in self.children.children() {
            tracing::debug!("sending SIGTERM to process {pid} ({program})");
        }
        self.children.force_terminate_all();
    }

    /// Read and dispatch at most one inbound frame.
    pub fn get_input(&mut self) {
        if !self.channel_attached {
            return;
        }

        let len = match self.channel.read_packet(&mut self.inbuf) {
            Ok(ReadOutcome::Packet(len)) => len,
            Ok(ReadOutcome::NoData) => return,
            Ok(ReadOutcome::Hangup) => {
                self.peer_hangup();
                return;
            },
            Err(err) => {
                tracing::error!("read from {}: {err}", self.channel.device_name());
                return;
            },
        };

        if len < FrameHeader::SIZE {
            tracing::debug!("received short packet: {}", hex::encode(&self.inbuf[..len]));
            return;
        }

        let frame = match Frame::decode(&self.inbuf[..len]) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!("discarding undecodable packet: {err}");
                return;
            },
        };
        tracing::debug!(protocol = frame.protocol(), len, "rcvd {}", frame.payload_preview(32));

        let unit = self.unit;
        let phase = self.phase();
        match self.protocols.dispatch(unit, phase, &frame) {
            Dispatch::Delivered { handler, actions } => self.apply_actions(handler, actions),
            Dispatch::Discarded { protocol, reason } => {
                tracing::debug!("discarding proto 0x{protocol:x} in phase {phase}: {reason}");
            },
            Dispatch::Unsupported { protocol } => {
                match linkd_proto::protocol_name(protocol) {
                    Some(name) => tracing::warn!("Unsupported protocol '{name}' (0x{protocol:x}) received"),
                    None => tracing::warn!("Unsupported protocol 0x{protocol:x} received"),
                }
                let link_control = self.protocols.link_control_number();
                let actions = self.protocols.reject(unit, &frame);
                self.apply_actions(link_control, actions);
            },
        }
    }

    fn peer_hangup(&mut self) {
        if self.phase() == Phase::Master {
            tracing::info!("Last channel has disconnected");
            self.bundle_terminated();
            return;
        }

        tracing::info!("Modem hangup");
        self.hungup = true;
        self.status = ExitCode::Hangup;
        let unit = self.unit;
        let link_control = self.protocols.link_control_number();
        let actions = self.protocols.link_control_mut().lower_down(unit);
        self.apply_actions(link_control, actions);
        self.link_terminated();
    }

    /// Carry out actions requested by protocol `source`, in order.
    pub(super) fn apply_actions(&mut self, source: u16, actions: Vec<ProtocolAction>) {
        for action in actions {
            self.apply_action(source, action);
        }
    }

    fn apply_action(&mut self, source: u16, action: ProtocolAction) {
        match action {
            ProtocolAction::Send(frame) => self.send_frame(&frame),
            ProtocolAction::RequestPhase(target) => self.enter_phase(target),
            ProtocolAction::ScheduleTimeout { token, delay } => {
                let now = self.now();
                self.timers.schedule(TimerEvent::Protocol { protocol: source, token }, delay, now);
            },
            ProtocolAction::CancelTimeout { token } => {
                self.timers.cancel(&TimerEvent::Protocol { protocol: source, token });
            },
            ProtocolAction::Notify { kind, value } => self.notifiers.fire(kind, value),
            ProtocolAction::SetStatus(code) => self.status = code,
            ProtocolAction::NetworkUp => self.np_up(),
            ProtocolAction::NetworkDown => self.np_down(),
            ProtocolAction::LinkDown => self.link_down(),
            ProtocolAction::LinkTerminated => self.link_terminated(),
            ProtocolAction::ConfigureSend(config) => {
                if let Err(err) = self.channel.send_config(&config) {
                    tracing::error!("Couldn't set transmit parameters: {err}");
                }
            },
            ProtocolAction::ConfigureRecv(config) => {
                if let Err(err) = self.channel.recv_config(&config) {
                    tracing::error!("Couldn't set receive parameters: {err}");
                }
            },
            ProtocolAction::SetEnv { name, value, is_key } => self.script_setenv(&name, &value, is_key),
            ProtocolAction::UnsetEnv { name } => self.script_unsetenv(&name),
            ProtocolAction::RunScript { program, args, wait, token } => {
                let options = SpawnOptions {
                    must_exist: true,
                    wait,
                    killable: true,
                    on_exit: token.map(|token| ChildEvent::Script { protocol: source, token }),
                    credentials: Credentials::for_scripts(),
                };
                let spawned = self.children.run_program(&program, &args, &self.script_env, options);
                self.spawned(spawned.ok());
            },
        }
    }

    /// Bookkeeping after a spawn: fork notification and, for a child that
    /// was waited for, its completion.
    pub(super) fn spawned(&mut self, spawned: Option<Spawned<ChildEvent>>) {
        let Some(spawned) = spawned else {
            return;
        };
        if let Some(pid) = spawned.pid() {
            self.notifiers.fire(NotifyKind::Fork, pid as i32);
        }
        if let Spawned::Exited(reaped) = spawned {
            self.child_done(&reaped);
        }
    }

    fn send_frame(&mut self, frame: &Frame) {
        if !self.channel_attached {
            tracing::debug!(protocol = frame.protocol(), "link not attached, dropping frame");
            return;
        }
        tracing::debug!(protocol = frame.protocol(), len = frame.len(), "sent {}", frame.payload_preview(32));
        if let Err(err) = self.channel.write_packet(&frame.to_bytes()) {
            tracing::error!("write to {}: {err}", self.channel.device_name());
        }
    }
}
