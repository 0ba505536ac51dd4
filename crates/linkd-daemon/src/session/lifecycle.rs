//! Session lifecycle: phases, attempts, link up and down, scripts, and
//! shutdown.

use std::time::Duration;

use linkd_core::{
    CoreError, Environment, ExitCode, LinkStats, NetScript, NotifyKind, Phase, PhaseAction, ProtocolRole,
};

use super::{Session, TimerEvent};
use crate::{
    channel::{Channel, ConnectContext},
    subprocess::{Credentials, SpawnOptions},
};

const STATS_VARS: [&str; 3] = ["CONNECT_TIME", "BYTES_SENT", "BYTES_RCVD"];

impl<E: Environment, C: Channel> Session<E, C> {
    /// Move to `target`.
    ///
    /// Runs the phase's entry actions (scripts, interface reconciliation),
    /// commits the phase, then calls the phase hook and the phase-change
    /// notifiers, in that order. A request for the current phase still
    /// notifies.
    pub fn new_phase(&mut self, target: Phase) {
        let transition = self.phase.begin(target);

        for action in transition.actions() {
            match *action {
                PhaseAction::CaptureInterfaceIndex => {
                    self.ifindex = self.resolver.index_of(&self.ifname);
                },
                PhaseAction::RunScript { script, wait } => self.run_net_script(script, wait),
                PhaseAction::ReconcileInterfaceName => self.reconcile_ifname(),
            }
        }

        let previous = self.phase.finish(transition);
        tracing::debug!(from = %previous, to = %target, "phase change");

        if let Some(hook) = self.hooks.phase.as_mut() {
            hook(target);
        }
        self.notifiers.fire(NotifyKind::PhaseChange, target.as_i32());
    }

    fn reconcile_ifname(&mut self) {
        let Some(index) = self.ifindex else {
            return;
        };
        if let Some(name) = self.resolver.name_of(index) {
            if name != self.ifname {
                tracing::info!("Detected interface name change from {} to {}.", self.ifname, name);
                self.ifname = name;
            }
        }
    }

    /// Phase change requested by a protocol.
    ///
    /// The first move past `Establish` brings the upper layers' lower
    /// layer up. Entering `Authenticate` opens the authentication
    /// protocols; entering `Network` opens network and compression control.
    pub(super) fn enter_phase(&mut self, target: Phase) {
        let previous = self.phase();
        self.new_phase(target);

        let unit = self.unit;
        if previous < Phase::Authenticate && matches!(target, Phase::Authenticate | Phase::Network) {
            for number in self.protocols.upper_layers() {
                let Some(handler) = self.protocols.get_mut(number) else {
                    continue;
                };
                let actions = handler.lower_up(unit);
                self.apply_actions(number, actions);
            }
        }

        let roles: &[ProtocolRole] = match target {
            Phase::Authenticate if previous < Phase::Authenticate => &[ProtocolRole::Authentication],
            Phase::Network if previous < Phase::Network => {
                &[ProtocolRole::NetworkControl, ProtocolRole::CompressionControl]
            },
            _ => &[],
        };
        for (number, role) in self.protocols.layout() {
            if !roles.contains(&role) {
                continue;
            }
            let Some(handler) = self.protocols.get_mut(number) else {
                continue;
            };
            let actions = handler.open(unit);
            self.apply_actions(number, actions);
        }
    }

    /// Start an attempt: wait for demand traffic if dormant, then open
    /// link control and bring up the channel.
    ///
    /// Returns `false` if a quit request arrived while dormant.
    pub fn begin_attempt(&mut self) -> bool {
        self.need_holdoff = true;
        self.status = ExitCode::Ok;
        self.unsuccess += 1;

        if self.config.demand && !self.wait_for_demand() {
            return false;
        }

        self.stats = LinkStats::new();
        for name in STATS_VARS {
            self.script_unsetenv(name);
        }

        let unit = self.unit;
        let link_control = self.protocols.link_control_number();
        let actions = self.protocols.link_control_mut().open(unit);
        self.apply_actions(link_control, actions);

        self.start_link();
        true
    }

    fn wait_for_demand(&mut self) -> bool {
        self.new_phase(Phase::Dormant);
        if let Some(demand) = self.demand.as_mut() {
            demand.unblock();
        }

        self.watch_demand = true;
        loop {
            self.handle_events();
            if self.asked_to_quit {
                break;
            }
            if self.demand.as_mut().is_some_and(|demand| demand.outbound_pending()) {
                break;
            }
        }
        self.watch_demand = false;

        if self.asked_to_quit {
            return false;
        }
        if let Some(demand) = self.demand.as_mut() {
            demand.block();
        }
        tracing::info!("Starting link");
        true
    }

    /// Connect the channel and hand the lower layer to link control.
    ///
    /// A failed connect releases the link and leaves the session in `Dead`
    /// with status `ConnectFailed`.
    pub fn start_link(&mut self) {
        self.hungup = false;

        let mut ctx = ConnectContext {
            children: &mut self.children,
            notifiers: &mut self.notifiers,
            env: &self.script_env,
            connectors_running: &mut self.connectors_running,
        };
        if let Err(err) = self.channel.connect(&mut ctx) {
            tracing::error!("Connect failed: {err}");
            self.status = ExitCode::ConnectFailed;
            self.new_phase(Phase::Disconnect);
            self.channel.disconnect();
            self.new_phase(Phase::Dead);
            return;
        }
        self.channel_attached = true;

        if !self.config.demand {
            self.set_ifunit(true);
        }
        tracing::info!("Connect: {} <--> {}", self.ifname, self.device());

        self.new_phase(Phase::Establish);
        let unit = self.unit;
        let link_control = self.protocols.link_control_number();
        let actions = self.protocols.link_control_mut().lower_up(unit);
        self.apply_actions(link_control, actions);
    }

    /// Ask link control to close, entering `Terminate` first.
    pub fn lcp_close(&mut self, reason: &str) {
        if !matches!(self.phase(), Phase::Dead | Phase::Master) {
            self.new_phase(Phase::Terminate);
        }
        let unit = self.unit;
        let link_control = self.protocols.link_control_number();
        let actions = self.protocols.link_control_mut().close(unit, reason);
        self.apply_actions(link_control, actions);
    }

    /// Link control is no longer open: take the upper layers down.
    pub(super) fn link_down(&mut self) {
        self.update_link_stats();
        self.notifiers.fire(NotifyKind::LinkDown, 0);
        self.upper_layers_down();

        if !matches!(self.phase(), Phase::Dead | Phase::Master | Phase::Terminate) {
            self.new_phase(Phase::Establish);
        }
    }

    fn upper_layers_down(&mut self) {
        let unit = self.unit;
        for (number, role) in self.protocols.layout() {
            if role == ProtocolRole::LinkControl {
                continue;
            }
            let Some(handler) = self.protocols.get_mut(number) else {
                continue;
            };
            let mut actions = handler.lower_down(unit);
            if matches!(role, ProtocolRole::NetworkControl | ProtocolRole::CompressionControl) {
                actions.extend(handler.close(unit, "LCP down"));
            }
            self.apply_actions(number, actions);
        }
        self.networks_up = 0;
    }

    /// Link control has finished: release the channel and return to
    /// `Dead`.
    pub(super) fn link_terminated(&mut self) {
        if matches!(self.phase(), Phase::Dead | Phase::Master) {
            return;
        }
        self.new_phase(Phase::Disconnect);

        self.update_link_stats();
        tracing::info!("Connection terminated.");
        self.print_link_stats();

        if self.channel_attached {
            self.channel.disestablish();
            self.channel_attached = false;
        }
        self.channel.disconnect();
        if !self.config.demand {
            self.pid_files.remove_all();
        }

        self.new_phase(Phase::Dead);
    }

    /// The last link of a multilink bundle went away.
    pub(super) fn bundle_terminated(&mut self) {
        self.upper_layers_down();
        tracing::info!("Connection terminated.");
        self.print_link_stats();
        if !self.config.demand {
            self.pid_files.remove_all();
            self.script_unsetenv("IFNAME");
        }
        self.new_phase(Phase::Dead);
    }

    /// A network protocol came up.
    pub(super) fn np_up(&mut self) {
        if self.networks_up == 0 {
            self.status = ExitCode::Ok;
            self.unsuccess = 0;
            self.new_phase(Phase::Running);

            let now = self.now();
            let counters = self.channel.counters().unwrap_or_default();
            self.stats.reset(now, counters);
        }
        self.networks_up += 1;
    }

    /// A network protocol went down.
    pub(super) fn np_down(&mut self) {
        self.networks_up = self.networks_up.saturating_sub(1);
        if self.networks_up == 0 {
            self.new_phase(Phase::Network);
        }
    }

    fn update_link_stats(&mut self) {
        let Some(counters) = self.channel.counters() else {
            return;
        };
        let now = self.now();
        if let Some(report) = self.stats.update(now, counters) {
            for (name, value) in report.env_vars() {
                self.script_setenv(name, &value, false);
            }
        }
    }

    fn print_link_stats(&mut self) {
        if let Some(report) = self.stats.take_report() {
            tracing::info!("Connect time {} minutes.", report.connect_minutes());
            tracing::info!("Sent {} bytes, received {} bytes.", report.bytes_sent, report.bytes_received);
        }
    }

    /// Adopt the interface name for this unit and run the init script.
    ///
    /// With `is_key` the name is indexed in the status store and the pid
    /// files are written.
    pub fn set_ifunit(&mut self, is_key: bool) {
        self.ifname = self.config.interface_name();
        tracing::info!("Using interface {}", self.ifname);

        let ifname = self.ifname.clone();
        self.script_setenv("IFNAME", &ifname, is_key);
        self.script_setenv("UNIT", &self.unit.to_string(), is_key);

        if is_key {
            let pid = std::process::id();
            if let Err(err) = self.pid_files.write_interface(&ifname, pid) {
                tracing::error!("{err}");
            }
            if let Some(linkname) = self.config.linkname.clone() {
                if let Err(err) = self.pid_files.write_link(&linkname, pid, Some(&ifname)) {
                    tracing::error!("{err}");
                }
            }
        }

        if let Some(remote) = self.config.remote_number.clone() {
            self.script_setenv("REMOTENUMBER", &remote, false);
        }
        self.run_net_script(NetScript::Init, true);
    }

    /// Export a variable to scripts and mirror it into the status store.
    pub fn script_setenv(&mut self, name: &str, value: &str, is_key: bool) {
        let update = self.script_env.set(name, value, is_key);

        if let Some(stale) = &update.stale_key {
            log_store_error(self.status_store.remove(stale));
        }
        if let Some(key) = &update.new_key {
            log_store_error(self.status_store.put_key(key, &self.record_key));
        }
        log_store_error(self.status_store.put_record(&self.record_key, &self.script_env.record()));
    }

    /// Remove a variable from the script environment.
    pub fn script_unsetenv(&mut self, name: &str) {
        let Some(entry) = self.script_env.unset(name) else {
            return;
        };
        if entry.is_key() {
            log_store_error(self.status_store.remove(&entry.pair()));
        }
        log_store_error(self.status_store.put_record(&self.record_key, &self.script_env.record()));
    }

    /// Run one of the network hook scripts with the standard arguments:
    /// interface, device, speed, ipparam.
    pub(super) fn run_net_script(&mut self, script: NetScript, wait: bool) {
        let path = match script {
            NetScript::Init => self.config.net_init.clone(),
            NetScript::PreUp => self.config.net_pre_up.clone(),
            NetScript::Down => self.config.net_down.clone(),
        };
        let Some(path) = path else {
            return;
        };

        let args = vec![
            self.ifname.clone(),
            self.device(),
            self.config.baud_rate.to_string(),
            self.config.ipparam.clone().unwrap_or_default(),
        ];
        let options = SpawnOptions {
            must_exist: false,
            wait,
            killable: true,
            on_exit: None,
            credentials: Credentials::for_scripts(),
        };
        let spawned = self.children.run_program(&path, &args, &self.script_env, options);
        self.spawned(spawned.ok());
    }

    pub(super) fn device(&self) -> String {
        if self.config.device.is_empty() {
            self.channel.device_name().to_string()
        } else {
            self.config.device.clone()
        }
    }

    /// End an attempt and decide whether to start another.
    ///
    /// Returns `true` to retry. A retry is preceded by the holdoff delay
    /// (or the holdoff hook's choice), during which a hangup or terminate
    /// signal ends the wait early.
    pub fn finish_attempt(&mut self) -> bool {
        self.lcp_close("");

        let maxfail = self.config.maxfail;
        if !self.persist || self.asked_to_quit || (maxfail > 0 && self.unsuccess >= maxfail) {
            return false;
        }

        if let Some(demand) = self.demand.as_mut() {
            demand.discard();
        }

        let mut delay = if self.need_holdoff { self.config.holdoff } else { Duration::ZERO };
        if let Some(hook) = self.hooks.holdoff.as_mut() {
            delay = hook();
        }

        if !delay.is_zero() {
            self.new_phase(Phase::Holdoff);
            let now = self.now();
            self.timers.schedule(TimerEvent::HoldoffEnd, delay, now);
            loop {
                self.handle_events();
                if self.kill_link {
                    self.new_phase(Phase::Dormant);
                }
                if self.phase() != Phase::Holdoff {
                    break;
                }
            }
            self.timers.cancel(&TimerEvent::HoldoffEnd);
            if !self.persist {
                return false;
            }
        }
        true
    }

    /// Give scripts a chance to finish before exit.
    ///
    /// Waits up to the configured child timeout, then terminates killable
    /// children and stops waiting. A hangup or terminate signal during the
    /// wait does the same immediately.
    pub fn wait_for_children(&mut self) {
        self.reap_children();
        if self.children.live() == 0 {
            return;
        }
        self.children.resume_waiting();

        if !self.config.child_timeout.is_zero() {
            let now = self.now();
            self.timers.schedule(TimerEvent::ChildWaitEnd, self.config.child_timeout, now);
        }
        tracing::debug!("Waiting for {} child processes...", self.children.live());
        for (pid, program) in self.children.children() {
            tracing::debug!("  script {program}, pid {pid}");
        }

        while self.children.live() > 0 && !self.children.gave_up() {
            self.handle_events();
            if self.kill_link && !self.children.gave_up() {
                self.children.force_terminate_all();
            }
        }
        self.timers.cancel(&TimerEvent::ChildWaitEnd);
    }

    /// Release everything and report the exit status.
    ///
    /// Prints link statistics, releases the channel, moves to `Disconnect`
    /// if the link was still up, removes pid files and status entries, and
    /// notifies exit subscribers. The down script started by that last
    /// transition gets the same grace period as
    /// [`wait_for_children`](Self::wait_for_children). Calling it again only
    /// returns the status.
    pub fn shutdown(&mut self) -> ExitCode {
        if self.shut_down {
            return self.status;
        }
        self.shut_down = true;
        self.signals.begin_shutdown();

        self.print_link_stats();
        if self.channel_attached {
            self.channel.disestablish();
            self.channel_attached = false;
        }
        self.channel.cleanup();
        if !matches!(self.phase(), Phase::Dead | Phase::Disconnect) {
            self.new_phase(Phase::Disconnect);
            self.wait_for_children();
        }
        self.pid_files.remove_all();
        self.cleanup_status_store();

        let status = self.status;
        self.notifiers.fire(NotifyKind::Exit, status.as_i32());
        tracing::info!("Exit.");
        status
    }

    fn cleanup_status_store(&mut self) {
        for key in self.script_env.keys() {
            log_store_error(self.status_store.remove(&key));
        }
        log_store_error(self.status_store.remove(&self.record_key));
    }
}

fn log_store_error(result: Result<(), CoreError>) {
    if let Err(err) = result {
        tracing::warn!("status store update failed: {err}");
    }
}
