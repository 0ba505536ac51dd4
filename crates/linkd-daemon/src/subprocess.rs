//! Child process registry.
//!
//! Every script or connector the daemon starts is recorded here until it is
//! reaped. Reaping happens from the event loop after SIGCHLD, never from
//! signal context.
//!
//! # Launch
//!
//! Children are started with `std::process::Command`:
//!
//! - the environment is exactly the session's [`ScriptEnv`]
//! - the working directory is `/`
//! - each child starts a new session, which detaches it from our
//!   controlling terminal and makes it a process-group leader
//! - stdio is `/dev/null` unless the caller supplies descriptors
//!
//! `Command::spawn` reports exec failure synchronously through a
//! close-on-exec pipe, so a child that could not exec never appears in the
//! registry; the failure comes back as [`SubprocessError::Spawn`].
//!
//! Programs are checked before launch: anything that is not a regular file
//! with an execute bit is skipped with [`Spawned::NotStarted`]. A missing
//! file is silent unless the caller says it must exist.

use std::{
    fs,
    io::{self, ErrorKind},
    os::unix::{
        fs::PermissionsExt,
        process::{CommandExt, ExitStatusExt},
    },
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
};

use linkd_core::ScriptEnv;
use nix::{
    sys::signal::{Signal, killpg},
    unistd::{self, Gid, Pid, Uid},
};

use crate::error::SubprocessError;

/// User and group a child runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// User id
    pub uid: u32,
    /// Group id
    pub gid: u32,
}

impl Credentials {
    /// Credentials for hook scripts: root with our effective group.
    ///
    /// `None` unless we run with effective uid 0; without privilege there is
    /// nothing to change.
    pub fn for_scripts() -> Option<Self> {
        Uid::effective().is_root().then(|| Self { uid: 0, gid: Gid::effective().as_raw() })
    }

    /// Credentials for connector scripts: the invoking user.
    pub fn for_connectors() -> Option<Self> {
        Uid::effective()
            .is_root()
            .then(|| Self { uid: Uid::current().as_raw(), gid: Gid::current().as_raw() })
    }
}

/// How to start a child.
#[derive(Debug, Clone)]
pub struct SpawnOptions<E> {
    /// Warn when the program is missing
    pub must_exist: bool,
    /// Block until the child exits and reap it immediately
    pub wait: bool,
    /// Terminate this child when the session forwards a kill
    pub killable: bool,
    /// Event handed back when the child is reaped
    pub on_exit: Option<E>,
    /// User and group to run as
    pub credentials: Option<Credentials>,
}

impl<E> Default for SpawnOptions<E> {
    fn default() -> Self {
        Self { must_exist: false, wait: false, killable: false, on_exit: None, credentials: None }
    }
}

/// A reaped child.
#[derive(Debug)]
pub struct Reaped<E> {
    /// Child pid
    pub pid: u32,
    /// Program name for logs
    pub program: String,
    /// How it exited
    pub status: ExitStatus,
    /// Completion event supplied at spawn time
    pub on_exit: Option<E>,
}

impl<E> Reaped<E> {
    /// Numeric status for completion callbacks: the exit code, or
    /// `128 + signal` for a child killed by a signal.
    pub fn status_value(&self) -> i32 {
        match (self.status.code(), self.status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        }
    }
}

/// Result of a spawn request.
#[derive(Debug)]
pub enum Spawned<E> {
    /// Program missing or not executable; nothing was started
    NotStarted,
    /// Child is running and recorded
    Running {
        /// Child pid
        pid: u32,
    },
    /// Child was waited for and has already been reaped
    Exited(Reaped<E>),
}

impl<E> Spawned<E> {
    /// Pid of the started child, if one was started.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::NotStarted => None,
            Self::Running { pid } => Some(*pid),
            Self::Exited(reaped) => Some(reaped.pid),
        }
    }
}

#[derive(Debug)]
struct Record<E> {
    child: Child,
    program: String,
    killable: bool,
    on_exit: Option<E>,
}

/// Live children, newest first.
#[derive(Debug)]
pub struct SubprocessRegistry<E> {
    records: Vec<Record<E>>,
    gave_up: bool,
}

impl<E> SubprocessRegistry<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { records: Vec::new(), gave_up: false }
    }

    /// Run `program` with `args` (not including the program name).
    pub fn run_program(
        &mut self,
        program: &Path,
        args: &[String],
        env: &ScriptEnv,
        options: SpawnOptions<E>,
    ) -> Result<Spawned<E>, SubprocessError> {
        let name = program.display().to_string();

        match fs::metadata(program) {
            Ok(meta) if meta.is_file() && meta.permissions().mode() & 0o111 != 0 => {},
            Ok(_) => {
                tracing::warn!("Can't execute {name}: not an executable file");
                return Ok(Spawned::NotStarted);
            },
            Err(err) => {
                if options.must_exist || err.kind() != ErrorKind::NotFound {
                    tracing::warn!("Can't execute {name}: {err}");
                }
                return Ok(Spawned::NotStarted);
            },
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        self.launch(command, name, env, options)
    }

    /// Run `command` through `/bin/sh -c` with the given stdin and stdout.
    ///
    /// Used for connector scripts that talk to the device.
    pub fn run_shell(
        &mut self,
        command_line: &str,
        stdin: Stdio,
        stdout: Stdio,
        env: &ScriptEnv,
        options: SpawnOptions<E>,
    ) -> Result<Spawned<E>, SubprocessError> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(command_line).stdin(stdin).stdout(stdout).stderr(Stdio::null());
        self.launch(command, command_line.to_string(), env, options)
    }

    fn launch(
        &mut self,
        mut command: Command,
        program: String,
        env: &ScriptEnv,
        options: SpawnOptions<E>,
    ) -> Result<Spawned<E>, SubprocessError> {
        command.env_clear().envs(env.vars()).current_dir("/");
        new_session(&mut command);
        if let Some(credentials) = options.credentials {
            command.gid(credentials.gid).uid(credentials.uid);
        }

        let mut child = command.spawn().map_err(|source| {
            tracing::error!("Failed to create child process for {program}: {source}");
            SubprocessError::Spawn { program: program.clone(), source }
        })?;
        let pid = child.id();
        tracing::debug!("Script {program} started (pid {pid})");

        if options.wait {
            let status = child
                .wait()
                .map_err(|source| SubprocessError::Wait { program: program.clone(), pid, source })?;
            let reaped = Reaped { pid, program, status, on_exit: options.on_exit };
            log_exit(&reaped);
            return Ok(Spawned::Exited(reaped));
        }

        self.records.insert(0, Record {
            child,
            program,
            killable: options.killable,
            on_exit: options.on_exit,
        });
        Ok(Spawned::Running { pid })
    }

    /// Reap every child that has exited without blocking.
    ///
    /// Returned in registry order, newest first.
    pub fn reap_all_exited(&mut self) -> Vec<Reaped<E>> {
        let mut reaped = Vec::new();
        let mut index = 0;
        while index < self.records.len() {
            let record = &mut self.records[index];
            let pid = record.child.id();
            match record.child.try_wait() {
                Ok(Some(status)) => {
                    let record = self.records.remove(index);
                    let done = Reaped { pid, program: record.program, status, on_exit: record.on_exit };
                    log_exit(&done);
                    reaped.push(done);
                },
                Ok(None) => index += 1,
                Err(err) => {
                    tracing::error!("Error waiting for child process {} (pid {pid}): {err}", record.program);
                    self.records.remove(index);
                },
            }
        }
        reaped
    }

    /// Send `signal` to the process group of every killable child.
    pub fn signal_killable(&self, signal: Signal) -> usize {
        let mut sent = 0;
        for record in self.records.iter().filter(|record| record.killable) {
            let pid = Pid::from_raw(record.child.id() as i32);
            match killpg(pid, signal) {
                Ok(()) => sent += 1,
                Err(err) => tracing::debug!("kill {} (pid {pid}): {err}", record.program),
            }
        }
        sent
    }

    /// Terminate every killable child and stop waiting for the rest.
    pub fn force_terminate_all(&mut self) -> usize {
        let sent = self.signal_killable(Signal::SIGTERM);
        self.gave_up = true;
        sent
    }

    /// Start a new wait: clear the flag set by
    /// [`force_terminate_all`](Self::force_terminate_all).
    pub fn resume_waiting(&mut self) {
        self.gave_up = false;
    }

    /// Whether [`force_terminate_all`](Self::force_terminate_all) has run.
    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    /// Number of live children.
    pub fn live(&self) -> usize {
        self.records.len()
    }

    /// Number of live killable children.
    pub fn live_killable(&self) -> usize {
        self.records.iter().filter(|record| record.killable).count()
    }

    /// `(pid, program)` of every live child, newest first.
    pub fn children(&self) -> Vec<(u32, String)> {
        self.records.iter().map(|record| (record.child.id(), record.program.clone())).collect()
    }
}

impl<E> Default for SubprocessRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Drop for SubprocessRegistry<E> {
    fn drop(&mut self) {
        self.signal_killable(Signal::SIGTERM);
        for record in self.records.iter_mut().filter(|record| record.killable) {
            let _ = record.child.try_wait();
        }
    }
}

#[allow(unsafe_code)]
fn new_session(command: &mut Command) {
    // SAFETY: setsid(2) is async-signal-safe and the closure allocates
    // nothing.
    unsafe {
        command.pre_exec(|| unistd::setsid().map(drop).map_err(io::Error::from));
    }
}

fn log_exit<E>(reaped: &Reaped<E>) {
    if let Some(signal) = reaped.status.signal() {
        tracing::warn!(
            "Child process {} (pid {}) terminated with signal {}",
            reaped.program,
            reaped.pid,
            signal
        );
    } else {
        tracing::debug!(
            "Script {} finished (pid {}), status = {:#x}",
            reaped.program,
            reaped.pid,
            reaped.status.into_raw()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        path::PathBuf,
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    #[allow(clippy::disallowed_methods)]
    fn reap_until_empty(registry: &mut SubprocessRegistry<u32>) -> Vec<Reaped<u32>> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut all = Vec::new();
        while registry.live() > 0 && Instant::now() < deadline {
            all.extend(registry.reap_all_exited());
            thread::sleep(Duration::from_millis(5));
        }
        all
    }

    #[test]
    fn missing_program_is_not_started() {
        let mut registry: SubprocessRegistry<u32> = SubprocessRegistry::new();
        let spawned = registry
            .run_program(Path::new("/nonexistent/linkd-hook"), &[], &ScriptEnv::new(), SpawnOptions {
                must_exist: true,
                ..Default::default()
            })
            .unwrap();

        assert!(matches!(spawned, Spawned::NotStarted));
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn non_executable_file_is_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hook");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let mut registry: SubprocessRegistry<u32> = SubprocessRegistry::new();
        let spawned =
            registry.run_program(&path, &[], &ScriptEnv::new(), SpawnOptions::default()).unwrap();
        assert!(matches!(spawned, Spawned::NotStarted));
    }

    #[test]
    fn directory_is_not_started() {
        let mut registry: SubprocessRegistry<u32> = SubprocessRegistry::new();
        let spawned = registry
            .run_program(Path::new("/"), &[], &ScriptEnv::new(), SpawnOptions::default())
            .unwrap();
        assert!(matches!(spawned, Spawned::NotStarted));
    }

    #[test]
    fn waited_child_is_reaped_immediately() {
        let mut registry = SubprocessRegistry::new();
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let spawned = registry
            .run_program(Path::new("/bin/sh"), &args, &ScriptEnv::new(), SpawnOptions {
                wait: true,
                on_exit: Some(7u32),
                ..Default::default()
            })
            .unwrap();

        let Spawned::Exited(reaped) = spawned else {
            panic!("expected waited child to be reaped");
        };
        assert_eq!(reaped.status_value(), 3);
        assert_eq!(reaped.on_exit, Some(7));
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn child_sees_only_script_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let mut env = ScriptEnv::new();
        env.set("IFNAME", "ppp0", true);
        env.set("OUT", &out.display().to_string(), false);

        let args = vec!["-c".to_string(), "env > \"$OUT\"; pwd >> \"$OUT\"".to_string()];
        let mut registry: SubprocessRegistry<u32> = SubprocessRegistry::new();
        registry
            .run_program(Path::new("/bin/sh"), &args, &env, SpawnOptions {
                wait: true,
                ..Default::default()
            })
            .unwrap();

        let written = fs::read_to_string(&out).unwrap();
        assert!(written.contains("IFNAME=ppp0"));
        assert!(!written.contains("CARGO"));
        assert!(written.lines().any(|line| line == "/"));
    }

    #[test]
    fn child_runs_in_its_own_session() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sid");
        let mut env = ScriptEnv::new();
        env.set("OUT", &out.display().to_string(), false);

        let args = vec!["-c".to_string(), "cut -d' ' -f6 /proc/$$/stat > \"$OUT\"; echo $$ >> \"$OUT\"".to_string()];
        let mut registry: SubprocessRegistry<u32> = SubprocessRegistry::new();
        registry
            .run_program(Path::new("/bin/sh"), &args, &env, SpawnOptions { wait: true, ..Default::default() })
            .unwrap();

        let written = fs::read_to_string(&out).unwrap();
        let mut lines = written.lines();
        let child_sid: i32 = lines.next().unwrap().trim().parse().unwrap();
        let child_pid: i32 = lines.next().unwrap().trim().parse().unwrap();

        assert_ne!(child_sid, unistd::getsid(None).unwrap().as_raw());
        assert_eq!(child_sid, child_pid, "child should lead its session");
    }

    #[test]
    fn every_child_reaped_exactly_once() {
        let mut registry = SubprocessRegistry::new();
        let sh = PathBuf::from("/bin/sh");

        for index in 0..5u32 {
            let script = format!("sleep 0.0{}; exit {}", 5 - index, index);
            let args = vec!["-c".to_string(), script];
            registry
                .run_program(&sh, &args, &ScriptEnv::new(), SpawnOptions {
                    on_exit: Some(index),
                    ..Default::default()
                })
                .unwrap();
        }
        assert_eq!(registry.live(), 5);

        let reaped = reap_until_empty(&mut registry);
        let events: BTreeSet<u32> = reaped.iter().filter_map(|r| r.on_exit).collect();

        assert_eq!(reaped.len(), 5);
        assert_eq!(events, (0..5).collect());
        for child in &reaped {
            assert_eq!(Some(child.status_value() as u32), child.on_exit);
        }
        assert!(registry.reap_all_exited().is_empty());
    }

    #[test]
    fn force_terminate_kills_killable_children() {
        let mut registry = SubprocessRegistry::new();
        registry
            .run_shell("sleep 30", Stdio::null(), Stdio::null(), &ScriptEnv::new(), SpawnOptions {
                killable: true,
                on_exit: Some(1u32),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(registry.force_terminate_all(), 1);
        assert!(registry.gave_up());

        let reaped = reap_until_empty(&mut registry);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].status.signal(), Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn non_killable_children_are_left_alone() {
        let mut registry = SubprocessRegistry::new();
        let args = vec!["-c".to_string(), "sleep 0.05".to_string()];
        registry
            .run_program(Path::new("/bin/sh"), &args, &ScriptEnv::new(), SpawnOptions {
                on_exit: Some(1u32),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(registry.force_terminate_all(), 0);
        let reaped = reap_until_empty(&mut registry);
        assert_eq!(reaped[0].status_value(), 0);
    }
}
