//! Link channels: the device the frames travel over.
//!
//! A [`Channel`] owns the device-specific half of a session: opening the
//! line, running connector scripts, moving raw frames, and applying link
//! parameters. The session loop only sees readiness on [`Channel::raw_fd`]
//! and the outcome of [`Channel::read_packet`].
//!
//! [`DatagramChannel`] is the in-tree implementation. Each Unix datagram
//! carries one frame, and a zero-length datagram stands for the peer hanging
//! up.

use std::{
    io::{self, ErrorKind},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixDatagram,
    },
    path::{Path, PathBuf},
    process::Stdio,
};

use linkd_core::{LinkConfig, LinkCounters, NotifyKind, Notifiers, ScriptEnv};

use crate::{
    error::ChannelError,
    session::ChildEvent,
    subprocess::{Credentials, SpawnOptions, Spawned, SubprocessRegistry},
};

/// Result of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A frame of this many bytes was read
    Packet(usize),
    /// Nothing to read right now
    NoData,
    /// The peer hung up
    Hangup,
}

/// What a channel may use from the session while connecting.
pub struct ConnectContext<'a> {
    pub(crate) children: &'a mut SubprocessRegistry<ChildEvent>,
    pub(crate) notifiers: &'a mut Notifiers,
    pub(crate) env: &'a ScriptEnv,
    pub(crate) connectors_running: &'a mut u32,
}

impl ConnectContext<'_> {
    /// Run a connector script with the given stdio, as the invoking user.
    ///
    /// With `wait` the script is reaped before returning and its status
    /// is returned. Without it the script keeps running as a killable child
    /// and `None` is returned.
    pub fn run_connector(
        &mut self,
        command: &str,
        stdin: Stdio,
        stdout: Stdio,
        wait: bool,
    ) -> Result<Option<i32>, ChannelError> {
        *self.connectors_running += 1;
        let options = SpawnOptions {
            must_exist: true,
            wait,
            killable: true,
            on_exit: (!wait).then_some(ChildEvent::ConnectorExited),
            credentials: Credentials::for_connectors(),
        };

        let spawned = match self.children.run_shell(command, stdin, stdout, self.env, options) {
            Ok(spawned) => spawned,
            Err(err) => {
                *self.connectors_running -= 1;
                return Err(err.into());
            },
        };
        if let Some(pid) = spawned.pid() {
            self.notifiers.fire(NotifyKind::Fork, pid as i32);
        }

        match spawned {
            Spawned::Exited(reaped) => {
                *self.connectors_running -= 1;
                Ok(Some(reaped.status_value()))
            },
            Spawned::Running { .. } => Ok(None),
            Spawned::NotStarted => {
                *self.connectors_running -= 1;
                Err(ChannelError::Connect(format!("connector {command} not started")))
            },
        }
    }

    /// Script environment in effect.
    pub fn env(&self) -> &ScriptEnv {
        self.env
    }
}

/// Device-specific half of a session.
pub trait Channel {
    /// Device name for logs and the `DEVICE` variable.
    fn device_name(&self) -> &str;

    /// Apply channel options not handled by the generic option set.
    fn process_extra_options(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Validate options once everything is parsed.
    fn check_options(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Whether the platform supports this channel at all.
    fn supported(&self) -> bool {
        true
    }

    /// Bring the link up. Called at the start of every attempt.
    fn connect(&mut self, ctx: &mut ConnectContext<'_>) -> Result<(), ChannelError>;

    /// Descriptor to wait on for inbound frames.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Read one frame into `buf` without blocking.
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    /// Write one frame.
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Apply transmit parameters.
    fn send_config(&mut self, _config: &LinkConfig) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Apply receive parameters.
    fn recv_config(&mut self, _config: &LinkConfig) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Current traffic counters, if the device keeps them.
    fn counters(&self) -> Option<LinkCounters> {
        None
    }

    /// Detach the link discipline at the end of an attempt.
    fn disestablish(&mut self) {}

    /// Hang up the line at the end of an attempt.
    fn disconnect(&mut self) {}

    /// Release device resources at shutdown.
    fn cleanup(&mut self) {}
}

/// Outbound traffic watcher for demand dialing.
pub trait DemandLink {
    /// Descriptor that becomes readable when traffic is queued.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Prepare the demand interface. Called once at startup.
    fn configure(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Whether outbound traffic is waiting to go out.
    fn outbound_pending(&mut self) -> bool;

    /// Let traffic queue up while dormant.
    fn unblock(&mut self) {}

    /// Stop queueing traffic once the link is being brought up.
    fn block(&mut self) {}

    /// Drop queued traffic after a failed attempt.
    fn discard(&mut self) {}
}

/// A channel carrying one frame per Unix datagram.
#[derive(Debug)]
pub struct DatagramChannel {
    name: String,
    socket: Option<UnixDatagram>,
    local: Option<PathBuf>,
    peer: Option<PathBuf>,
    connector: Option<String>,
    counters: LinkCounters,
}

impl DatagramChannel {
    /// Wrap an already connected socket.
    pub fn from_socket(name: impl Into<String>, socket: UnixDatagram) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            name: name.into(),
            socket: Some(socket),
            local: None,
            peer: None,
            connector: None,
            counters: LinkCounters::default(),
        })
    }

    /// A channel that binds `local` and connects to `peer` on each attempt.
    pub fn with_paths(local: impl Into<PathBuf>, peer: impl Into<PathBuf>) -> Self {
        let peer = peer.into();
        Self {
            name: peer.display().to_string(),
            socket: None,
            local: Some(local.into()),
            peer: Some(peer),
            connector: None,
            counters: LinkCounters::default(),
        }
    }

    /// Run `command` before each connect, stdio attached to `/dev/null`.
    pub fn connector(mut self, command: impl Into<String>) -> Self {
        self.connector = Some(command.into());
        self
    }

    fn open_paths(local: &Path, peer: &Path) -> io::Result<UnixDatagram> {
        match std::fs::remove_file(local) {
            Ok(()) => {},
            Err(err) if err.kind() == ErrorKind::NotFound => {},
            Err(err) => return Err(err),
        }
        let socket = UnixDatagram::bind(local)?;
        socket.connect(peer)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }
}

impl Channel for DatagramChannel {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn check_options(&mut self) -> Result<(), ChannelError> {
        if self.socket.is_none() && (self.local.is_none() || self.peer.is_none()) {
            return Err(ChannelError::Options("datagram channel needs a socket or both paths".into()));
        }
        Ok(())
    }

    fn connect(&mut self, ctx: &mut ConnectContext<'_>) -> Result<(), ChannelError> {
        if let Some(command) = self.connector.clone() {
            match ctx.run_connector(&command, Stdio::null(), Stdio::null(), true)? {
                Some(0) | None => {},
                Some(status) => {
                    return Err(ChannelError::Connect(format!("connector exited with status {status}")));
                },
            }
        }

        if self.socket.is_some() {
            return Ok(());
        }
        match (&self.local, &self.peer) {
            (Some(local), Some(peer)) => {
                self.socket = Some(Self::open_paths(local, peer)?);
                Ok(())
            },
            _ => Err(ChannelError::Connect("no socket to connect".into())),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let Some(socket) = &self.socket else {
            return Ok(ReadOutcome::NoData);
        };

        match socket.recv(buf) {
            Ok(0) => Ok(ReadOutcome::Hangup),
            Ok(len) => {
                self.counters.bytes_in += len as u64;
                self.counters.packets_in += 1;
                Ok(ReadOutcome::Packet(len))
            },
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::NoData),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::NoData),
            Err(err) if matches!(err.kind(), ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset) => {
                Ok(ReadOutcome::Hangup)
            },
            Err(err) => Err(err),
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "channel not connected"))?;
        socket.send(packet)?;
        self.counters.bytes_out += packet.len() as u64;
        self.counters.packets_out += 1;
        Ok(())
    }

    fn counters(&self) -> Option<LinkCounters> {
        Some(self.counters)
    }

    fn disconnect(&mut self) {
        // Path-based channels reconnect on the next attempt
        if self.peer.is_some() {
            self.socket = None;
        }
    }

    fn cleanup(&mut self) {
        self.socket = None;
        if let Some(local) = &self.local {
            let _ = std::fs::remove_file(local);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_and_hangup_over_socket_pair() {
        let (ours, theirs) = UnixDatagram::pair().unwrap();
        let mut channel = DatagramChannel::from_socket("test", ours).unwrap();
        let mut buf = [0u8; 64];

        assert_eq!(channel.read_packet(&mut buf).unwrap(), ReadOutcome::NoData);

        theirs.send(&[0xff, 0x03, 0xc0, 0x21]).unwrap();
        assert_eq!(channel.read_packet(&mut buf).unwrap(), ReadOutcome::Packet(4));

        theirs.send(&[]).unwrap();
        assert_eq!(channel.read_packet(&mut buf).unwrap(), ReadOutcome::Hangup);

        channel.write_packet(&[1, 2, 3]).unwrap();
        let mut got = [0u8; 8];
        assert_eq!(theirs.recv(&mut got).unwrap(), 3);

        let counters = channel.counters().unwrap();
        assert_eq!(counters.bytes_in, 4);
        assert_eq!(counters.bytes_out, 3);
    }

    #[test]
    fn path_channel_requires_both_paths_or_socket() {
        let mut channel = DatagramChannel::with_paths("/tmp/a", "/tmp/b");
        assert!(channel.check_options().is_ok());
        assert!(channel.raw_fd().is_none());
    }

    fn connect_with(channel: &mut DatagramChannel) -> (Result<(), ChannelError>, u32, usize) {
        let mut children = SubprocessRegistry::new();
        let mut notifiers = Notifiers::new();
        let env = ScriptEnv::new();
        let mut connectors_running = 0;
        let mut ctx = ConnectContext {
            children: &mut children,
            notifiers: &mut notifiers,
            env: &env,
            connectors_running: &mut connectors_running,
        };
        let result = channel.connect(&mut ctx);
        (result, connectors_running, children.live())
    }

    #[test]
    fn successful_connector_lets_channel_connect() {
        let (ours, _theirs) = UnixDatagram::pair().unwrap();
        let mut channel = DatagramChannel::from_socket("test", ours).unwrap().connector("exit 0");

        let (result, running, live) = connect_with(&mut channel);

        assert!(result.is_ok());
        assert_eq!(running, 0);
        assert_eq!(live, 0);
    }

    #[test]
    fn failing_connector_fails_connect() {
        let (ours, _theirs) = UnixDatagram::pair().unwrap();
        let mut channel = DatagramChannel::from_socket("test", ours).unwrap().connector("exit 3");

        let (result, running, _) = connect_with(&mut channel);

        let err = result.unwrap_err();
        assert!(err.to_string().contains("status 3"), "{err}");
        assert_eq!(running, 0);
    }
}
