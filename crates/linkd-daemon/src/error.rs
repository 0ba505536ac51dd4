//! Daemon error types.

use std::{io, path::PathBuf};

use linkd_core::{CoreError, ExitCode};
use nix::{errno::Errno, sys::signal::Signal};
use thiserror::Error;

/// Errors from installing the signal bridge.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Wakeup pipe could not be created
    #[error("failed to create wakeup pipe: {0}")]
    Pipe(#[source] Errno),

    /// A handler could not be installed
    #[error("failed to install handler for {signal}: {source}")]
    Install {
        /// Signal being installed
        signal: Signal,
        /// Underlying error
        #[source]
        source: Errno,
    },
}

/// Errors from launching or supervising child processes.
#[derive(Debug, Error)]
pub enum SubprocessError {
    /// Process could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Waiting on a started process failed
    #[error("error waiting for {program} (pid {pid}): {source}")]
    Wait {
        /// Program name
        program: String,
        /// Child pid
        pid: u32,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Errors reported by link channels.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// I/O on the underlying device failed
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    /// Device-specific options are invalid
    #[error("invalid channel options: {0}")]
    Options(String),

    /// Connecting the link failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// The channel does not support the requested operation
    #[error("{0} not supported by this channel")]
    Unsupported(&'static str),

    /// A connector script failed to run
    #[error(transparent)]
    Connector(#[from] SubprocessError),
}

/// Errors from the radius realms file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RealmError {
    /// File could not be read
    #[error("cannot read {path}: {reason}")]
    Read {
        /// File path
        path: PathBuf,
        /// Error text
        reason: String,
    },

    /// A line does not parse
    #[error("{path} line {line}: {reason}")]
    Parse {
        /// File path
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// What is wrong
        reason: String,
    },
}

/// Errors writing pid files.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// File could not be written
    #[error("failed to create pid file {path}: {source}")]
    Write {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Errors that prevent a session from starting.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Signal handling could not be set up
    #[error(transparent)]
    Signals(#[from] SignalError),

    /// Protocol or channel options are invalid
    #[error("option error: {0}")]
    Options(String),

    /// The channel failed during setup
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The platform lacks support for the channel
    #[error("this system lacks kernel support for {0}")]
    NoKernelSupport(String),
}

impl SessionError {
    /// Process exit status for a session that failed to start.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Options(_) | Self::Channel(ChannelError::Options(_)) => ExitCode::OptionError,
            Self::NoKernelSupport(_) | Self::Channel(ChannelError::Unsupported(_)) => ExitCode::NoKernelSupport,
            Self::Signals(_) | Self::Channel(_) => ExitCode::FatalError,
        }
    }
}

impl From<CoreError> for SessionError {
    fn from(err: CoreError) -> Self {
        Self::Options(err.to_string())
    }
}
