//! Process exit codes.
//!
//! The numeric values are part of the daemon's external interface: callers
//! and supervisors switch on them, so they never change.

use std::fmt;

/// Exit status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ExitCode {
    /// Session ended normally
    #[default]
    Ok = 0,
    /// Unrecoverable internal error
    FatalError = 1,
    /// Option parsing or validation failed
    OptionError = 2,
    /// Not running with sufficient privilege
    NotRoot = 3,
    /// Kernel lacks support for the link discipline
    NoKernelSupport = 4,
    /// Terminated by SIGHUP, SIGINT, or SIGTERM
    UserRequest = 5,
    /// Could not lock the serial device
    LockFailed = 6,
    /// Could not open the device
    OpenFailed = 7,
    /// Connect script failed
    ConnectFailed = 8,
    /// Could not run the pty command
    PtyCommandFailed = 9,
    /// Negotiation failed
    NegotiationFailed = 10,
    /// Peer failed to authenticate
    PeerAuthFailed = 11,
    /// Link idle for too long
    IdleTimeout = 12,
    /// Connect-time limit reached
    ConnectTime = 13,
    /// Callback negotiated
    Callback = 14,
    /// Peer stopped answering echo requests
    PeerDead = 15,
    /// Modem hung up
    Hangup = 16,
    /// Loopback detected
    Loopback = 17,
    /// Init script failed
    InitFailed = 18,
    /// We failed to authenticate to the peer
    AuthToPeerFailed = 19,
    /// Traffic limit reached
    TrafficLimit = 20,
    /// CNID authentication failed
    CnidAuthFailed = 21,
    /// Terminated by an abnormal signal
    FatalSignal = 127,
}

impl ExitCode {
    /// Numeric process exit status.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Numeric status as carried in notifications.
    pub fn as_i32(self) -> i32 {
        i32::from(self.as_u8())
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_keep_their_numeric_values() {
        assert_eq!(ExitCode::Ok.as_u8(), 0);
        assert_eq!(ExitCode::UserRequest.as_u8(), 5);
        assert_eq!(ExitCode::Hangup.as_u8(), 16);
        assert_eq!(ExitCode::CnidAuthFailed.as_u8(), 21);
        assert_eq!(ExitCode::FatalSignal.as_i32(), 127);
    }
}
