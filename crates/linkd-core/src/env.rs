//! Environment abstraction for time and readiness waits.
//!
//! The session loop never calls `Instant::now()` or `poll(2)` directly. It
//! asks its [`Environment`], so production can block on real descriptors
//! while simulation advances a virtual clock instead of sleeping.

use std::{
    io,
    os::fd::RawFd,
    time::{Duration, Instant},
};

/// Source of time and blocking waits for the session loop.
pub trait Environment {
    /// Current time.
    fn now(&self) -> Instant;

    /// Block until one of `fds` is readable, `timeout` elapses, or a signal
    /// interrupts the wait.
    ///
    /// `None` waits indefinitely. Returns the number of readable
    /// descriptors; zero means the wait timed out or was interrupted.
    fn wait_readable(&self, fds: &[RawFd], timeout: Option<Duration>) -> io::Result<usize>;
}
