//! Production environment: wall clock and `poll(2)`.

use std::{
    io,
    os::fd::RawFd,
    time::{Duration, Instant},
};

use linkd_core::Environment;
use nix::{
    errno::Errno,
    libc::c_int,
    poll::{PollFd, PollFlags, poll},
};

/// Real time and real blocking waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create the production environment.
    pub fn new() -> Self {
        Self
    }
}

/// Convert a wait timeout to poll milliseconds, rounding up so a timer due
/// in 0.4ms is not polled with a zero timeout in a busy loop.
fn poll_timeout(timeout: Option<Duration>) -> c_int {
    match timeout {
        None => -1,
        Some(duration) => {
            let millis = duration.as_nanos().div_ceil(1_000_000);
            c_int::try_from(millis).unwrap_or(c_int::MAX)
        },
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait_readable(&self, fds: &[RawFd], timeout: Option<Duration>) -> io::Result<usize> {
        let mut pollfds: Vec<PollFd> = fds.iter().map(|&fd| PollFd::new(fd, PollFlags::POLLIN)).collect();

        match poll(&mut pollfds, poll_timeout(timeout)) {
            Ok(ready) => Ok(ready.max(0) as usize),
            Err(Errno::EINTR) => Ok(0),
            Err(errno) => Err(errno.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, os::fd::AsRawFd, os::unix::net::UnixStream};

    use super::*;

    #[test]
    fn timeout_rounds_up_to_whole_millis() {
        assert_eq!(poll_timeout(None), -1);
        assert_eq!(poll_timeout(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout(Some(Duration::from_micros(400))), 1);
        assert_eq!(poll_timeout(Some(Duration::from_millis(250))), 250);
        assert_eq!(poll_timeout(Some(Duration::MAX)), c_int::MAX);
    }

    #[test]
    fn wait_times_out_with_nothing_ready() {
        let (a, _b) = UnixStream::pair().unwrap();
        let env = SystemEnv::new();

        let ready = env.wait_readable(&[a.as_raw_fd()], Some(Duration::from_millis(10))).unwrap();
        assert_eq!(ready, 0);
    }

    #[test]
    fn wait_returns_when_descriptor_readable() {
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();
        let env = SystemEnv::new();

        let ready = env.wait_readable(&[a.as_raw_fd()], Some(Duration::from_secs(5))).unwrap();
        assert_eq!(ready, 1);
    }
}
