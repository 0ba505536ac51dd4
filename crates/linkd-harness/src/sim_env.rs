//! Virtual-time environment.

use std::{
    cell::Cell,
    io,
    os::fd::RawFd,
    rc::Rc,
    time::{Duration, Instant},
};

use linkd_core::Environment;
use linkd_daemon::SystemEnv;

/// Environment with a shared virtual clock.
///
/// Clones share the clock, so a test can keep one handle while the session
/// owns another.
#[derive(Debug, Clone)]
pub struct SimEnv {
    start: Instant,
    clock: Rc<Cell<Instant>>,
}

impl SimEnv {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        let start = Instant::now();
        Self { start, clock: Rc::new(Cell::new(start)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.set(self.clock.get() + by);
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        self.clock.get() - self.start
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.clock.get()
    }

    /// Poll without blocking. If nothing is ready the clock advances by the
    /// whole timeout, as if the wait had run to completion.
    fn wait_readable(&self, fds: &[RawFd], timeout: Option<Duration>) -> io::Result<usize> {
        let ready = SystemEnv::new().wait_readable(fds, Some(Duration::ZERO))?;
        if ready == 0 {
            if let Some(timeout) = timeout {
                self.advance(timeout);
            }
        }
        Ok(ready)
    }
}
