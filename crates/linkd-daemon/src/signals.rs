//! Signal bridge: async signals become flags the event loop polls.
//!
//! # Architecture: Self-Pipe
//!
//! Handlers do the minimum that is safe in signal context: store to an
//! atomic flag and write one byte to a non-blocking pipe. The read end of
//! that pipe sits in the event loop's wait set, so a signal that lands while
//! the loop is blocked wakes it immediately, and a signal that lands just
//! before the loop blocks leaves a byte behind that makes the wait return at
//! once.
//!
//! ```text
//!  SIGHUP ─┐
//!  SIGTERM ┼─> handler ──> FLAG.store(true) ──> write(pipe, 1 byte)
//!  SIGCHLD ┘                                         │
//!                                                    ▼
//!  event loop: drain() ─> has_pending()? ─> wait_readable([pipe, ...])
//!              take() ──> act on flags
//! ```
//!
//! # Abnormal Signals
//!
//! Faults and other abnormal signals (SIGSEGV, SIGQUIT, SIGPIPE, ...) are
//! recorded the same way and turned into an orderly shutdown by the loop.
//! A second abnormal signal, or any abnormal signal after shutdown has
//! begun, aborts the process on the spot. Synchronous faults re-fault as
//! soon as the handler returns, so they take the abort path on their second
//! delivery.

use std::{
    os::fd::RawFd,
    sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
};

use nix::{
    fcntl::OFlag,
    libc::c_int,
    sys::signal::{SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, sigaction},
    unistd,
};

use crate::error::SignalError;

static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static HANGUP: AtomicBool = AtomicBool::new(false);
static TERMINATE: AtomicI32 = AtomicI32::new(0);
static CHILD: AtomicBool = AtomicBool::new(false);
static DEBUG_TOGGLES: AtomicU32 = AtomicU32::new(0);
static REOPEN_COMPRESSION: AtomicBool = AtomicBool::new(false);
static FATAL: AtomicI32 = AtomicI32::new(0);
static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

const LOOP: [Signal; 6] =
    [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM, Signal::SIGCHLD, Signal::SIGUSR1, Signal::SIGUSR2];

const ABNORMAL: [Signal; 15] = [
    Signal::SIGABRT,
    Signal::SIGALRM,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGIO,
    Signal::SIGPIPE,
    Signal::SIGPROF,
    Signal::SIGQUIT,
    Signal::SIGSEGV,
    Signal::SIGSYS,
    Signal::SIGTRAP,
    Signal::SIGVTALRM,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
];

fn wake(signo: c_int) {
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let _ = unistd::write(fd, &[signo as u8]);
    }
}

extern "C" fn on_hangup(signo: c_int) {
    HANGUP.store(true, Ordering::SeqCst);
    wake(signo);
}

extern "C" fn on_terminate(signo: c_int) {
    TERMINATE.store(signo, Ordering::SeqCst);
    wake(signo);
}

extern "C" fn on_child(signo: c_int) {
    CHILD.store(true, Ordering::SeqCst);
    wake(signo);
}

extern "C" fn on_debug_toggle(signo: c_int) {
    DEBUG_TOGGLES.fetch_add(1, Ordering::SeqCst);
    wake(signo);
}

extern "C" fn on_reopen_compression(signo: c_int) {
    REOPEN_COMPRESSION.store(true, Ordering::SeqCst);
    wake(signo);
}

extern "C" fn on_abnormal(signo: c_int) {
    if SHUTTING_DOWN.load(Ordering::SeqCst) || FATAL.swap(signo, Ordering::SeqCst) != 0 {
        std::process::abort();
    }
    wake(signo);
}

/// Signals observed since the last [`SignalBridge::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingSignals {
    /// SIGHUP arrived
    pub hangup: bool,
    /// SIGINT or SIGTERM arrived (the later one wins)
    pub terminate: Option<Signal>,
    /// SIGCHLD arrived
    pub child_exited: bool,
    /// Number of SIGUSR1 deliveries
    pub debug_toggles: u32,
    /// SIGUSR2 arrived
    pub reopen_compression: bool,
    /// An abnormal signal arrived
    pub fatal: Option<Signal>,
}

impl PendingSignals {
    /// Whether nothing arrived.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Installed signal handlers plus the wakeup pipe.
///
/// Only one bridge should exist at a time; the handlers are process-wide.
/// Dropping the bridge stops wakeups and closes the pipe but leaves the
/// handlers installed, so late signals are still recorded rather than
/// falling back to their default action. The handled signals are blocked on
/// the dropping thread while the pipe is torn down, so no handler on that
/// thread writes to a descriptor number that is being released.
#[derive(Debug)]
pub struct SignalBridge {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl SignalBridge {
    /// Create the wakeup pipe, clear all flags, and install handlers.
    ///
    /// SIGPIPE counts as abnormal. Socket sends use `MSG_NOSIGNAL`, so a
    /// dead peer still surfaces as a write error rather than a signal.
    pub fn install() -> Result<Self, SignalError> {
        let (read_fd, write_fd) =
            unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK).map_err(SignalError::Pipe)?;
        let bridge = Self { read_fd, write_fd };

        HANGUP.store(false, Ordering::SeqCst);
        TERMINATE.store(0, Ordering::SeqCst);
        CHILD.store(false, Ordering::SeqCst);
        DEBUG_TOGGLES.store(0, Ordering::SeqCst);
        REOPEN_COMPRESSION.store(false, Ordering::SeqCst);
        FATAL.store(0, Ordering::SeqCst);
        SHUTTING_DOWN.store(false, Ordering::SeqCst);
        WAKE_FD.store(write_fd, Ordering::SeqCst);

        // Block the loop signals while any handler runs
        let mut mask = SigSet::empty();
        for signal in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM, Signal::SIGCHLD, Signal::SIGUSR2] {
            mask.add(signal);
        }

        let handlers: [(Signal, extern "C" fn(c_int)); 6] = [
            (Signal::SIGHUP, on_hangup),
            (Signal::SIGINT, on_terminate),
            (Signal::SIGTERM, on_terminate),
            (Signal::SIGCHLD, on_child),
            (Signal::SIGUSR1, on_debug_toggle),
            (Signal::SIGUSR2, on_reopen_compression),
        ];
        for (signal, handler) in handlers {
            install_handler(signal, SigHandler::Handler(handler), mask)?;
        }
        for signal in ABNORMAL {
            install_handler(signal, SigHandler::Handler(on_abnormal), mask)?;
        }

        tracing::debug!(read_fd, write_fd, "signal handlers installed");
        Ok(bridge)
    }

    /// Read end of the wakeup pipe, for the loop's wait set.
    pub fn wake_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Discard queued wakeup bytes. Returns how many were read.
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match unistd::read(self.read_fd, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
        total
    }

    /// Whether any flag is set, without clearing it.
    pub fn has_pending(&self) -> bool {
        HANGUP.load(Ordering::SeqCst)
            || TERMINATE.load(Ordering::SeqCst) != 0
            || CHILD.load(Ordering::SeqCst)
            || DEBUG_TOGGLES.load(Ordering::SeqCst) != 0
            || REOPEN_COMPRESSION.load(Ordering::SeqCst)
            || FATAL.load(Ordering::SeqCst) != 0
    }

    /// Clear and return every flag.
    ///
    /// The fatal flag is reported but stays armed so a repeat delivery
    /// aborts.
    pub fn take(&self) -> PendingSignals {
        let signal = |signo: i32| if signo == 0 { None } else { Signal::try_from(signo).ok() };
        PendingSignals {
            hangup: HANGUP.swap(false, Ordering::SeqCst),
            terminate: signal(TERMINATE.swap(0, Ordering::SeqCst)),
            child_exited: CHILD.swap(false, Ordering::SeqCst),
            debug_toggles: DEBUG_TOGGLES.swap(0, Ordering::SeqCst),
            reopen_compression: REOPEN_COMPRESSION.swap(false, Ordering::SeqCst),
            fatal: signal(FATAL.load(Ordering::SeqCst)),
        }
    }

    /// Mark the start of shutdown. Abnormal signals from here on abort.
    pub fn begin_shutdown(&self) {
        SHUTTING_DOWN.store(true, Ordering::SeqCst);
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        let mut handled = SigSet::empty();
        for signal in LOOP.into_iter().chain(ABNORMAL) {
            handled.add(signal);
        }
        let previous = handled.thread_swap_mask(SigmaskHow::SIG_BLOCK);

        let _ = WAKE_FD.compare_exchange(self.write_fd, -1, Ordering::SeqCst, Ordering::SeqCst);
        let _ = unistd::close(self.write_fd);
        let _ = unistd::close(self.read_fd);

        match previous {
            Ok(previous) => {
                let _ = previous.thread_set_mask();
            },
            Err(err) => tracing::warn!("could not block signals while closing the wakeup pipe: {err}"),
        }
    }
}

#[allow(unsafe_code)]
fn install_handler(signal: Signal, handler: SigHandler, mask: SigSet) -> Result<(), SignalError> {
    let action = SigAction::new(handler, SaFlags::empty(), mask);
    // SAFETY: the handlers installed here only touch atomics, call write(2)
    // on a descriptor published before installation, or abort.
    unsafe { sigaction(signal, &action) }
        .map(drop)
        .map_err(|source| SignalError::Install { signal, source })
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::raise;
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn hangup_sets_flag_and_wakes_pipe() {
        let bridge = SignalBridge::install().unwrap();
        assert!(!bridge.has_pending());

        raise(Signal::SIGHUP).unwrap();

        assert!(bridge.has_pending());
        assert!(bridge.drain() >= 1);
        let pending = bridge.take();
        assert!(pending.hangup);
        assert!(!bridge.has_pending());
    }

    #[test]
    #[serial]
    fn terminate_reports_which_signal() {
        let bridge = SignalBridge::install().unwrap();

        raise(Signal::SIGINT).unwrap();
        assert_eq!(bridge.take().terminate, Some(Signal::SIGINT));

        raise(Signal::SIGTERM).unwrap();
        assert_eq!(bridge.take().terminate, Some(Signal::SIGTERM));
    }

    #[test]
    #[serial]
    fn take_clears_flags() {
        let bridge = SignalBridge::install().unwrap();

        raise(Signal::SIGUSR2).unwrap();
        raise(Signal::SIGUSR1).unwrap();
        raise(Signal::SIGUSR1).unwrap();

        let pending = bridge.take();
        assert!(pending.reopen_compression);
        assert_eq!(pending.debug_toggles, 2);
        assert!(bridge.take().is_empty());
    }

    #[test]
    #[serial]
    fn drain_on_empty_pipe_returns_zero() {
        let bridge = SignalBridge::install().unwrap();
        assert_eq!(bridge.drain(), 0);
    }

    #[test]
    #[serial]
    fn sigpipe_is_reported_as_abnormal() {
        let bridge = SignalBridge::install().unwrap();

        raise(Signal::SIGPIPE).unwrap();

        assert!(bridge.has_pending());
        assert_eq!(bridge.take().fatal, Some(Signal::SIGPIPE));
    }

    #[test]
    #[serial]
    fn signal_after_drop_does_not_reach_a_reused_pipe() {
        let bridge = SignalBridge::install().unwrap();
        drop(bridge);
        assert!(!SigSet::thread_get_mask().unwrap().contains(Signal::SIGHUP), "mask restored after drop");

        let (read_fd, write_fd) = unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK).unwrap();
        raise(Signal::SIGHUP).unwrap();

        let mut buf = [0u8; 8];
        assert!(unistd::read(read_fd, &mut buf).is_err(), "late signal wrote into an unrelated pipe");
        assert!(HANGUP.load(Ordering::SeqCst), "handler stays installed after drop");
        unistd::close(read_fd).unwrap();
        unistd::close(write_fd).unwrap();
    }

    #[test]
    #[serial]
    fn reinstall_clears_stale_flags() {
        {
            let _bridge = SignalBridge::install().unwrap();
            raise(Signal::SIGHUP).unwrap();
        }
        let bridge = SignalBridge::install().unwrap();
        assert!(!bridge.has_pending());
    }
}
