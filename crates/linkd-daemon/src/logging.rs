//! Log subscriber setup with run-time verbosity control.

use std::fmt;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt};

/// Handle for changing log verbosity after startup.
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogControl {
    /// A handle that controls nothing, for sessions run without a global
    /// subscriber.
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    /// Switch between debug and warning verbosity.
    pub fn set_debug(&self, on: bool) {
        let Some(handle) = &self.handle else {
            return;
        };
        let directive = if on { "debug" } else { "warn" };
        if let Err(err) = handle.reload(EnvFilter::new(directive)) {
            tracing::warn!("failed to change log level: {err}");
        }
    }
}

impl fmt::Debug for LogControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogControl").field("enabled", &self.handle.is_some()).finish()
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides the starting level. If a subscriber is already
/// installed the returned handle does nothing.
pub fn init(debug: bool) -> LogControl {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok();

    LogControl { handle: installed.then_some(handle) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_control_ignores_toggles() {
        let control = LogControl::disabled();
        control.set_debug(true);
        control.set_debug(false);
    }
}
