//! Link statistics and connect-time reporting.
//!
//! Counters are sampled from the channel when the first network protocol
//! comes up (the baseline) and again when the link is released. The
//! difference becomes a [`LinkReport`], which is exported to scripts and
//! logged once at shutdown.

use std::time::{Duration, Instant};

/// Raw counters read from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkCounters {
    /// Bytes received
    pub bytes_in: u64,
    /// Bytes sent
    pub bytes_out: u64,
    /// Packets received
    pub packets_in: u64,
    /// Packets sent
    pub packets_out: u64,
}

/// Statistics for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    /// Time since the baseline sample
    pub connect_time: Duration,
    /// Bytes sent since the baseline
    pub bytes_sent: u64,
    /// Bytes received since the baseline
    pub bytes_received: u64,
}

impl LinkReport {
    /// Connect time in minutes with one decimal place.
    pub fn connect_minutes(&self) -> String {
        let tenths = (self.connect_time.as_secs() + 5) / 6;
        format!("{}.{}", tenths / 10, tenths % 10)
    }

    /// Variables exported to scripts.
    pub fn env_vars(&self) -> [(&'static str, String); 3] {
        [
            ("CONNECT_TIME", self.connect_time.as_secs().to_string()),
            ("BYTES_SENT", self.bytes_sent.to_string()),
            ("BYTES_RCVD", self.bytes_received.to_string()),
        ]
    }
}

/// Tracks the baseline and the pending report.
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    start: Option<Instant>,
    baseline: LinkCounters,
    pending: Option<LinkReport>,
}

impl LinkStats {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a new baseline.
    pub fn reset(&mut self, now: Instant, counters: LinkCounters) {
        self.start = Some(now);
        self.baseline = counters;
    }

    /// Compute a report against the baseline and hold it for
    /// [`take_report`](Self::take_report).
    ///
    /// Returns `None` if no baseline was taken.
    pub fn update(&mut self, now: Instant, counters: LinkCounters) -> Option<LinkReport> {
        let start = self.start?;
        let report = LinkReport {
            connect_time: now.saturating_duration_since(start),
            bytes_sent: counters.bytes_out.saturating_sub(self.baseline.bytes_out),
            bytes_received: counters.bytes_in.saturating_sub(self.baseline.bytes_in),
        };
        self.pending = Some(report);
        Some(report)
    }

    /// Take the pending report. Each report is handed out once.
    pub fn take_report(&mut self) -> Option<LinkReport> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_measures_from_baseline() {
        let t0 = Instant::now();
        let mut stats = LinkStats::new();
        stats.reset(t0, LinkCounters { bytes_in: 100, bytes_out: 50, ..Default::default() });

        let report = stats
            .update(t0 + Duration::from_secs(90), LinkCounters {
                bytes_in: 1100,
                bytes_out: 2050,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(report.bytes_received, 1000);
        assert_eq!(report.bytes_sent, 2000);
        assert_eq!(report.connect_minutes(), "1.5");
    }

    #[test]
    fn update_without_baseline_reports_nothing() {
        let mut stats = LinkStats::new();
        assert!(stats.update(Instant::now(), LinkCounters::default()).is_none());
        assert!(stats.take_report().is_none());
    }

    #[test]
    fn report_is_taken_once() {
        let t0 = Instant::now();
        let mut stats = LinkStats::new();
        stats.reset(t0, LinkCounters::default());
        stats.update(t0, LinkCounters::default());

        assert!(stats.take_report().is_some());
        assert!(stats.take_report().is_none());
    }

    #[test]
    fn connect_minutes_rounds_to_tenths() {
        let report = |secs| LinkReport {
            connect_time: Duration::from_secs(secs),
            bytes_sent: 0,
            bytes_received: 0,
        };
        assert_eq!(report(0).connect_minutes(), "0.0");
        assert_eq!(report(3).connect_minutes(), "0.1");
        assert_eq!(report(600).connect_minutes(), "10.0");
    }

    #[test]
    fn env_vars_export_seconds_and_bytes() {
        let report =
            LinkReport { connect_time: Duration::from_secs(42), bytes_sent: 7, bytes_received: 9 };
        let vars = report.env_vars();
        assert_eq!(vars[0], ("CONNECT_TIME", "42".to_string()));
        assert_eq!(vars[1], ("BYTES_SENT", "7".to_string()));
        assert_eq!(vars[2], ("BYTES_RCVD", "9".to_string()));
    }
}
