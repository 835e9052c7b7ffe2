use std::time::{Duration, Instant};

use serde::Serialize;

/// Process-local admission statistics of one destination.
///
/// Counts only what this process decided and live as long as the gate;
/// nothing is persisted or shared with other workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestinationStats {
    /// Requests admitted, including burst admissions
    pub admitted: u64,
    /// Requests admitted above the slot limit, inside a grace window
    pub burst_admitted: u64,
    /// Requests admitted without metering because the lock was unavailable
    pub unmetered: u64,
    /// Requests rejected, including fail-closed lock failures
    pub rejected: u64,
    /// Slots returned
    pub released: u64,
    /// Admission checks or releases that could not take the ledger lock
    pub lock_failures: u64,
    /// Highest in-use count this process has written to the ledger
    pub peak_in_use: u64,
    /// When this process last rejected a request
    #[serde(skip)]
    pub last_rejection: Option<Instant>,
}

impl DestinationStats {
    /// Record an admission; `in_use` is the ledger count after admitting
    pub fn record_admit(&mut self, in_use: u64, burst: bool) {
        self.admitted += 1;
        if burst {
            self.burst_admitted += 1;
        }
        self.peak_in_use = self.peak_in_use.max(in_use);
    }

    /// Record an admission that bypassed the ledger
    pub const fn record_unmetered(&mut self) {
        self.admitted += 1;
        self.unmetered += 1;
    }

    /// Record a rejection
    pub fn record_reject(&mut self) {
        self.rejected += 1;
        self.last_rejection = Some(Instant::now());
    }

    /// Record a returned slot
    pub const fn record_release(&mut self) {
        self.released += 1;
    }

    /// Record a failure to take the ledger lock
    pub const fn record_lock_failure(&mut self) {
        self.lock_failures += 1;
    }

    /// Total admission checks that reached a decision
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.admitted + self.rejected
    }

    /// Share of checks that were rejected, in percent
    #[must_use]
    pub fn rejection_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.rejected as f64 / self.total() as f64;
        rate * 100.0
    }

    /// Time since this process last rejected a request
    #[must_use]
    pub fn since_last_rejection(&self) -> Option<Duration> {
        self.last_rejection.map(|at| at.elapsed())
    }

    /// Human-readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} admitted ({} burst, {} unmetered), {} rejected ({:.1}%), {} released, peak {}",
            self.admitted,
            self.burst_admitted,
            self.unmetered,
            self.rejected,
            self.rejection_rate(),
            self.released,
            self.peak_in_use
        );
        if let Some(since) = self.since_last_rejection() {
            summary.push_str(&format!(", last rejection {}s ago", since.as_secs()));
        }
        summary
    }
}
