//! Global atomic counters for assessment observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free atomic counters.
pub struct Metrics {
    dispatch_attempts: AtomicU64,
    dispatch_retries: AtomicU64,
    trajectories_synthesized: AtomicU64,
    verdicts_recorded: AtomicU64,
    judge_errors: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            dispatch_attempts: AtomicU64::new(0),
            dispatch_retries: AtomicU64::new(0),
            trajectories_synthesized: AtomicU64::new(0),
            verdicts_recorded: AtomicU64::new(0),
            judge_errors: AtomicU64::new(0),
        }
    }

    /// Increment the dispatch-attempts counter by one.
    pub fn inc_dispatch_attempts(&self) {
        self.dispatch_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "dispatch_attempts", "counter incremented");
    }

    /// Increment the dispatch-retries counter by one.
    pub fn inc_dispatch_retries(&self) {
        self.dispatch_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "dispatch_retries", "counter incremented");
    }

    /// Increment the synthesized-trajectories counter by one.
    pub fn inc_trajectories_synthesized(&self) {
        self.trajectories_synthesized.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trajectories_synthesized", "counter incremented");
    }

    /// Increment the verdicts-recorded counter by one.
    pub fn inc_verdicts(&self) {
        self.verdicts_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "verdicts_recorded", "counter incremented");
    }

    /// Increment the judge-errors counter by one.
    pub fn inc_judge_errors(&self) {
        self.judge_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "judge_errors", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            dispatch_attempts = self.dispatch_attempts(),
            dispatch_retries = self.dispatch_retries(),
            trajectories_synthesized = self.trajectories_synthesized(),
            verdicts_recorded = self.verdicts_recorded(),
            judge_errors = self.judge_errors(),
        );
    }

    pub fn dispatch_attempts(&self) -> u64 {
        self.dispatch_attempts.load(Ordering::Relaxed)
    }

    pub fn dispatch_retries(&self) -> u64 {
        self.dispatch_retries.load(Ordering::Relaxed)
    }

    pub fn trajectories_synthesized(&self) -> u64 {
        self.trajectories_synthesized.load(Ordering::Relaxed)
    }

    pub fn verdicts_recorded(&self) -> u64 {
        self.verdicts_recorded.load(Ordering::Relaxed)
    }

    pub fn judge_errors(&self) -> u64 {
        self.judge_errors.load(Ordering::Relaxed)
    }

}
