//! Structured observability hooks for the assessment run lifecycle.
//!
//! This module provides:
//! - A run-scoped tracing span for instrumenting the run future
//! - Emission functions for key lifecycle events: start, phase change,
//!   dispatch, judgment, finish
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::info;

use crate::domain::{PairKey, PredictedLabel, TrajectoryStatus};

/// Span tagged with the run_id, for instrumenting futures.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("assess.run", run_id = %run_id)
}

/// Emit event: run started with its pair count.
pub fn emit_run_started(run_id: &str, tasks: usize, assessees: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        tasks = tasks,
        assessees = assessees,
        pairs = tasks * assessees,
    );
}

/// Emit event: run moved to a new phase.
pub fn emit_phase_changed(run_id: &str, from: &str, to: &str) {
    info!(event = "run.phase_changed", run_id = %run_id, from = %from, to = %to);
}

/// Emit event: a pair's dispatch finished (after retries).
pub fn emit_pair_dispatched(key: &PairKey, status: TrajectoryStatus, attempts: u32, duration_ms: u64) {
    info!(
        event = "pair.dispatched",
        task_id = %key.task_id,
        assessee_id = %key.assessee_id,
        status = %status,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: a pair received its verdict.
pub fn emit_pair_judged(key: &PairKey, label: PredictedLabel, score: Option<f64>) {
    info!(
        event = "pair.judged",
        task_id = %key.task_id,
        assessee_id = %key.assessee_id,
        label = %label,
        score = ?score,
    );
}

/// Emit event: run finished with its overall success rate.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, verdicts: usize, success_rate: Option<f64>) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        verdicts = verdicts,
        success_rate = ?success_rate,
    );
}

/// Emit event: a persisted write failed (warning level).
pub fn emit_store_error(key: &PairKey, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "store.write_error",
        task_id = %key.task_id,
        assessee_id = %key.assessee_id,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_carries_name() {
        let span = run_span("test-run-id");
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "assess.run");
        }
    }
}
