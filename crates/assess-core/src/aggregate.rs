//! Metric reductions over judged pairs.
//!
//! Everything here is pure and recomputed from scratch on every call, so the
//! result does not depend on the order pairs finished in.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{PredictedLabel, Trajectory, Verdict};
use crate::store::VerdictRecord;

/// A trajectory together with its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct PairResult {
    pub trajectory: Trajectory,
    pub verdict: Verdict,
}

/// Label counts and derived rates for one assessee, or for a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LabelMetrics {
    pub success: usize,
    pub failure: usize,
    pub not_executable: usize,
    pub judge_error: usize,
    pub total: usize,

    /// `success / (success + failure)`, or `None` when nothing was decisive.
    pub success_rate: Option<f64>,

    /// Mean wall-clock duration of completed trajectories.
    pub mean_duration_ms: Option<f64>,

    /// Mean action-log length of completed trajectories.
    #[serde(default)]
    pub mean_actions: Option<f64>,
}

impl LabelMetrics {
    /// Share of all pairs that reached a decisive verdict.
    pub fn decisive_share(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.success + self.failure) as f64 / self.total as f64)
    }
}

/// Best and worst performing assessee for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskRanking {
    pub best: Option<String>,
    pub worst: Option<String>,
}

/// Everything the aggregator derives from a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    pub aggregate: LabelMetrics,
    pub per_assessee: BTreeMap<String, LabelMetrics>,
    pub per_task: BTreeMap<String, TaskRanking>,
}

#[derive(Default)]
struct Accumulator {
    metrics: LabelMetrics,
    duration_sum: u64,
    action_sum: usize,
    completed: usize,
}

impl Accumulator {
    fn record(&mut self, label: PredictedLabel, execution: Option<Execution>) {
        match label {
            PredictedLabel::Success => self.metrics.success += 1,
            PredictedLabel::Failure => self.metrics.failure += 1,
            PredictedLabel::NotExecutable => self.metrics.not_executable += 1,
            PredictedLabel::JudgeError => self.metrics.judge_error += 1,
        }
        self.metrics.total += 1;
        if let Some(execution) = execution {
            self.duration_sum += execution.duration_ms;
            self.action_sum += execution.actions;
            self.completed += 1;
        }
    }

    fn finish(self) -> LabelMetrics {
        let mut metrics = self.metrics;
        let decisive = metrics.success + metrics.failure;
        metrics.success_rate = (decisive > 0).then(|| metrics.success as f64 / decisive as f64);
        if self.completed > 0 {
            let completed = self.completed as f64;
            metrics.mean_duration_ms = Some(self.duration_sum as f64 / completed);
            metrics.mean_actions = Some(self.action_sum as f64 / completed);
        }
        metrics
    }
}

/// One row fed to the reducers.
struct Observation<'a> {
    task_id: &'a str,
    assessee_id: &'a str,
    label: PredictedLabel,
    score: Option<f64>,
    /// Present only for completed trajectories.
    execution: Option<Execution>,
}

#[derive(Clone, Copy)]
struct Execution {
    duration_ms: u64,
    actions: usize,
}

/// Rank for best/worst selection; `None` means the verdict is not ranked.
fn label_rank(label: PredictedLabel) -> Option<u8> {
    match label {
        PredictedLabel::Success => Some(2),
        PredictedLabel::Failure => Some(1),
        PredictedLabel::NotExecutable => Some(0),
        PredictedLabel::JudgeError => None,
    }
}

fn compare_performance(a: (u8, Option<f64>), b: (u8, Option<f64>)) -> Ordering {
    let score = |s: Option<f64>| s.unwrap_or(f64::NEG_INFINITY);
    a.0.cmp(&b.0).then_with(|| score(a.1).total_cmp(&score(b.1)))
}

fn rank_task(mut entries: Vec<(&str, u8, Option<f64>)>) -> TaskRanking {
    // Ascending id so the first strictly better/worse entry wins ties.
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut best: Option<&(&str, u8, Option<f64>)> = None;
    let mut worst: Option<&(&str, u8, Option<f64>)> = None;
    for entry in &entries {
        let perf = (entry.1, entry.2);
        if best.map_or(true, |b| compare_performance(perf, (b.1, b.2)) == Ordering::Greater) {
            best = Some(entry);
        }
        if worst.map_or(true, |w| compare_performance(perf, (w.1, w.2)) == Ordering::Less) {
            worst = Some(entry);
        }
    }

    TaskRanking {
        best: best.map(|e| e.0.to_string()),
        worst: worst.map(|e| e.0.to_string()),
    }
}

fn reduce<'a>(observations: impl IntoIterator<Item = Observation<'a>>) -> RunMetrics {
    let mut overall = Accumulator::default();
    let mut per_assessee: BTreeMap<&str, Accumulator> = BTreeMap::new();
    let mut per_task: BTreeMap<&str, Vec<(&str, u8, Option<f64>)>> = BTreeMap::new();

    for obs in observations {
        overall.record(obs.label, obs.execution);
        per_assessee
            .entry(obs.assessee_id)
            .or_default()
            .record(obs.label, obs.execution);

        let ranked = per_task.entry(obs.task_id).or_default();
        if let Some(rank) = label_rank(obs.label) {
            ranked.push((obs.assessee_id, rank, obs.score));
        }
    }

    RunMetrics {
        aggregate: overall.finish(),
        per_assessee: per_assessee
            .into_iter()
            .map(|(id, acc)| (id.to_string(), acc.finish()))
            .collect(),
        per_task: per_task
            .into_iter()
            .map(|(id, entries)| (id.to_string(), rank_task(entries)))
            .collect(),
    }
}

/// Reduce judged pairs into per-assessee and aggregate metrics.
pub fn aggregate(results: &[PairResult]) -> RunMetrics {
    reduce(results.iter().map(|r| Observation {
        task_id: r.verdict.task_id(),
        assessee_id: r.verdict.assessee_id(),
        label: r.verdict.predicted_label,
        score: r.verdict.score,
        execution: r.trajectory.status.is_completed().then(|| Execution {
            duration_ms: r.trajectory.duration_ms(),
            actions: r.trajectory.action_log.len(),
        }),
    }))
}

/// Recompute counts and rates from persisted verdicts alone.
///
/// Execution details are not part of the verdict record, so
/// `mean_duration_ms` and `mean_actions` are always `None`.
pub fn summarize_verdicts(verdicts: &[VerdictRecord]) -> RunMetrics {
    reduce(verdicts.iter().map(|v| Observation {
        task_id: &v.task_id,
        assessee_id: &v.assessee_id,
        label: v.predicted_label,
        score: v.score,
        execution: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionRecord, PairKey, TrajectoryStatus};
    use chrono::{Duration, Utc};

    fn pair(task: &str, assessee: &str, label: PredictedLabel, score: Option<f64>) -> PairResult {
        let key = PairKey::new(task, assessee);
        let start = Utc::now();
        let trajectory = if label == PredictedLabel::NotExecutable {
            Trajectory::terminal(&key, TrajectoryStatus::Unreachable, start, start, "down")
        } else {
            Trajectory::completed(&key, vec![], vec![], None, start, start + Duration::milliseconds(100))
        };
        let mut verdict = Verdict::judge_error(key, vec![], "");
        verdict.predicted_label = label;
        verdict.score = score;
        PairResult { trajectory, verdict }
    }

    #[test]
    fn test_success_rate_excludes_non_decisive() {
        let metrics = aggregate(&[
            pair("t1", "a", PredictedLabel::Success, Some(4.0)),
            pair("t1", "b", PredictedLabel::Failure, Some(1.0)),
            pair("t1", "c", PredictedLabel::NotExecutable, None),
            pair("t2", "c", PredictedLabel::JudgeError, None),
        ]);
        assert_eq!(metrics.aggregate.total, 4);
        assert_eq!(metrics.aggregate.success_rate, Some(0.5));
        assert_eq!(metrics.aggregate.judge_error, 1);
        assert_eq!(metrics.per_assessee["c"].success_rate, None);
        assert_eq!(metrics.per_assessee["c"].total, 2);
    }

    #[test]
    fn test_mean_duration_over_completed_only() {
        let metrics = aggregate(&[
            pair("t1", "a", PredictedLabel::Success, None),
            pair("t2", "a", PredictedLabel::NotExecutable, None),
        ]);
        assert_eq!(metrics.per_assessee["a"].mean_duration_ms, Some(100.0));

        let down = aggregate(&[pair("t1", "z", PredictedLabel::NotExecutable, None)]);
        assert_eq!(down.per_assessee["z"].mean_duration_ms, None);
    }

    #[test]
    fn test_mean_actions_over_completed_only() {
        let mut clicks = pair("t1", "a", PredictedLabel::Success, None);
        clicks.trajectory.action_log = vec![
            ActionRecord::new("click", "open search"),
            ActionRecord::new("click", "pick result"),
            ActionRecord::new("input_text", "type destination"),
        ];
        let idle = pair("t2", "a", PredictedLabel::Failure, None);
        let mut down = pair("t3", "a", PredictedLabel::NotExecutable, None);
        down.trajectory.action_log = vec![ActionRecord::new("click", "never counted")];

        let metrics = aggregate(&[clicks, idle, down]);
        assert_eq!(metrics.per_assessee["a"].mean_actions, Some(1.5));
        assert_eq!(metrics.aggregate.mean_actions, Some(1.5));

        let unreachable = aggregate(&[pair("t1", "z", PredictedLabel::NotExecutable, None)]);
        assert_eq!(unreachable.per_assessee["z"].mean_actions, None);
        assert_eq!(summarize_verdicts(&[]).aggregate.mean_actions, None);
    }

    #[test]
    fn test_empty_input() {
        let metrics = aggregate(&[]);
        assert_eq!(metrics.aggregate.total, 0);
        assert_eq!(metrics.aggregate.success_rate, None);
        assert!(metrics.per_assessee.is_empty());
    }

    #[test]
    fn test_best_worst_ordering() {
        let metrics = aggregate(&[
            pair("t1", "a", PredictedLabel::Failure, Some(2.0)),
            pair("t1", "b", PredictedLabel::Success, Some(3.5)),
            pair("t1", "c", PredictedLabel::Success, Some(4.5)),
            pair("t1", "d", PredictedLabel::NotExecutable, None),
            pair("t1", "e", PredictedLabel::JudgeError, None),
        ]);
        let ranking = &metrics.per_task["t1"];
        assert_eq!(ranking.best.as_deref(), Some("c"));
        assert_eq!(ranking.worst.as_deref(), Some("d"));
    }

    #[test]
    fn test_ties_break_to_smallest_id() {
        let metrics = aggregate(&[
            pair("t1", "zeta", PredictedLabel::Success, None),
            pair("t1", "alpha", PredictedLabel::Success, None),
        ]);
        let ranking = &metrics.per_task["t1"];
        assert_eq!(ranking.best.as_deref(), Some("alpha"));
        assert_eq!(ranking.worst.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_only_judge_errors_leave_task_unranked() {
        let metrics = aggregate(&[pair("t1", "a", PredictedLabel::JudgeError, None)]);
        assert_eq!(metrics.per_task["t1"], TaskRanking::default());
    }

    #[test]
    fn test_order_independent() {
        let mut pairs = vec![
            pair("t1", "a", PredictedLabel::Success, Some(3.0)),
            pair("t1", "b", PredictedLabel::Failure, Some(1.0)),
            pair("t2", "a", PredictedLabel::Failure, Some(2.0)),
        ];
        let forward = aggregate(&pairs);
        pairs.reverse();
        assert_eq!(aggregate(&pairs), forward);
    }

    #[test]
    fn test_summarize_verdicts_matches_counts() {
        let pairs = vec![
            pair("t1", "a", PredictedLabel::Success, Some(3.0)),
            pair("t1", "b", PredictedLabel::NotExecutable, None),
        ];
        let records: Vec<VerdictRecord> = pairs.iter().map(|p| VerdictRecord::from(&p.verdict)).collect();
        let summary = summarize_verdicts(&records);
        assert_eq!(summary.aggregate.success, 1);
        assert_eq!(summary.aggregate.not_executable, 1);
        assert_eq!(summary.aggregate.success_rate, Some(1.0));
        assert_eq!(summary.aggregate.mean_duration_ms, None);
        assert_eq!(summary.per_task["t1"].best.as_deref(), Some("a"));
    }
}
