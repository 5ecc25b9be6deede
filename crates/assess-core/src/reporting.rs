use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{LabelMetrics, PairResult, RunMetrics, TaskRanking};
use crate::domain::{PredictedLabel, TrajectoryStatus};

pub const RUN_SUMMARY_JSON: &str = "run_summary.json";
pub const RUN_SUMMARY_MD: &str = "run_summary.md";

/// One pair's outcome in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairSummary {
    pub task_id: String,
    pub assessee_id: String,
    pub status: TrajectoryStatus,
    pub predicted_label: PredictedLabel,
    pub score: Option<f64>,
}

/// A task excluded from the run before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedTask {
    pub task_id: String,
    pub reason: String,
}

/// An endpoint excluded from the run by the readiness check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedEndpoint {
    pub assessee_id: String,
    pub address: String,
    pub reason: String,
}

/// Canonical run summary written once per run as `run_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub aggregate: LabelMetrics,
    pub per_assessee: BTreeMap<String, LabelMetrics>,
    #[serde(default)]
    pub per_task: BTreeMap<String, TaskRanking>,
    pub pairs: Vec<PairSummary>,
    #[serde(default)]
    pub rejected_tasks: Vec<RejectedTask>,
    #[serde(default)]
    pub rejected_endpoints: Vec<RejectedEndpoint>,
}

impl RunSummary {
    /// Assemble the summary; pairs are listed in `(task_id, assessee_id)` order.
    pub fn build(
        run_id: Uuid,
        metrics: RunMetrics,
        results: &[PairResult],
        rejected_tasks: Vec<RejectedTask>,
        rejected_endpoints: Vec<RejectedEndpoint>,
    ) -> Self {
        let mut pairs: Vec<PairSummary> = results
            .iter()
            .map(|r| PairSummary {
                task_id: r.verdict.task_id().to_string(),
                assessee_id: r.verdict.assessee_id().to_string(),
                status: r.trajectory.status,
                predicted_label: r.verdict.predicted_label,
                score: r.verdict.score,
            })
            .collect();
        pairs.sort_by(|a, b| {
            (a.task_id.as_str(), a.assessee_id.as_str()).cmp(&(b.task_id.as_str(), b.assessee_id.as_str()))
        });

        Self {
            run_id,
            generated_at: Utc::now(),
            aggregate: metrics.aggregate,
            per_assessee: metrics.per_assessee,
            per_task: metrics.per_task,
            pairs,
            rejected_tasks,
            rejected_endpoints,
        }
    }
}

/// Write run_summary.json in pretty JSON format.
pub fn write_run_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    let content = serde_json::to_string_pretty(summary).context("serialize run summary")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Read a previously written run_summary.json.
pub fn read_run_summary_json(path: &Path) -> Result<RunSummary> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {:?}", path))
}

fn fmt_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "n/a".to_string(),
    }
}

fn fmt_ms(ms: Option<f64>) -> String {
    match ms {
        Some(ms) => format!("{:.0} ms", ms),
        None => "n/a".to_string(),
    }
}

fn fmt_actions(actions: Option<f64>) -> String {
    actions.map_or_else(|| "n/a".to_string(), |a| format!("{a:.1}"))
}

fn fmt_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.2}"))
}

fn metrics_row(name: &str, m: &LabelMetrics) -> String {
    format!(
        "| {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
        name,
        m.success,
        m.failure,
        m.not_executable,
        m.judge_error,
        m.total,
        fmt_rate(m.success_rate),
        fmt_ms(m.mean_duration_ms),
        fmt_actions(m.mean_actions)
    )
}

/// Render the label-count tables shared by run summaries and `summarize`.
pub fn render_metrics_md(aggregate: &LabelMetrics, per_assessee: &BTreeMap<String, LabelMetrics>) -> String {
    let mut out = String::new();
    out.push_str("| assessee | success | failure | not_executable | judge_error | total | success rate | mean duration | mean actions |\n");
    out.push_str("|---|---|---|---|---|---|---|---|---|\n");
    for (id, m) in per_assessee {
        out.push_str(&metrics_row(&format!("`{id}`"), m));
    }
    out.push_str(&metrics_row("**all**", aggregate));
    out.push('\n');
    out.push_str(&format!(
        "Decisive verdicts: {}\n",
        fmt_rate(aggregate.decisive_share())
    ));
    out
}

/// Render markdown summary for terminal or PR output.
pub fn render_run_summary_md(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Assessment Run `{}`\n\n", summary.run_id));
    out.push_str(&format!("Generated at {}\n\n", summary.generated_at.to_rfc3339()));

    out.push_str("## Metrics\n\n");
    out.push_str(&render_metrics_md(&summary.aggregate, &summary.per_assessee));
    out.push('\n');

    if !summary.per_task.is_empty() {
        out.push_str("## Tasks\n\n");
        out.push_str("| task | best | worst |\n|---|---|---|\n");
        for (task_id, ranking) in &summary.per_task {
            out.push_str(&format!(
                "| `{}` | {} | {} |\n",
                task_id,
                ranking.best.as_deref().unwrap_or("-"),
                ranking.worst.as_deref().unwrap_or("-")
            ));
        }
        out.push('\n');
    }

    out.push_str("## Pairs\n\n");
    out.push_str("| task | assessee | status | verdict | score |\n|---|---|---|---|---|\n");
    for pair in &summary.pairs {
        out.push_str(&format!(
            "| `{}` | `{}` | {} | {} | {} |\n",
            pair.task_id,
            pair.assessee_id,
            pair.status,
            pair.predicted_label,
            fmt_score(pair.score)
        ));
    }

    if !summary.rejected_tasks.is_empty() {
        out.push_str("\n## Rejected Tasks\n");
        for t in &summary.rejected_tasks {
            out.push_str(&format!("- `{}`: {}\n", t.task_id, t.reason));
        }
    }
    if !summary.rejected_endpoints.is_empty() {
        out.push_str("\n## Rejected Endpoints\n");
        for e in &summary.rejected_endpoints {
            out.push_str(&format!("- `{}` ({}): {}\n", e.assessee_id, e.address, e.reason));
        }
    }
    out
}

/// Write run_summary.md.
pub fn write_run_summary_md(path: &Path, summary: &RunSummary) -> Result<()> {
    let md = render_run_summary_md(summary);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
