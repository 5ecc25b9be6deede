//! Append-only result store for trajectories and verdicts.
//!
//! Records are keyed by `(task_id, assessee_id)`; each key may be written at
//! most once per record kind.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ActionRecord, PairKey, PredictedLabel, Trajectory, TrajectoryStatus, Verdict};

pub use fs::JsonlResultStore;
pub use memory::MemoryResultStore;

/// Errors from result store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate {kind} record for {key}")]
    Duplicate { kind: &'static str, key: PairKey },

    /// A fresh run was pointed at a directory that already holds records.
    #[error("{path} already holds {records} records from an earlier run")]
    Occupied { path: String, records: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persisted form of a [`Trajectory`] (one line of `trajectories.jsonl`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryRecord {
    pub task_id: String,
    pub assessee_id: String,
    pub status: TrajectoryStatus,
    #[serde(default)]
    pub action_log: Vec<ActionRecord>,
    #[serde(default)]
    pub evidence_frame_refs: Vec<String>,
    #[serde(default)]
    pub final_response: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrajectoryRecord {
    pub fn key(&self) -> PairKey {
        PairKey::new(&self.task_id, &self.assessee_id)
    }
}

impl From<&Trajectory> for TrajectoryRecord {
    fn from(t: &Trajectory) -> Self {
        Self {
            task_id: t.task_id.clone(),
            assessee_id: t.assessee_id.clone(),
            status: t.status,
            action_log: t.action_log.clone(),
            evidence_frame_refs: t.evidence_frames.iter().map(|f| f.blob_ref.clone()).collect(),
            final_response: t.final_response.clone(),
            started_at: t.started_at,
            ended_at: t.ended_at,
            attempts: t.attempts,
            error: t.error.clone(),
        }
    }
}

/// Persisted form of a [`Verdict`] (one line of `verdicts.jsonl`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerdictRecord {
    pub task_id: String,
    pub assessee_id: String,
    pub predicted_label: PredictedLabel,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub score: Option<f64>,
}

impl VerdictRecord {
    pub fn key(&self) -> PairKey {
        PairKey::new(&self.task_id, &self.assessee_id)
    }
}

impl From<&Verdict> for VerdictRecord {
    fn from(v: &Verdict) -> Self {
        Self {
            task_id: v.task_id().to_string(),
            assessee_id: v.assessee_id().to_string(),
            predicted_label: v.predicted_label,
            key_points: v.key_points.clone(),
            rationale: v.rationale.clone(),
            score: v.score,
        }
    }
}

/// Append-only persistence for run results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append a trajectory. Fails with [`StoreError::Duplicate`] if its pair
    /// already has one.
    async fn append_trajectory(&self, trajectory: &Trajectory) -> StoreResult<()>;

    /// Append a verdict. Fails with [`StoreError::Duplicate`] if its pair
    /// already has one.
    async fn append_verdict(&self, verdict: &Verdict) -> StoreResult<()>;

    /// All trajectory records, in append order.
    async fn trajectories(&self) -> StoreResult<Vec<TrajectoryRecord>>;

    /// All verdict records, in append order.
    async fn verdicts(&self) -> StoreResult<Vec<VerdictRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EvidenceFrame;

    #[test]
    fn test_trajectory_record_keeps_frame_refs_in_order() {
        let key = PairKey::new("t1", "alpha");
        let now = Utc::now();
        let trajectory = Trajectory::completed(
            &key,
            vec![ActionRecord::new("click", "open search")],
            vec![EvidenceFrame::new(0, "blob://a"), EvidenceFrame::new(1, "blob://b")],
            Some("done".into()),
            now,
            now,
        );
        let record = TrajectoryRecord::from(&trajectory);
        assert_eq!(record.evidence_frame_refs, vec!["blob://a", "blob://b"]);
        assert_eq!(record.key(), key);
        assert_eq!(record.attempts, 1);

        let json = serde_json::to_string(&record).unwrap();
        let back: TrajectoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_verdict_record_shape() {
        let verdict = Verdict::judge_error(PairKey::new("t1", "beta"), vec!["kp".into()], "boom");
        let record = VerdictRecord::from(&verdict);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["task_id"], "t1");
        assert_eq!(value["assessee_id"], "beta");
        assert_eq!(value["predicted_label"], "judge_error");
        assert!(value["score"].is_null());
    }

    #[test]
    fn test_verdict_record_keeps_score_bits() {
        for score in [0.1 + 0.2, 1.0 / 3.0, 2.9999999999999996, 3.141592653589793] {
            let verdict = Verdict {
                predicted_label: PredictedLabel::Failure,
                score: Some(score),
                ..Verdict::judge_error(PairKey::new("t1", "beta"), vec![], "scored")
            };
            let record = VerdictRecord::from(&verdict);
            let line = serde_json::to_string(&record).unwrap();
            let back: VerdictRecord = serde_json::from_str(&line).unwrap();
            assert_eq!(back.score.map(f64::to_bits), Some(score.to_bits()));
        }
    }
}
