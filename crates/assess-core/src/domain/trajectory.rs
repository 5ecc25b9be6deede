//! Trajectory data contract: the record of one task execution by one assessee.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of a trajectory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryStatus {
    /// The assessee returned a well-formed execution record. Says nothing
    /// about whether the task was actually accomplished.
    Completed,
    TimedOut,
    Unreachable,
    ExecutionError,
}

impl TrajectoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Unreachable => "unreachable",
            Self::ExecutionError => "execution_error",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TrajectoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one (task, assessee) pair within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub task_id: String,
    pub assessee_id: String,
}

impl PairKey {
    pub fn new(task_id: impl Into<String>, assessee_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            assessee_id: assessee_id.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.task_id, self.assessee_id)
    }
}

/// A discrete action reported by the assessee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    /// Action type tag (e.g. `click`, `input_text`, `navigate`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Free-text description of what the action did.
    pub description: String,

    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Opaque reference to one captured visual-evidence frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceFrame {
    /// Position of the frame within the execution.
    pub index: u32,

    /// External blob reference (path, URL or content digest).
    pub blob_ref: String,
}

impl EvidenceFrame {
    pub fn new(index: u32, blob_ref: impl Into<String>) -> Self {
        Self {
            index,
            blob_ref: blob_ref.into(),
        }
    }
}

/// The complete record of one assessee's attempt at one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trajectory {
    pub task_id: String,
    pub assessee_id: String,
    pub status: TrajectoryStatus,

    /// Ordered, append-only; produced solely by the assessee.
    #[serde(default)]
    pub action_log: Vec<ActionRecord>,

    #[serde(default)]
    pub evidence_frames: Vec<EvidenceFrame>,

    /// The assessee's own closing claim. Never used as judging evidence.
    #[serde(default)]
    pub final_response: Option<String>,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,

    /// Dispatch attempts made, including retries.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Failure detail for non-completed trajectories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_attempts() -> u32 {
    1
}

impl Trajectory {
    /// Build a completed trajectory from an assessee's execution record.
    pub fn completed(
        key: &PairKey,
        action_log: Vec<ActionRecord>,
        evidence_frames: Vec<EvidenceFrame>,
        final_response: Option<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: key.task_id.clone(),
            assessee_id: key.assessee_id.clone(),
            status: TrajectoryStatus::Completed,
            action_log,
            evidence_frames,
            final_response,
            started_at,
            ended_at,
            attempts: 1,
            error: None,
        }
    }

    /// Build a terminal failure trajectory carrying only status and timestamps.
    pub fn terminal(
        key: &PairKey,
        status: TrajectoryStatus,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: key.task_id.clone(),
            assessee_id: key.assessee_id.clone(),
            status,
            action_log: Vec::new(),
            evidence_frames: Vec::new(),
            final_response: None,
            started_at,
            ended_at,
            attempts: 1,
            error: Some(error.into()),
        }
    }

    /// Record how many dispatch attempts produced this trajectory.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(&self.task_id, &self.assessee_id)
    }

    /// Wall-clock duration in milliseconds (never negative).
    pub fn duration_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }
}
