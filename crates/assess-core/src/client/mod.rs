//! Assessee client: one blocking round trip per task execution.
//!
//! # Module layout
//!
//! - [`http`]: `HttpAssesseeClient`, the `reqwest` implementation
//! - [`readiness`]: `check_readiness`, bounded-retry readiness probing

pub mod http;
pub mod readiness;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ActionRecord, AssesseeEndpoint, EvidenceFrame, PairKey, Task, Trajectory, TrajectoryStatus,
};

/// Why a dispatch call did not yield a completed execution record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("assessee timed out: {0}")]
    TimedOut(String),

    #[error("assessee unreachable: {0}")]
    Unreachable(String),

    /// Deterministic application-level fault; never retried.
    #[error("assessee execution error: {0}")]
    ExecutionError(String),
}

impl ExecutionFailure {
    /// Only network-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Unreachable(_))
    }

    /// Trajectory status recorded when this failure is terminal.
    pub fn status(&self) -> TrajectoryStatus {
        match self {
            Self::TimedOut(_) => TrajectoryStatus::TimedOut,
            Self::Unreachable(_) => TrajectoryStatus::Unreachable,
            Self::ExecutionError(_) => TrajectoryStatus::ExecutionError,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::TimedOut(d) | Self::Unreachable(d) | Self::ExecutionError(d) => d,
        }
    }
}

/// Wire request sent to an assessee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssesseeRequest {
    pub task_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_context: Option<String>,
}

impl From<&Task> for AssesseeRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            description: task.description.clone(),
            start_context: task.start_context.clone(),
        }
    }
}

/// Execution status as reported by the assessee itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Completed,
    Failed,
}

/// Wire response returned by an assessee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssesseeResponse {
    pub status: ReportedStatus,
    #[serde(default)]
    pub action_log: Vec<ActionRecord>,
    #[serde(default)]
    pub evidence_frames: Vec<EvidenceFrame>,
    #[serde(default)]
    pub final_response: Option<String>,
    /// Failure detail when `status` is `failed`.
    #[serde(default)]
    pub error: Option<String>,
}

impl AssesseeResponse {
    /// Convert into a completed trajectory.
    ///
    /// An assessee-reported `failed` status is an application fault and maps
    /// to [`ExecutionFailure::ExecutionError`].
    pub fn into_trajectory(
        self,
        key: &PairKey,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<Trajectory, ExecutionFailure> {
        match self.status {
            ReportedStatus::Completed => Ok(Trajectory::completed(
                key,
                self.action_log,
                self.evidence_frames,
                self.final_response,
                started_at,
                ended_at,
            )),
            ReportedStatus::Failed => Err(ExecutionFailure::ExecutionError(
                self.error
                    .unwrap_or_else(|| "assessee reported failure".to_string()),
            )),
        }
    }
}

/// Transport to assessee endpoints.
///
/// Implement this trait to plug in a real transport or a test stub.
#[async_trait]
pub trait AssesseeClient: Send + Sync {
    /// Send one task and wait at most `timeout` for the execution record.
    async fn execute(
        &self,
        endpoint: &AssesseeEndpoint,
        request: &AssesseeRequest,
        timeout: Duration,
    ) -> Result<AssesseeResponse, ExecutionFailure>;

    /// Single liveness probe: `Ok(true)` when the endpoint reports healthy.
    async fn probe(&self, endpoint: &AssesseeEndpoint) -> Result<bool, ExecutionFailure>;
}
