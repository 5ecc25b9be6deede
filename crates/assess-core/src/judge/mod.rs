//! Three-stage trajectory judge.
//!
//! 1. key-point extraction from the task text ([`key_points`])
//! 2. bounded, order-preserving evidence selection ([`evidence`])
//! 3. outcome judgment mapped through the score threshold ([`outcome`])
//!
//! The judge model sits behind the [`JudgeService`] trait; [`http`] provides
//! the `reqwest` implementation.

pub mod evidence;
pub mod http;
pub mod key_points;
pub mod outcome;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::AssessConfig;
use crate::domain::{ActionRecord, EvidenceFrame, FrameRating, Task, Trajectory, Verdict};

pub use evidence::select_evidence;
pub use key_points::{parse_key_points, KeyPointCache};
pub use outcome::decide_label;

/// Errors from the judging service or its output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JudgeError {
    #[error("judge service error: {0}")]
    Service(String),

    #[error("malformed judge output: {0}")]
    Malformed(String),

    #[error("judging cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Stage 1 request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyPointsRequest {
    pub description: String,
    pub model: String,
}

/// Key points either as a list or as free text to be parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum KeyPointsPayload {
    List(Vec<String>),
    Text(String),
}

/// Stage 1 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyPointsResponse {
    pub key_points: KeyPointsPayload,
}

/// Stage 2 request: rate one frame's relevance to the key points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameRatingRequest {
    pub description: String,
    pub key_points: Vec<String>,
    pub frame: EvidenceFrame,
    pub model: String,
}

/// Stage 2 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameRatingResponse {
    /// Expected within 1..=5.
    pub score: i64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// One frame forwarded to outcome judgment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedEvidence {
    pub index: u32,
    pub blob_ref: String,
    pub rating: u8,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Stage 3 request. The assessee's `final_response` is deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeRequest {
    pub description: String,
    pub key_points: Vec<String>,
    pub selected_evidence: Vec<SelectedEvidence>,
    pub action_log: Vec<ActionRecord>,
    pub model: String,
}

/// Stage 3 response: a score and/or a label, plus rationale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutcomeResponse {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

/// Judge model backend.
///
/// Implement this trait to plug in a real model service or a test stub.
#[async_trait]
pub trait JudgeService: Send + Sync {
    async fn extract_key_points(
        &self,
        request: &KeyPointsRequest,
    ) -> Result<KeyPointsResponse, JudgeError>;

    async fn rate_frame(
        &self,
        request: &FrameRatingRequest,
    ) -> Result<FrameRatingResponse, JudgeError>;

    async fn judge_outcome(&self, request: &OutcomeRequest) -> Result<OutcomeResponse, JudgeError>;
}

// ---------------------------------------------------------------------------
// Judge
// ---------------------------------------------------------------------------

/// Converts (task, key points, trajectory) into a [`Verdict`].
///
/// Holds only shared, immutable collaborators; no state survives a call.
/// Every service call waits for a permit from the admission gate, so the
/// judge service never sees more than `max_concurrency` requests at once.
#[derive(Clone)]
pub struct Judge {
    service: Arc<dyn JudgeService>,
    config: Arc<AssessConfig>,
    permits: Arc<Semaphore>,
}

impl Judge {
    /// Judge with its own gate of `config.max_concurrency` permits.
    pub fn new(service: Arc<dyn JudgeService>, config: Arc<AssessConfig>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            service,
            config,
            permits,
        }
    }

    /// Share the run-wide admission gate with the dispatcher.
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = permits;
        self
    }

    /// Run one service call under a permit. The permit is released as soon
    /// as the call returns.
    async fn gated<T>(
        &self,
        call: impl Future<Output = Result<T, JudgeError>>,
    ) -> Result<T, JudgeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| JudgeError::Service("admission gate closed".to_string()))?;
        call.await
    }

    pub fn model(&self) -> &str {
        &self.config.judge.model
    }

    /// Stage 1: derive the required outcomes for `task`.
    ///
    /// Explicit success criteria are used verbatim (trimmed); otherwise the
    /// judge service is asked. Independent of any trajectory.
    pub async fn extract_key_points(&self, task: &Task) -> Result<Vec<String>, JudgeError> {
        let criteria = key_points::normalize(task.success_criteria.iter().map(String::as_str));
        if !criteria.is_empty() {
            return Ok(criteria);
        }

        let request = KeyPointsRequest {
            description: task.description.clone(),
            model: self.config.judge.model.clone(),
        };
        let response = self.gated(self.service.extract_key_points(&request)).await?;
        let points = match response.key_points {
            KeyPointsPayload::List(items) => key_points::normalize(items.iter().map(String::as_str)),
            KeyPointsPayload::Text(raw) => parse_key_points(&raw),
        };

        if points.is_empty() {
            return Err(JudgeError::Malformed(format!(
                "no key points extracted for task {}",
                task.id
            )));
        }
        Ok(points)
    }

    /// Stage 2: rate every frame, then keep a bounded, order-preserving subset.
    ///
    /// Frames are rated concurrently, each call under its own permit. A failed
    /// rating call scores the frame 0 instead of failing the verdict.
    pub async fn select_evidence(
        &self,
        task: &Task,
        key_points: &[String],
        trajectory: &Trajectory,
    ) -> (Vec<SelectedEvidence>, Vec<FrameRating>) {
        let frames = &trajectory.evidence_frames;
        if frames.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let ratings: Vec<FrameRating> =
            futures::future::join_all(frames.iter().map(|frame| self.rate(task, key_points, frame)))
                .await;

        let scores: Vec<u8> = ratings.iter().map(|r| r.score).collect();
        let positions = select_evidence(
            frames.len(),
            &scores,
            self.config.evidence_cap,
            self.config.frame_score_threshold,
        );

        let selected = positions
            .into_iter()
            .map(|i| SelectedEvidence {
                index: frames[i].index,
                blob_ref: frames[i].blob_ref.clone(),
                rating: ratings[i].score,
                reasoning: ratings[i].reasoning.clone(),
            })
            .collect();
        (selected, ratings)
    }

    async fn rate(&self, task: &Task, key_points: &[String], frame: &EvidenceFrame) -> FrameRating {
        let request = FrameRatingRequest {
            description: task.description.clone(),
            key_points: key_points.to_vec(),
            frame: frame.clone(),
            model: self.config.judge.model.clone(),
        };
        match self.gated(self.service.rate_frame(&request)).await {
            Ok(response) if (1..=5).contains(&response.score) => FrameRating {
                index: frame.index,
                score: response.score as u8,
                reasoning: response.reasoning,
            },
            Ok(response) => {
                debug!(frame = frame.index, score = response.score, "frame rating out of range");
                FrameRating {
                    index: frame.index,
                    score: 0,
                    reasoning: response.reasoning,
                }
            }
            Err(e) => {
                debug!(frame = frame.index, error = %e, "frame rating failed");
                FrameRating {
                    index: frame.index,
                    score: 0,
                    reasoning: None,
                }
            }
        }
    }

    /// Stages 2 and 3 for one trajectory, given the task's key points.
    ///
    /// Non-completed trajectories are `not_executable` without any service
    /// call. Service failures, malformed output and cancellation all yield a
    /// `judge_error` verdict; this method never fails.
    #[instrument(skip_all, fields(task_id = %trajectory.task_id, assessee_id = %trajectory.assessee_id))]
    pub async fn judge(
        &self,
        task: &Task,
        key_points: &[String],
        trajectory: &Trajectory,
        cancel: &CancellationToken,
    ) -> Verdict {
        let key = trajectory.key();

        if !trajectory.status.is_completed() {
            return Verdict::not_executable(key, trajectory.status, key_points.to_vec());
        }
        if cancel.is_cancelled() {
            return Verdict::judge_error(key, key_points.to_vec(), JudgeError::Cancelled.to_string());
        }

        let staged = async {
            let (selected_evidence, ratings) =
                self.select_evidence(task, key_points, trajectory).await;
            let request = OutcomeRequest {
                description: task.description.clone(),
                key_points: key_points.to_vec(),
                selected_evidence,
                action_log: trajectory.action_log.clone(),
                model: self.config.judge.model.clone(),
            };
            let response = self.gated(self.service.judge_outcome(&request)).await?;
            let (label, score) = decide_label(&response, self.config.score_threshold)?;
            Ok::<_, JudgeError>((label, score, response.rationale, ratings))
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JudgeError::Cancelled),
            result = staged => result,
        };

        match result {
            Ok((label, score, rationale, evidence_ratings)) => Verdict {
                trajectory_ref: key,
                predicted_label: label,
                key_points: key_points.to_vec(),
                rationale,
                score,
                evidence_ratings,
            },
            Err(e) => {
                warn!(error = %e, "judging failed");
                Verdict::judge_error(key, key_points.to_vec(), e.to_string())
            }
        }
    }
}
