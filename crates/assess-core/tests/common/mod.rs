//! Scripted assessee and judge fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use assess_core::client::ReportedStatus;
use assess_core::judge::{
    FrameRatingRequest, FrameRatingResponse, KeyPointsPayload, KeyPointsRequest,
    KeyPointsResponse, OutcomeRequest, OutcomeResponse,
};
use assess_core::{
    ActionRecord, AssessConfig, AssesseeClient, AssesseeEndpoint, AssesseeRequest,
    AssesseeResponse, EvidenceFrame, ExecutionFailure, JudgeError, JudgeService, ReadinessConfig,
};
use async_trait::async_trait;

/// How a scripted endpoint answers `execute`.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Completed record with this many evidence frames.
    Complete { frames: u32 },
    /// Transient failures for the first `n` attempts, then complete.
    FlakyThenComplete { failures: u32 },
    Unreachable,
    ExecutionError,
    /// Never answers.
    Hang,
    Panic,
}

/// [`AssesseeClient`] whose endpoints follow a script keyed by endpoint id.
#[derive(Default)]
pub struct ScriptedAssessee {
    behaviors: HashMap<String, Behavior>,
    unhealthy: Vec<String>,
    calls: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    latency: Duration,
}

impl ScriptedAssessee {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, endpoint_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(endpoint_id.to_string(), behavior);
        self
    }

    pub fn unhealthy(mut self, endpoint_id: &str) -> Self {
        self.unhealthy.push(endpoint_id.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self, endpoint_id: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(endpoint_id)
            .copied()
            .unwrap_or(0)
    }

    fn completed(endpoint: &AssesseeEndpoint, request: &AssesseeRequest, frames: u32) -> AssesseeResponse {
        AssesseeResponse {
            status: ReportedStatus::Completed,
            action_log: vec![ActionRecord::new(
                "agent",
                format!("{} worked on {}", endpoint.id, request.task_id),
            )],
            evidence_frames: (0..frames)
                .map(|i| EvidenceFrame::new(i, format!("blob://{}/{}/{i}", endpoint.id, request.task_id)))
                .collect(),
            final_response: Some(format!("{} says the task is done", endpoint.id)),
            error: None,
        }
    }
}

#[async_trait]
impl AssesseeClient for ScriptedAssessee {
    async fn execute(
        &self,
        endpoint: &AssesseeEndpoint,
        request: &AssesseeRequest,
        _timeout: Duration,
    ) -> Result<AssesseeResponse, ExecutionFailure> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(endpoint.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self
            .behaviors
            .get(&endpoint.id)
            .cloned()
            .unwrap_or(Behavior::Complete { frames: 3 })
        {
            Behavior::Complete { frames } => Ok(Self::completed(endpoint, request, frames)),
            Behavior::FlakyThenComplete { failures } if attempt <= failures => {
                Err(ExecutionFailure::Unreachable("connection reset".into()))
            }
            Behavior::FlakyThenComplete { .. } => Ok(Self::completed(endpoint, request, 3)),
            Behavior::Unreachable => Err(ExecutionFailure::Unreachable("connection refused".into())),
            Behavior::ExecutionError => Err(ExecutionFailure::ExecutionError("HTTP 500".into())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Panic => panic!("scripted assessee crash"),
        }
    }

    async fn probe(&self, endpoint: &AssesseeEndpoint) -> Result<bool, ExecutionFailure> {
        Ok(!self.unhealthy.contains(&endpoint.id))
    }
}

/// [`JudgeService`] with canned answers and call counters.
pub struct ScriptedJudge {
    pub key_points: Result<KeyPointsPayload, JudgeError>,
    /// Frame rating by frame index; missing indices rate 1.
    pub ratings: HashMap<u32, i64>,
    pub fail_ratings: bool,
    pub rating_delay: Duration,
    /// Outcome by assessee id (matched against the action log); falls back
    /// to `default_outcome`.
    pub outcomes: HashMap<String, Result<OutcomeResponse, JudgeError>>,
    pub default_outcome: Result<OutcomeResponse, JudgeError>,
    pub outcome_delay: Duration,
    pub key_point_calls: AtomicU32,
    pub rating_calls: AtomicU32,
    pub outcome_calls: AtomicU32,
    pub outcome_requests: Mutex<Vec<OutcomeRequest>>,
    pub ratings_in_flight: AtomicUsize,
    pub max_ratings_in_flight: AtomicUsize,
}

impl Default for ScriptedJudge {
    fn default() -> Self {
        Self {
            key_points: Ok(KeyPointsPayload::List(vec![
                "Search results are shown".into(),
                "Cheapest option is selected".into(),
            ])),
            ratings: HashMap::new(),
            fail_ratings: false,
            rating_delay: Duration::ZERO,
            outcomes: HashMap::new(),
            default_outcome: Ok(scored(4.0)),
            outcome_delay: Duration::ZERO,
            key_point_calls: AtomicU32::new(0),
            rating_calls: AtomicU32::new(0),
            outcome_calls: AtomicU32::new(0),
            outcome_requests: Mutex::new(Vec::new()),
            ratings_in_flight: AtomicUsize::new(0),
            max_ratings_in_flight: AtomicUsize::new(0),
        }
    }
}

impl ScriptedJudge {
    pub fn outcome_for(mut self, assessee_id: &str, outcome: Result<OutcomeResponse, JudgeError>) -> Self {
        self.outcomes.insert(assessee_id.to_string(), outcome);
        self
    }
}

pub fn scored(score: f64) -> OutcomeResponse {
    OutcomeResponse {
        score: Some(score),
        label: None,
        rationale: format!("scored {score}"),
    }
}

#[async_trait]
impl JudgeService for ScriptedJudge {
    async fn extract_key_points(
        &self,
        _request: &KeyPointsRequest,
    ) -> Result<KeyPointsResponse, JudgeError> {
        self.key_point_calls.fetch_add(1, Ordering::SeqCst);
        self.key_points
            .clone()
            .map(|key_points| KeyPointsResponse { key_points })
    }

    async fn rate_frame(
        &self,
        request: &FrameRatingRequest,
    ) -> Result<FrameRatingResponse, JudgeError> {
        self.rating_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.ratings_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_ratings_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.rating_delay.is_zero() {
            tokio::time::sleep(self.rating_delay).await;
        }
        self.ratings_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_ratings {
            return Err(JudgeError::Service("rating backend down".into()));
        }
        Ok(FrameRatingResponse {
            score: self.ratings.get(&request.frame.index).copied().unwrap_or(1),
            reasoning: None,
        })
    }

    async fn judge_outcome(&self, request: &OutcomeRequest) -> Result<OutcomeResponse, JudgeError> {
        self.outcome_calls.fetch_add(1, Ordering::SeqCst);
        self.outcome_requests.lock().unwrap().push(request.clone());
        if !self.outcome_delay.is_zero() {
            tokio::time::sleep(self.outcome_delay).await;
        }

        let actor = request
            .action_log
            .first()
            .and_then(|a| a.description.split_whitespace().next())
            .unwrap_or_default()
            .to_string();
        self.outcomes
            .get(&actor)
            .cloned()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

/// Fast config: readiness off, short backoff and timeout.
pub fn test_config() -> AssessConfig {
    AssessConfig {
        dispatch_timeout_secs: 5,
        max_retries: 2,
        retry_backoff_ms: 10,
        max_concurrency: 8,
        readiness: ReadinessConfig {
            enabled: false,
            attempts: 2,
            interval_ms: 10,
        },
        ..AssessConfig::default()
    }
}

pub fn endpoints(ids: &[&str]) -> Vec<AssesseeEndpoint> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| AssesseeEndpoint::new(*id, format!("http://localhost:{}", 9001 + i)))
        .collect()
}
