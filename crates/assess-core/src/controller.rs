//! Assessment run lifecycle.
//!
//! [`AssessmentController`] owns the run state and drives it through
//! `pending → dispatching → judging → aggregating → complete` (or `failed`).
//! Every (task, endpoint) pair ends with exactly one verdict, even
//! when endpoints never answer or the run is cancelled.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{aggregate, PairResult, RunMetrics};
use crate::client::readiness::{check_readiness, Readiness};
use crate::client::AssesseeClient;
use crate::config::AssessConfig;
use crate::dispatch::Dispatcher;
use crate::domain::{
    AssessError, AssesseeEndpoint, EndpointRegistry, PairKey, PredictedLabel, Result, Task,
    Trajectory, TrajectoryStatus, Verdict,
};
use crate::judge::{Judge, JudgeError, JudgeService, KeyPointCache};
use crate::metrics::METRICS;
use crate::obs;
use crate::reporting::{RejectedEndpoint, RejectedTask, RunSummary};
use crate::store::ResultStore;

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Dispatching,
    Judging,
    Aggregating,
    Complete,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching",
            Self::Judging => "judging",
            Self::Aggregating => "aggregating",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Pending, Dispatching)
            | (Dispatching, Judging)
            | (Judging, Aggregating)
            | (Aggregating, Complete) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one (task, assessee) pair. Only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    Pending,
    Dispatching,
    Judging,
    Done,
}

/// Input to a run: the benchmark tasks and the assessees to compare.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunRequest {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub endpoints: Vec<AssesseeEndpoint>,
}

/// Mutable state of one run, owned by the controller.
#[derive(Debug, Clone)]
pub struct AssessmentRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    phase: RunPhase,
    pairs: BTreeMap<PairKey, PairState>,
    pub metrics: Option<RunMetrics>,
}

impl AssessmentRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            phase: RunPhase::Pending,
            pairs: BTreeMap::new(),
            metrics: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn pair_state(&self, key: &PairKey) -> Option<PairState> {
        self.pairs.get(key).copied()
    }

    /// Move to `next`, rejecting regressions and skipped phases.
    pub fn transition(&mut self, next: RunPhase) -> Result<RunPhase> {
        if !self.phase.can_advance_to(next) {
            return Err(AssessError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        let previous = self.phase;
        self.phase = next;
        Ok(previous)
    }

    fn add_pair(&mut self, key: PairKey) {
        self.pairs.entry(key).or_insert(PairState::Pending);
    }

    /// Advance one pair; staying put or moving backwards is an error.
    pub fn advance_pair(&mut self, key: &PairKey, next: PairState) -> Result<()> {
        let current = self.pairs.get_mut(key).ok_or_else(|| AssessError::InvalidTransition {
            from: format!("unknown pair {key}"),
            to: format!("{next:?}"),
        })?;
        if next <= *current {
            return Err(AssessError::InvalidTransition {
                from: format!("{key} {current:?}"),
                to: format!("{next:?}"),
            });
        }
        *current = next;
        Ok(())
    }

    fn all_done(&self) -> bool {
        self.pairs.values().all(|s| *s == PairState::Done)
    }
}

impl Default for AssessmentRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Key-point outcome for one task during the judging phase.
#[derive(Clone)]
enum TaskRubric {
    /// No completed trajectory; extraction skipped.
    Skipped,
    Ready(Arc<Vec<String>>),
    Failed(String),
}

/// State that lives for exactly one `run` call.
struct RunScope {
    cancel: CancellationToken,
    /// Key points are shared by every assessee on a task, within this run only.
    key_points: KeyPointCache,
}

/// Drives assessment runs end to end.
///
/// One controller may execute several runs in sequence. A cancellation only
/// ever applies to the run in progress (or, when idle, the next one).
pub struct AssessmentController {
    config: Arc<AssessConfig>,
    client: Arc<dyn AssesseeClient>,
    judge: Judge,
    store: Arc<dyn ResultStore>,
    permits: Arc<Semaphore>,
    cancel: Mutex<CancellationToken>,
    phase_tx: watch::Sender<RunPhase>,
}

impl AssessmentController {
    pub fn new(
        config: AssessConfig,
        client: Arc<dyn AssesseeClient>,
        judge_service: Arc<dyn JudgeService>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let config = Arc::new(config);
        let permits = Arc::new(Semaphore::new(config.max_concurrency));
        let (phase_tx, _) = watch::channel(RunPhase::Pending);
        Self {
            judge: Judge::new(judge_service, Arc::clone(&config)).with_permits(Arc::clone(&permits)),
            permits,
            config,
            client,
            store,
            cancel: Mutex::new(CancellationToken::new()),
            phase_tx,
        }
    }

    pub fn config(&self) -> &AssessConfig {
        &self.config
    }

    /// Cancel the run in progress, or the next run when idle. Completed work
    /// is kept; every remaining pair is still labelled.
    pub fn cancel(&self) {
        info!("run cancellation requested");
        self.current_token().cancel();
    }

    /// Token governing the run in progress (or the next run when idle).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.current_token()
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace a fired token so the next run starts uncancelled.
    fn rearm_cancellation(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Observe phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase_tx.borrow()
    }

    fn transition(&self, run: &mut AssessmentRun, next: RunPhase) -> Result<()> {
        let previous = run.transition(next)?;
        obs::emit_phase_changed(&run.run_id.to_string(), previous.as_str(), next.as_str());
        self.phase_tx.send_replace(next);
        Ok(())
    }

    /// Execute the run and return its summary.
    ///
    /// Fatal configuration problems (no endpoints, no usable tasks) end the
    /// run in `failed` with [`AssessError::RunConfiguration`].
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary> {
        let mut run = AssessmentRun::new();
        let span = obs::run_span(&run.run_id.to_string());
        let started = Instant::now();
        let scope = RunScope {
            cancel: self.current_token(),
            key_points: KeyPointCache::new(),
        };

        let result = self.execute(&mut run, &scope, request).instrument(span).await;
        self.rearm_cancellation();

        match &result {
            Ok(summary) => obs::emit_run_finished(
                &summary.run_id.to_string(),
                started.elapsed().as_millis() as u64,
                summary.pairs.len(),
                summary.aggregate.success_rate,
            ),
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "assessment run failed");
                if !run.phase().is_terminal() {
                    self.transition(&mut run, RunPhase::Failed)?;
                }
            }
        }
        METRICS.flush();
        result
    }

    async fn execute(
        &self,
        run: &mut AssessmentRun,
        scope: &RunScope,
        request: RunRequest,
    ) -> Result<RunSummary> {
        let (tasks, rejected_tasks) = validate_request(&request)?;
        let registry = EndpointRegistry::from_endpoints(request.endpoints)?;
        let (admitted, not_ready) = self.admit(registry.endpoints(), &scope.cancel).await;

        // Endpoints that failed readiness keep their pairs; they are labelled
        // from a synthesized trajectory instead of being dispatched.
        for task in &tasks {
            for endpoint in registry.endpoints() {
                run.add_pair(PairKey::new(&task.id, &endpoint.id));
            }
        }
        obs::emit_run_started(&run.run_id.to_string(), tasks.len(), registry.len());

        // Dispatch
        self.transition(run, RunPhase::Dispatching)?;
        let mut trajectories = self.dispatch_all(run, &tasks, &admitted, &scope.cancel).await?;
        for (endpoint, readiness) in &not_ready {
            for task in &tasks {
                let trajectory = not_admitted_trajectory(task, endpoint, readiness);
                self.persist_trajectory(&trajectory).await;
                trajectories.insert(trajectory.key(), trajectory);
            }
        }

        // Judge
        self.transition(run, RunPhase::Judging)?;
        let results = self.judge_all(run, &tasks, trajectories, scope).await?;

        // Aggregate
        self.transition(run, RunPhase::Aggregating)?;
        if !run.all_done() {
            return Err(AssessError::InvalidTransition {
                from: "judging with unfinished pairs".to_string(),
                to: RunPhase::Aggregating.to_string(),
            });
        }
        let metrics = aggregate(&results);
        run.metrics = Some(metrics.clone());
        let rejected_endpoints = not_ready
            .iter()
            .map(|(endpoint, readiness)| RejectedEndpoint {
                assessee_id: endpoint.id.clone(),
                address: endpoint.address.clone(),
                reason: readiness_reason(readiness),
            })
            .collect();
        let summary = RunSummary::build(
            run.run_id,
            metrics,
            &results,
            rejected_tasks,
            rejected_endpoints,
        );
        self.transition(run, RunPhase::Complete)?;
        Ok(summary)
    }

    /// Readiness admission. With readiness disabled every endpoint is admitted.
    async fn admit(
        &self,
        endpoints: &[AssesseeEndpoint],
        cancel: &CancellationToken,
    ) -> (Vec<AssesseeEndpoint>, Vec<(AssesseeEndpoint, Readiness)>) {
        if !self.config.readiness.enabled {
            return (endpoints.to_vec(), Vec::new());
        }

        let checks = futures::future::join_all(
            endpoints
                .iter()
                .map(|e| check_readiness(self.client.as_ref(), e, &self.config.readiness, cancel)),
        )
        .await;

        let mut admitted = Vec::new();
        let mut not_ready = Vec::new();
        for (endpoint, readiness) in endpoints.iter().zip(checks) {
            if readiness.is_ready() {
                admitted.push(endpoint.clone());
            } else {
                not_ready.push((endpoint.clone(), readiness));
            }
        }
        (admitted, not_ready)
    }

    async fn dispatch_all(
        &self,
        run: &mut AssessmentRun,
        tasks: &[Task],
        endpoints: &[AssesseeEndpoint],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<PairKey, Trajectory>> {
        let keys: Vec<PairKey> = run.pairs.keys().cloned().collect();
        for key in &keys {
            run.advance_pair(key, PairState::Dispatching)?;
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.client),
            Arc::clone(&self.config),
            Arc::clone(&self.permits),
        );
        let per_task = futures::future::join_all(
            tasks
                .iter()
                .map(|task| dispatcher.dispatch(task, endpoints, cancel)),
        )
        .await;

        let mut trajectories = BTreeMap::new();
        for dispatched in per_task {
            for (_, trajectory) in dispatched? {
                self.persist_trajectory(&trajectory).await;
                trajectories.insert(trajectory.key(), trajectory);
            }
        }
        Ok(trajectories)
    }

    async fn persist_trajectory(&self, trajectory: &Trajectory) {
        if let Err(e) = self.store.append_trajectory(trajectory).await {
            obs::emit_store_error(&trajectory.key(), &e);
        }
    }

    /// Extract key points once per task that has at least one completed
    /// trajectory.
    async fn rubrics(
        &self,
        tasks: &[Task],
        trajectories: &BTreeMap<PairKey, Trajectory>,
        scope: &RunScope,
    ) -> BTreeMap<String, TaskRubric> {
        let needs_rubric: HashSet<&str> = trajectories
            .values()
            .filter(|t| t.status.is_completed())
            .map(|t| t.task_id.as_str())
            .collect();

        let needs_rubric = &needs_rubric;
        let extracted = futures::future::join_all(tasks.iter().map(|task| async move {
            if !needs_rubric.contains(task.id.as_str()) {
                return (task.id.clone(), TaskRubric::Skipped);
            }
            let rubric = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => TaskRubric::Failed(JudgeError::Cancelled.to_string()),
                result = scope.key_points.get_or_extract(&self.judge, task) => match result {
                    Ok(points) => TaskRubric::Ready(Arc::new(points)),
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "key point extraction failed");
                        TaskRubric::Failed(format!("key point extraction failed: {e}"))
                    }
                },
            };
            (task.id.clone(), rubric)
        }))
        .await;

        extracted.into_iter().collect()
    }

    async fn judge_all(
        &self,
        run: &mut AssessmentRun,
        tasks: &[Task],
        trajectories: BTreeMap<PairKey, Trajectory>,
        scope: &RunScope,
    ) -> Result<Vec<PairResult>> {
        let rubrics = self.rubrics(tasks, &trajectories, scope).await;
        let tasks_by_id: BTreeMap<&str, Arc<Task>> = tasks
            .iter()
            .map(|t| (t.id.as_str(), Arc::new(t.clone())))
            .collect();

        let mut workers = Vec::with_capacity(trajectories.len());
        for (key, trajectory) in trajectories {
            run.advance_pair(&key, PairState::Judging)?;

            let task = tasks_by_id
                .get(key.task_id.as_str())
                .map(Arc::clone)
                .ok_or_else(|| {
                    AssessError::RunConfiguration(format!("trajectory for unknown task {}", key.task_id))
                })?;
            let rubric = rubrics
                .get(&key.task_id)
                .cloned()
                .unwrap_or(TaskRubric::Skipped);
            let judge = self.judge.clone();
            let cancel = scope.cancel.clone();
            let span = tracing::info_span!("judge", pair = %key);
            let owned = trajectory.clone();

            let handle = tokio::spawn(
                async move { judge_pair(&judge, &task, rubric, &owned, &cancel).await }
                    .instrument(span),
            );
            workers.push((key, trajectory, handle));
        }

        let mut results = Vec::with_capacity(workers.len());
        for (key, trajectory, handle) in workers {
            let verdict = match handle.await {
                Ok(verdict) => verdict,
                Err(e) => {
                    // A crashed worker still owes its pair a verdict.
                    warn!(pair = %key, error = %e, "judge worker aborted");
                    Verdict::judge_error(key.clone(), Vec::new(), format!("judge worker aborted: {e}"))
                }
            };

            self.record_verdict(&verdict).await;
            run.advance_pair(&key, PairState::Done)?;
            results.push(PairResult {
                trajectory,
                verdict,
            });
        }
        Ok(results)
    }

    async fn record_verdict(&self, verdict: &Verdict) {
        METRICS.inc_verdicts();
        if verdict.predicted_label == PredictedLabel::JudgeError {
            METRICS.inc_judge_errors();
        }
        obs::emit_pair_judged(&verdict.trajectory_ref, verdict.predicted_label, verdict.score);
        if let Err(e) = self.store.append_verdict(verdict).await {
            obs::emit_store_error(&verdict.trajectory_ref, &e);
        }
    }
}

/// Terminal trajectory for a pair whose endpoint was never admitted.
fn not_admitted_trajectory(
    task: &Task,
    endpoint: &AssesseeEndpoint,
    readiness: &Readiness,
) -> Trajectory {
    let key = PairKey::new(&task.id, &endpoint.id);
    let status = match readiness {
        Readiness::Cancelled => TrajectoryStatus::TimedOut,
        _ => TrajectoryStatus::Unreachable,
    };
    METRICS.inc_trajectories_synthesized();
    obs::emit_pair_dispatched(&key, status, 0, 0);
    let now = Utc::now();
    Trajectory::terminal(&key, status, now, now, readiness_reason(readiness)).with_attempts(0)
}

fn readiness_reason(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Ready => "ready".to_string(),
        Readiness::NotReady => "endpoint never reported healthy".to_string(),
        Readiness::Error(detail) => format!("health check failed: {detail}"),
        Readiness::Cancelled => "run cancelled during readiness check".to_string(),
    }
}

async fn judge_pair(
    judge: &Judge,
    task: &Task,
    rubric: TaskRubric,
    trajectory: &Trajectory,
    cancel: &CancellationToken,
) -> Verdict {
    let key_points = match rubric {
        TaskRubric::Ready(points) => points,
        TaskRubric::Failed(reason) if trajectory.status.is_completed() => {
            return Verdict::judge_error(trajectory.key(), Vec::new(), reason);
        }
        TaskRubric::Failed(_) | TaskRubric::Skipped => Arc::new(Vec::new()),
    };
    judge.judge(task, &key_points, trajectory, cancel).await
}

/// Split the request's tasks into usable and rejected ones, failing when the
/// run cannot start at all.
fn validate_request(request: &RunRequest) -> Result<(Vec<Task>, Vec<RejectedTask>)> {
    if request.endpoints.is_empty() {
        return Err(AssessError::RunConfiguration(
            "no assessee endpoints registered".to_string(),
        ));
    }
    if request.tasks.is_empty() {
        return Err(AssessError::RunConfiguration("no tasks supplied".to_string()));
    }

    let mut seen = HashSet::new();
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for task in &request.tasks {
        let reason = match task.malformed_reason() {
            Some(reason) => Some(reason),
            None if !seen.insert(task.id.as_str()) => Some("duplicate task id"),
            None => None,
        };
        match reason {
            Some(reason) => {
                warn!(task_id = %task.id, reason, "skipping malformed task");
                rejected.push(RejectedTask {
                    task_id: task.id.clone(),
                    reason: reason.to_string(),
                });
            }
            None => valid.push(task.clone()),
        }
    }

    if valid.is_empty() {
        return Err(AssessError::RunConfiguration(format!(
            "all {} tasks are malformed",
            request.tasks.len()
        )));
    }
    Ok((valid, rejected))
}
