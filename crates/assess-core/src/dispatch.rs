//! Fault-isolated parallel dispatch of one task to every assessee.
//!
//! Each endpoint runs in its own spawned worker admitted through the shared
//! semaphore, so a slow, failing or panicking endpoint never delays or
//! corrupts another endpoint's result. The returned map always holds exactly
//! one [`Trajectory`] per endpoint: endpoints that never produce an execution
//! record get a synthesized terminal trajectory with the failure status.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn, Instrument};

use crate::client::{AssesseeClient, AssesseeRequest, ExecutionFailure};
use crate::config::AssessConfig;
use crate::domain::{AssesseeEndpoint, PairKey, Task, Trajectory, TrajectoryStatus};
use crate::metrics::METRICS;
use crate::obs;

/// Errors that prevent dispatch from starting at all.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("duplicate endpoint {field} {value:?}")]
    DuplicateEndpoint { field: &'static str, value: String },
}

/// Fans a task out to every endpoint concurrently.
///
/// Holds only shared, immutable collaborators; no state survives a call.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn AssesseeClient>,
    config: Arc<AssessConfig>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// `permits` is the run-wide admission gate shared with the judge.
    pub fn new(
        client: Arc<dyn AssesseeClient>,
        config: Arc<AssessConfig>,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            client,
            config,
            permits,
        }
    }

    /// Execute `task` on every endpoint and return one trajectory per endpoint id.
    ///
    /// Fails fast only on duplicate endpoint ids or addresses; every other
    /// failure is absorbed into the corresponding trajectory's status.
    #[instrument(skip_all, fields(task_id = %task.id, endpoints = endpoints.len()))]
    pub async fn dispatch(
        &self,
        task: &Task,
        endpoints: &[AssesseeEndpoint],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Trajectory>, DispatchError> {
        ensure_unique(endpoints)?;

        let request = Arc::new(AssesseeRequest::from(task));
        let mut workers = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let key = PairKey::new(&task.id, &endpoint.id);
            let pair = PairDispatch {
                client: Arc::clone(&self.client),
                config: Arc::clone(&self.config),
                permits: Arc::clone(&self.permits),
                endpoint: endpoint.clone(),
                request: Arc::clone(&request),
                key: key.clone(),
                cancel: cancel.clone(),
            };
            let span = tracing::info_span!("dispatch", assessee_id = %endpoint.id);
            let handle = tokio::spawn(pair.run().instrument(span));
            workers.push((key, handle));
        }

        let mut trajectories = BTreeMap::new();
        for (key, handle) in workers {
            let trajectory = match handle.await {
                Ok(trajectory) => trajectory,
                Err(e) => {
                    // A crashed worker still owes its pair a trajectory.
                    warn!(assessee_id = %key.assessee_id, error = %e, "dispatch worker aborted");
                    METRICS.inc_trajectories_synthesized();
                    let now = Utc::now();
                    Trajectory::terminal(
                        &key,
                        TrajectoryStatus::ExecutionError,
                        now,
                        now,
                        format!("dispatch worker aborted: {e}"),
                    )
                }
            };
            trajectories.insert(key.assessee_id, trajectory);
        }

        Ok(trajectories)
    }
}

fn ensure_unique(endpoints: &[AssesseeEndpoint]) -> Result<(), DispatchError> {
    let mut ids = HashMap::new();
    let mut addresses = HashMap::new();
    for endpoint in endpoints {
        if ids.insert(endpoint.id.as_str(), ()).is_some() {
            return Err(DispatchError::DuplicateEndpoint {
                field: "id",
                value: endpoint.id.clone(),
            });
        }
        if addresses.insert(endpoint.normalized_address(), ()).is_some() {
            return Err(DispatchError::DuplicateEndpoint {
                field: "address",
                value: endpoint.address.clone(),
            });
        }
    }
    Ok(())
}

/// Everything one worker needs, owned so it can move into `tokio::spawn`.
struct PairDispatch {
    client: Arc<dyn AssesseeClient>,
    config: Arc<AssessConfig>,
    permits: Arc<Semaphore>,
    endpoint: AssesseeEndpoint,
    request: Arc<AssesseeRequest>,
    key: PairKey,
    cancel: CancellationToken,
}

impl PairDispatch {
    async fn run(self) -> Trajectory {
        let first_started = Utc::now();
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            // Durations span every attempt, including failed ones and backoff.
            let outcome = self.attempt().await.and_then(|response| {
                response.into_trajectory(&self.key, first_started, Utc::now())
            });

            let failure = match outcome {
                Ok(trajectory) => {
                    let trajectory = trajectory.with_attempts(attempt);
                    obs::emit_pair_dispatched(
                        &self.key,
                        trajectory.status,
                        attempt,
                        trajectory.duration_ms(),
                    );
                    return trajectory;
                }
                Err(failure) => failure,
            };

            let retry =
                failure.is_transient() && attempt < max_attempts && !self.cancel.is_cancelled();
            if !retry {
                METRICS.inc_trajectories_synthesized();
                let trajectory = Trajectory::terminal(
                    &self.key,
                    failure.status(),
                    first_started,
                    Utc::now(),
                    failure.detail(),
                )
                .with_attempts(attempt);
                obs::emit_pair_dispatched(
                    &self.key,
                    trajectory.status,
                    attempt,
                    trajectory.duration_ms(),
                );
                return trajectory;
            }

            METRICS.inc_dispatch_retries();
            warn!(
                attempt,
                max_attempts,
                error = %failure,
                "transient dispatch failure, retrying"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.retry_backoff(attempt)) => {}
            }
        }
    }

    /// One admission-gated round trip, bounded by the dispatch timeout and
    /// interrupted by cancellation.
    async fn attempt(&self) -> Result<crate::client::AssesseeResponse, ExecutionFailure> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return Err(ExecutionFailure::TimedOut(
                "run cancelled before dispatch".to_string(),
            ));
        };

        METRICS.inc_dispatch_attempts();
        let timeout = self.config.dispatch_timeout();
        debug!(endpoint = %self.endpoint.address, "dispatch attempt");

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExecutionFailure::TimedOut(
                "run cancelled during dispatch".to_string(),
            )),
            result = tokio::time::timeout(
                timeout,
                self.client.execute(&self.endpoint, &self.request, timeout),
            ) => match result {
                Ok(result) => result,
                Err(_) => Err(ExecutionFailure::TimedOut(format!(
                    "no response within {}s",
                    timeout.as_secs()
                ))),
            },
        }
    }
}
