//! Readiness probing with bounded retry.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AssesseeClient;
use crate::config::ReadinessConfig;
use crate::domain::AssesseeEndpoint;

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    /// Every probe answered, none reported healthy.
    NotReady,
    /// The last probe failed at the transport level.
    Error(String),
    /// The run was cancelled before the endpoint became ready.
    Cancelled,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Probe `endpoint` up to `config.attempts` times, sleeping `config.interval()`
/// between probes. Returns on the first healthy probe, or as soon as `cancel`
/// fires.
pub async fn check_readiness(
    client: &dyn AssesseeClient,
    endpoint: &AssesseeEndpoint,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Readiness {
    let attempts = config.attempts.max(1);
    let mut last = Readiness::NotReady;

    for attempt in 1..=attempts {
        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(endpoint, attempt),
            answer = client.probe(endpoint) => answer,
        };
        match answer {
            Ok(true) => {
                info!(endpoint = %endpoint.id, attempt, "endpoint ready");
                return Readiness::Ready;
            }
            Ok(false) => {
                debug!(endpoint = %endpoint.id, attempt, "endpoint not ready yet");
                last = Readiness::NotReady;
            }
            Err(e) => {
                debug!(endpoint = %endpoint.id, attempt, error = %e, "readiness probe failed");
                last = Readiness::Error(e.to_string());
            }
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(endpoint, attempt),
                _ = tokio::time::sleep(config.interval()) => {}
            }
        }
    }

    warn!(endpoint = %endpoint.id, attempts, result = ?last, "endpoint failed readiness check");
    last
}

fn cancelled(endpoint: &AssesseeEndpoint, attempt: u32) -> Readiness {
    info!(endpoint = %endpoint.id, attempt, "readiness check cancelled");
    Readiness::Cancelled
}
