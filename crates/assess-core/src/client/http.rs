//! HTTP transport to assessee endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{AssesseeClient, AssesseeRequest, AssesseeResponse, ExecutionFailure};
use crate::domain::AssesseeEndpoint;

/// User agent sent with every assessee request.
pub const USER_AGENT: &str = concat!("assess/", env!("CARGO_PKG_VERSION"));

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct HealthBody {
    healthy: bool,
}

/// `reqwest`-backed [`AssesseeClient`].
///
/// Endpoints expose `POST /execute` and `GET /health`.
#[derive(Debug, Clone)]
pub struct HttpAssesseeClient {
    http: reqwest::Client,
}

impl HttpAssesseeClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http })
    }
}

/// Map a transport error to a failure class.
fn classify(err: &reqwest::Error) -> ExecutionFailure {
    if err.is_timeout() {
        ExecutionFailure::TimedOut(err.to_string())
    } else if err.is_connect() {
        ExecutionFailure::Unreachable(err.to_string())
    } else if err.is_body() || err.is_decode() {
        ExecutionFailure::ExecutionError(format!("partial or malformed response: {err}"))
    } else {
        ExecutionFailure::Unreachable(err.to_string())
    }
}

/// Gateway statuses mean the assessee itself was never reached.
fn classify_status(status: StatusCode, body: &str) -> ExecutionFailure {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ExecutionFailure::Unreachable(detail)
        }
        _ => ExecutionFailure::ExecutionError(detail),
    }
}

#[async_trait]
impl AssesseeClient for HttpAssesseeClient {
    async fn execute(
        &self,
        endpoint: &AssesseeEndpoint,
        request: &AssesseeRequest,
        timeout: Duration,
    ) -> Result<AssesseeResponse, ExecutionFailure> {
        let url = format!("{}/execute", endpoint.normalized_address());
        debug!(endpoint = %endpoint.id, url = %url, task_id = %request.task_id, "sending task");

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        if !status.is_success() {
            return Err(classify_status(status, &String::from_utf8_lossy(&body)));
        }

        serde_json::from_slice::<AssesseeResponse>(&body).map_err(|e| {
            ExecutionFailure::ExecutionError(format!("malformed assessee response: {e}"))
        })
    }

    async fn probe(&self, endpoint: &AssesseeEndpoint) -> Result<bool, ExecutionFailure> {
        let url = format!("{}/health", endpoint.normalized_address());
        let response = self
            .http
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        match response.json::<HealthBody>().await {
            Ok(body) => Ok(body.healthy),
            Err(e) => {
                debug!(endpoint = %endpoint.id, error = %e, "unreadable health body");
                Ok(false)
            }
        }
    }
}
