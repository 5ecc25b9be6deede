//! HTTP judge service.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    FrameRatingRequest, FrameRatingResponse, JudgeError, JudgeService, KeyPointsRequest,
    KeyPointsResponse, OutcomeRequest, OutcomeResponse,
};
use crate::client::http::USER_AGENT;
use crate::config::JudgeConfig;

/// `reqwest`-backed [`JudgeService`].
///
/// Talks JSON to `POST {base_url}/key-points`, `/rate-frame` and `/judge`,
/// authenticating with a bearer token when one is configured.
#[derive(Debug, Clone)]
pub struct HttpJudgeService {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpJudgeService {
    pub fn new(config: &JudgeConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, JudgeError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "judge request");

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| JudgeError::Service(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| JudgeError::Service(e.to_string()))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(JudgeError::Service(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        serde_json::from_slice(&bytes).map_err(|e| JudgeError::Malformed(format!("{path}: {e}")))
    }
}

#[async_trait]
impl JudgeService for HttpJudgeService {
    async fn extract_key_points(
        &self,
        request: &KeyPointsRequest,
    ) -> Result<KeyPointsResponse, JudgeError> {
        self.post("key-points", request).await
    }

    async fn rate_frame(
        &self,
        request: &FrameRatingRequest,
    ) -> Result<FrameRatingResponse, JudgeError> {
        self.post("rate-frame", request).await
    }

    async fn judge_outcome(&self, request: &OutcomeRequest) -> Result<OutcomeResponse, JudgeError> {
        self.post("judge", request).await
    }
}
