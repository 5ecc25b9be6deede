//! Immutable run configuration.
//!
//! An [`AssessConfig`] is built once (from a TOML file or in code), validated,
//! and then shared by `Arc` with the dispatcher, judge and controller.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Judge service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JudgeConfig {
    /// Base URL of the judge service.
    pub base_url: String,

    /// Judge model identifier. Part of the key-point cache key.
    pub model: String,

    /// Upper bound on a single judge call.
    pub timeout_secs: u64,

    /// Bearer token sent to the judge service.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl JudgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Readiness admission policy for assessee endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Probe endpoints before admitting them into a run.
    pub enabled: bool,

    /// Maximum probes per endpoint.
    pub attempts: u32,

    /// Delay between probes.
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 5,
            interval_ms: 1000,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Configuration for one assessment run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssessConfig {
    /// Upper bound on one dispatch round trip.
    pub dispatch_timeout_secs: u64,

    /// Additional attempts for transient dispatch failures.
    pub max_retries: u32,

    /// Base backoff between dispatch attempts (multiplied by attempt number).
    pub retry_backoff_ms: u64,

    /// Admission gate shared by dispatch and judge workers.
    pub max_concurrency: usize,

    /// Maximum evidence frames forwarded to outcome judgment (K).
    pub evidence_cap: usize,

    /// Judge score at or above which a trajectory is a success.
    pub score_threshold: f64,

    /// Minimum frame relevance rating (1..=5) for a frame to be a candidate.
    pub frame_score_threshold: u8,

    pub judge: JudgeConfig,
    pub readiness: ReadinessConfig,
}

impl Default for AssessConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 600,
            max_retries: 2,
            retry_backoff_ms: 500,
            max_concurrency: 8,
            evidence_cap: 50,
            score_threshold: 3.0,
            frame_score_threshold: 3,
            judge: JudgeConfig::default(),
            readiness: ReadinessConfig::default(),
        }
    }
}

impl AssessConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_timeout_secs == 0 {
            return Err(invalid("dispatch_timeout_secs", "must be greater than 0"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be greater than 0"));
        }
        if self.evidence_cap < 2 {
            return Err(invalid(
                "evidence_cap",
                format!("must be at least 2 to keep first and last frames, got {}", self.evidence_cap),
            ));
        }
        if !self.score_threshold.is_finite() {
            return Err(invalid("score_threshold", "must be a finite number"));
        }
        if self.frame_score_threshold > 5 {
            return Err(invalid(
                "frame_score_threshold",
                format!("must be within 0..=5, got {}", self.frame_score_threshold),
            ));
        }
        if self.judge.timeout_secs == 0 {
            return Err(invalid("judge.timeout_secs", "must be greater than 0"));
        }
        if self.judge.base_url.trim().is_empty() {
            return Err(invalid("judge.base_url", "must not be empty"));
        }
        if self.readiness.attempts == 0 {
            return Err(invalid("readiness.attempts", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Backoff before the given retry (1-based).
    pub fn retry_backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(retry)))
    }

    pub fn with_judge_api_key(mut self, api_key: Option<String>) -> Self {
        if api_key.is_some() {
            self.judge.api_key = api_key;
        }
        self
    }
}
