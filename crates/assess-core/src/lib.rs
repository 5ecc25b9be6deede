//! Agent Assessment Core Library
//!
//! Dispatches benchmark tasks to assessee endpoints, judges the resulting
//! trajectories and aggregates per-assessee metrics.

pub mod aggregate;
pub mod client;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod domain;
pub mod judge;
pub mod metrics;
pub mod obs;
pub mod reporting;
pub mod store;
pub mod telemetry;

pub use domain::{
    ActionRecord, AssessError, AssesseeEndpoint, EndpointRegistry, EvidenceFrame, FrameRating,
    PairKey, PredictedLabel, RegistryError, Result, Task, Trajectory, TrajectoryStatus, Verdict,
};

pub use aggregate::{aggregate, summarize_verdicts, LabelMetrics, PairResult, RunMetrics, TaskRanking};
pub use client::http::HttpAssesseeClient;
pub use client::readiness::{check_readiness, Readiness};
pub use client::{AssesseeClient, AssesseeRequest, AssesseeResponse, ExecutionFailure};
pub use config::{AssessConfig, ConfigError, JudgeConfig, ReadinessConfig};
pub use controller::{AssessmentController, AssessmentRun, PairState, RunPhase, RunRequest};
pub use dispatch::{DispatchError, Dispatcher};
pub use judge::http::HttpJudgeService;
pub use judge::{Judge, JudgeError, JudgeService, KeyPointCache};
pub use reporting::{
    render_run_summary_md, write_run_summary_json, write_run_summary_md, PairSummary,
    RejectedEndpoint, RejectedTask, RunSummary,
};
pub use store::{JsonlResultStore, MemoryResultStore, ResultStore, StoreError};

pub use metrics::METRICS;
pub use obs::run_span;
pub use telemetry::{init_tracing, LogFormat};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
