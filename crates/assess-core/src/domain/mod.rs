//! Domain models for agent assessment.
//!
//! Canonical definitions for the core entities:
//! - `Task`: a benchmark instruction sent to every assessee
//! - `AssesseeEndpoint`: a registered agent under evaluation
//! - `Trajectory`: the record of one assessee's attempt at one task
//! - `Verdict`: the judged outcome of one trajectory

pub mod error;
pub mod task;
pub mod trajectory;
pub mod verdict;

// Re-export main types and errors
pub use error::{AssessError, RegistryError, Result};
pub use task::{AssesseeEndpoint, EndpointRegistry, Task};
pub use trajectory::{ActionRecord, EvidenceFrame, PairKey, Trajectory, TrajectoryStatus};
pub use verdict::{FrameRating, PredictedLabel, Verdict};
