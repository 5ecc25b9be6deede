//! Verdicts: the judged outcome of one trajectory.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::trajectory::{PairKey, TrajectoryStatus};

/// Label assigned to a trajectory by the judge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PredictedLabel {
    Success,
    Failure,
    /// The assessee never produced a completed trajectory.
    NotExecutable,
    /// The judging call itself failed. Excluded from success rates.
    JudgeError,
}

impl PredictedLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::NotExecutable => "not_executable",
            Self::JudgeError => "judge_error",
        }
    }

    /// Whether this label counts towards the success-rate denominator.
    pub fn is_decisive(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for PredictedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relevance rating given to one evidence frame during evidence selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameRating {
    pub index: u32,

    /// 1..=5, or 0 when the rating call failed.
    pub score: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// The judged outcome of one trajectory. Exactly one per pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub trajectory_ref: PairKey,
    pub predicted_label: PredictedLabel,

    /// Required outcomes used as the judgment rubric.
    #[serde(default)]
    pub key_points: Vec<String>,

    #[serde(default)]
    pub rationale: String,

    /// Continuous judge score, when the judge produced one.
    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_ratings: Vec<FrameRating>,
}

impl Verdict {
    /// Verdict for a trajectory that never completed. Stage 3 is skipped.
    pub fn not_executable(key: PairKey, status: TrajectoryStatus, key_points: Vec<String>) -> Self {
        Self {
            trajectory_ref: key,
            predicted_label: PredictedLabel::NotExecutable,
            key_points,
            rationale: format!("trajectory status {status}; outcome not judged"),
            score: None,
            evidence_ratings: Vec::new(),
        }
    }

    /// Verdict for a pair whose judging call failed.
    pub fn judge_error(key: PairKey, key_points: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            trajectory_ref: key,
            predicted_label: PredictedLabel::JudgeError,
            key_points,
            rationale: reason.into(),
            score: None,
            evidence_ratings: Vec::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.trajectory_ref.task_id
    }

    pub fn assessee_id(&self) -> &str {
        &self.trajectory_ref.assessee_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict_with_score(score: f64) -> Verdict {
        Verdict {
            trajectory_ref: PairKey::new("hotel_search_1", "beta"),
            predicted_label: PredictedLabel::Failure,
            key_points: vec!["Paris".to_string(), "4 stars or higher".to_string()],
            rationale: "rating filter never applied".to_string(),
            score: Some(score),
            evidence_ratings: vec![FrameRating {
                index: 3,
                score: 4,
                reasoning: Some("results page".to_string()),
            }],
        }
    }

    #[test]
    fn test_verdict_serde_roundtrip() {
        let verdict = verdict_with_score(2.5);
        let json = serde_json::to_string(&verdict).expect("serialize");
        let back: Verdict = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(verdict, back);
    }

    #[test]
    fn test_verdict_scores_roundtrip_exactly() {
        let mut fixed = vec![0.1, 1.0 / 3.0, 2.9999999999999996, 4.700000000000001, 1e-300];
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        for _ in 0..20_000 {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            fixed.push((seed >> 11) as f64 / (1u64 << 53) as f64 * 5.0);
        }

        let mismatches: Vec<f64> = fixed
            .into_iter()
            .filter(|score| {
                let json = serde_json::to_string(&verdict_with_score(*score)).expect("serialize");
                let back: Verdict = serde_json::from_str(&json).expect("deserialize");
                back.score.map(f64::to_bits) != Some(score.to_bits())
            })
            .collect();
        assert!(mismatches.is_empty(), "scores changed in transit: {:?}", &mismatches[..mismatches.len().min(5)]);
    }

    #[test]
    fn test_label_decisiveness() {
        assert!(PredictedLabel::Success.is_decisive());
        assert!(PredictedLabel::Failure.is_decisive());
        assert!(!PredictedLabel::NotExecutable.is_decisive());
        assert!(!PredictedLabel::JudgeError.is_decisive());
    }

    #[test]
    fn test_not_executable_mentions_status() {
        let verdict = Verdict::not_executable(
            PairKey::new("t1", "gamma"),
            TrajectoryStatus::Unreachable,
            vec![],
        );
        assert_eq!(verdict.predicted_label, PredictedLabel::NotExecutable);
        assert!(verdict.rationale.contains("unreachable"));
        assert!(verdict.score.is_none());
    }

    #[test]
    fn test_label_serializes_snake_case() {
        let json = serde_json::to_string(&PredictedLabel::NotExecutable).unwrap();
        assert_eq!(json, "\"not_executable\"");
    }
}
