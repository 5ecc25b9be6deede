//! Mapping of outcome-judgment output onto a [`PredictedLabel`].

use crate::domain::PredictedLabel;

use super::{JudgeError, OutcomeResponse};

/// Map a judge response to a label and the score it was derived from.
///
/// A score wins over a label: `score >= threshold` is success, anything
/// lower is failure. Without a score the label must read `success` or
/// `failure`, optionally prefixed by `Status:`.
pub fn decide_label(
    response: &OutcomeResponse,
    threshold: f64,
) -> Result<(PredictedLabel, Option<f64>), JudgeError> {
    if let Some(score) = response.score {
        if !score.is_finite() {
            return Err(JudgeError::Malformed(format!("non-finite score {score}")));
        }
        let label = if score >= threshold {
            PredictedLabel::Success
        } else {
            PredictedLabel::Failure
        };
        return Ok((label, Some(score)));
    }

    match response.label.as_deref() {
        Some(raw) => parse_label(raw)
            .map(|label| (label, None))
            .ok_or_else(|| JudgeError::Malformed(format!("unrecognised label {raw:?}"))),
        None => Err(JudgeError::Malformed(
            "response carries neither score nor label".to_string(),
        )),
    }
}

fn parse_label(raw: &str) -> Option<PredictedLabel> {
    let lowered = raw.trim().to_ascii_lowercase();
    let value = match lowered.rfind("status:") {
        Some(at) => &lowered[at + "status:".len()..],
        None => lowered.as_str(),
    };
    let value = value.trim().trim_matches(|c: char| c == '"' || c == '*' || c == '.');
    match value {
        "success" => Some(PredictedLabel::Success),
        "failure" => Some(PredictedLabel::Failure),
        _ => None,
    }
}
