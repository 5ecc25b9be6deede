//! Evidence selection over rated frames.

/// Choose which frame positions are forwarded to outcome judgment.
///
/// `scores[i]` is the relevance rating of frame position `i` (0 when rating
/// failed). The first and last frames are always kept; the remaining
/// `cap - 2` slots go to interior frames rated at least `min_score`, highest
/// first, earlier frame on ties. The result is in original frame order and
/// never longer than `max(cap, 2)`.
pub fn select_evidence(frame_count: usize, scores: &[u8], cap: usize, min_score: u8) -> Vec<usize> {
    let cap = cap.max(2);
    if frame_count <= 2 {
        return (0..frame_count).collect();
    }

    let last = frame_count - 1;
    let score_at = |i: usize| scores.get(i).copied().unwrap_or(0);

    let mut candidates: Vec<usize> = (1..last).filter(|&i| score_at(i) >= min_score).collect();
    candidates.sort_by(|&a, &b| score_at(b).cmp(&score_at(a)).then(a.cmp(&b)));
    candidates.truncate(cap - 2);

    let mut selected = Vec::with_capacity(candidates.len() + 2);
    selected.push(0);
    selected.extend(candidates);
    selected.push(last);
    selected.sort_unstable();
    selected
}
