//! Key-point parsing and the per-task key-point cache.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::domain::Task;

use super::{Judge, JudgeError};

/// Parse free-text judge output into key points.
///
/// Accepts an optional `Key Points:` header (bold markers allowed) and keeps
/// only what follows it. Numbered (`1.` / `1)`) and bulleted (`-`, `*`, `•`)
/// markers are stripped; blank lines are dropped.
pub fn parse_key_points(raw: &str) -> Vec<String> {
    let text = raw.replace("**", "");
    let lowered = text.to_ascii_lowercase();
    let body = match lowered.rfind("key points:") {
        Some(at) => &text[at + "key points:".len()..],
        None => text.as_str(),
    };
    normalize(body.lines())
}

/// Trim, strip list markers and drop empty items.
pub(crate) fn normalize<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    items
        .into_iter()
        .map(strip_list_marker)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        return match rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            Some(rest) => rest.trim(),
            None => line,
        };
    }
    for marker in ['-', '*', '•'] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim();
        }
    }
    line
}

/// Cache key for a task's key points: SHA-256 over model, description and
/// criteria, hex encoded.
pub fn cache_key(task: &Task, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(task.description.as_bytes());
    for criterion in &task.success_criteria {
        hasher.update([0u8]);
        hasher.update(criterion.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Memoizes key-point extraction so every assessee of a task is judged
/// against the same rubric. Failures are not cached.
#[derive(Debug, Default)]
pub struct KeyPointCache {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl KeyPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, task: &Task, model: &str) -> Option<Vec<String>> {
        let key = cache_key(task, model);
        self.entries.lock().ok()?.get(&key).cloned()
    }

    /// Return cached key points for `task`, extracting them on a miss.
    pub async fn get_or_extract(&self, judge: &Judge, task: &Task) -> Result<Vec<String>, JudgeError> {
        if let Some(points) = self.get(task, judge.model()) {
            return Ok(points);
        }
        let points = judge.extract_key_points(task).await?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(cache_key(task, judge.model()), points.clone());
        }
        Ok(points)
    }
}
