use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ResultStore, StoreError, StoreResult, TrajectoryRecord, VerdictRecord};
use crate::domain::{PairKey, Trajectory, Verdict};

pub const TRAJECTORIES_FILE: &str = "trajectories.jsonl";
pub const VERDICTS_FILE: &str = "verdicts.jsonl";

#[derive(Debug, Default)]
struct Keys {
    trajectories: HashSet<PairKey>,
    verdicts: HashSet<PairKey>,
}

impl Keys {
    fn record_count(&self) -> usize {
        self.trajectories.len() + self.verdicts.len()
    }
}

/// JSON Lines [`ResultStore`].
///
/// Layout: `<root>/trajectories.jsonl` and `<root>/verdicts.jsonl`, one
/// record per line, appended in completion order. Reopening a directory
/// picks up existing keys so duplicates are still rejected.
pub struct JsonlResultStore {
    root: PathBuf,
    keys: Mutex<Keys>,
}

impl JsonlResultStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let keys = Keys {
            trajectories: read_jsonl::<TrajectoryRecord>(&root.join(TRAJECTORIES_FILE))?
                .iter()
                .map(TrajectoryRecord::key)
                .collect(),
            verdicts: read_jsonl::<VerdictRecord>(&root.join(VERDICTS_FILE))?
                .iter()
                .map(VerdictRecord::key)
                .collect(),
        };
        debug!(
            root = %root.display(),
            trajectories = keys.trajectories.len(),
            verdicts = keys.verdicts.len(),
            "opened result store"
        );

        Ok(Self {
            root,
            keys: Mutex::new(keys),
        })
    }

    /// Open a store for a new run, refusing a directory that already holds
    /// trajectories or verdicts.
    pub fn create(root: impl AsRef<Path>) -> StoreResult<Self> {
        let mut store = Self::open(root)?;
        let records = store.keys.get_mut().record_count();
        if records > 0 {
            return Err(StoreError::Occupied {
                path: store.root.display().to_string(),
                records,
            });
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trajectories_path(&self) -> PathBuf {
        self.root.join(TRAJECTORIES_FILE)
    }

    pub fn verdicts_path(&self) -> PathBuf {
        self.root.join(VERDICTS_FILE)
    }
}

async fn append_line<T: Serialize>(path: &Path, record: &T) -> StoreResult<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

/// Read every record of a JSON Lines file. A missing file reads as empty;
/// blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Io(e)),
    };
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StoreError::from))
        .collect()
}

/// Read `verdicts.jsonl` from a results directory.
pub fn read_verdicts(results_dir: &Path) -> StoreResult<Vec<VerdictRecord>> {
    read_jsonl(&results_dir.join(VERDICTS_FILE))
}

#[async_trait]
impl ResultStore for JsonlResultStore {
    async fn append_trajectory(&self, trajectory: &Trajectory) -> StoreResult<()> {
        // Held across the write so lines never interleave.
        let mut keys = self.keys.lock().await;
        let key = trajectory.key();
        if keys.trajectories.contains(&key) {
            return Err(StoreError::Duplicate {
                kind: "trajectory",
                key,
            });
        }
        append_line(&self.trajectories_path(), &TrajectoryRecord::from(trajectory)).await?;
        keys.trajectories.insert(key);
        Ok(())
    }

    async fn append_verdict(&self, verdict: &Verdict) -> StoreResult<()> {
        let mut keys = self.keys.lock().await;
        let key = verdict.trajectory_ref.clone();
        if keys.verdicts.contains(&key) {
            return Err(StoreError::Duplicate {
                kind: "verdict",
                key,
            });
        }
        append_line(&self.verdicts_path(), &VerdictRecord::from(verdict)).await?;
        keys.verdicts.insert(key);
        Ok(())
    }

    async fn trajectories(&self) -> StoreResult<Vec<TrajectoryRecord>> {
        let _guard = self.keys.lock().await;
        read_jsonl(&self.trajectories_path())
    }

    async fn verdicts(&self) -> StoreResult<Vec<VerdictRecord>> {
        let _guard = self.keys.lock().await;
        read_jsonl(&self.verdicts_path())
    }
}
