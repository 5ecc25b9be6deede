use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ResultStore, StoreError, StoreResult, TrajectoryRecord, VerdictRecord};
use crate::domain::{PairKey, Trajectory, Verdict};

#[derive(Debug, Default)]
struct Inner {
    trajectories: Vec<TrajectoryRecord>,
    trajectory_keys: HashSet<PairKey>,
    verdicts: Vec<VerdictRecord>,
    verdict_keys: HashSet<PairKey>,
}

/// In-memory [`ResultStore`] for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    inner: Mutex<Inner>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn append_trajectory(&self, trajectory: &Trajectory) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let key = trajectory.key();
        if !inner.trajectory_keys.insert(key.clone()) {
            return Err(StoreError::Duplicate {
                kind: "trajectory",
                key,
            });
        }
        inner.trajectories.push(TrajectoryRecord::from(trajectory));
        Ok(())
    }

    async fn append_verdict(&self, verdict: &Verdict) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let key = verdict.trajectory_ref.clone();
        if !inner.verdict_keys.insert(key.clone()) {
            return Err(StoreError::Duplicate {
                kind: "verdict",
                key,
            });
        }
        inner.verdicts.push(VerdictRecord::from(verdict));
        Ok(())
    }

    async fn trajectories(&self) -> StoreResult<Vec<TrajectoryRecord>> {
        Ok(self.inner.lock().await.trajectories.clone())
    }

    async fn verdicts(&self) -> StoreResult<Vec<VerdictRecord>> {
        Ok(self.inner.lock().await.verdicts.clone())
    }
}
