//! Trajectory persistence backends.
//!
//! One JSON document per trajectory under `<root>/trajectories/`, written off
//! the critical path. The in-memory copy stays authoritative for the process
//! lifetime, so a failed write is logged and never propagated to callers.

use crate::types::AnalysisTrajectory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::SCHEMA_VERSION;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Storage backend for finalized trajectories.
#[async_trait]
pub trait TrajectoryStore: Send + Sync {
    async fn save(&self, trajectory: &AnalysisTrajectory) -> Result<()>;

    async fn load(&self, trajectory_id: Uuid) -> Result<Option<AnalysisTrajectory>>;
}

/// File-backed store: one pretty-printed JSON file per trajectory.
pub struct FileTrajectoryStore {
    dir: PathBuf,
}

impl FileTrajectoryStore {
    /// Creates `<root>/trajectories/` if missing. Failure here is fatal to
    /// collector startup.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join("trajectories");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create trajectory storage dir {:?}", dir))?;
        Ok(Self { dir })
    }

    fn path_for(&self, trajectory_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", trajectory_id))
    }
}

#[async_trait]
impl TrajectoryStore for FileTrajectoryStore {
    async fn save(&self, trajectory: &AnalysisTrajectory) -> Result<()> {
        let path = self.path_for(trajectory.trajectory_id);
        let body = serde_json::to_vec_pretty(trajectory)
            .context("Failed to serialize trajectory")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write trajectory file {:?}", path))?;
        Ok(())
    }

    async fn load(&self, trajectory_id: Uuid) -> Result<Option<AnalysisTrajectory>> {
        let path = self.path_for(trajectory_id);
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read trajectory file {:?}", path))
            }
        };
        let trajectory: AnalysisTrajectory = serde_json::from_slice(&body)
            .with_context(|| format!("Failed to parse trajectory file {:?}", path))?;
        if trajectory.schema_version != SCHEMA_VERSION {
            warn!(
                trajectory_id = %trajectory_id,
                found = trajectory.schema_version,
                expected = SCHEMA_VERSION,
                "Trajectory record has a different schema version"
            );
        }
        Ok(Some(trajectory))
    }
}

/// In-memory store for tests and development.
pub struct InMemoryTrajectoryStore {
    trajectories: tokio::sync::RwLock<HashMap<Uuid, AnalysisTrajectory>>,
}

impl InMemoryTrajectoryStore {
    pub fn new() -> Self {
        Self {
            trajectories: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.trajectories.read().await.len()
    }
}

impl Default for InMemoryTrajectoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrajectoryStore for InMemoryTrajectoryStore {
    async fn save(&self, trajectory: &AnalysisTrajectory) -> Result<()> {
        let mut trajectories = self.trajectories.write().await;
        trajectories.insert(trajectory.trajectory_id, trajectory.clone());
        Ok(())
    }

    async fn load(&self, trajectory_id: Uuid) -> Result<Option<AnalysisTrajectory>> {
        let trajectories = self.trajectories.read().await;
        Ok(trajectories.get(&trajectory_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AnalystInfo;

    fn trajectory() -> AnalysisTrajectory {
        AnalysisTrajectory::new(
            "2330",
            AnalystInfo::new("technical", "1.0"),
            "user-1",
            serde_json::Value::Null,
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileTrajectoryStore::new(tmp.path()).unwrap();

        let t = trajectory();
        store.save(&t).await.unwrap();

        let loaded = store.load(t.trajectory_id).await.unwrap().unwrap();
        assert_eq!(loaded.trajectory_id, t.trajectory_id);
        assert_eq!(loaded.stock_id, "2330");
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn file_store_missing_record_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileTrajectoryStore::new(tmp.path()).unwrap();
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemoryTrajectoryStore::new();
        let t = trajectory();
        store.save(&t).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.load(t.trajectory_id).await.unwrap().is_some());
    }
}
