//! Trajectory collector: lifecycle owner for in-flight analysis runs.

use crate::export::TrainingRecord;
use crate::storage::TrajectoryStore;
use crate::types::{
    AnalysisTrajectory, DecisionStep, StepTelemetry, StepType, TrajectoryMetrics, TrajectoryStatus,
};
use chrono::{Duration, Utc};
use common::{AnalystInfo, Recommendation, TrajectoryError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the trajectory collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Capacity guard for the active set.
    pub max_active_trajectories: usize,
    /// Trajectories idle longer than this are force-failed during eviction.
    pub idle_timeout_secs: i64,
    /// Reasoning lists longer than this are truncated to bound storage.
    pub max_reasoning_entries: usize,
    /// Individual reasoning strings longer than this are truncated.
    pub max_reasoning_chars: usize,
    /// Minimum step count for a trajectory to qualify for training export.
    pub min_export_steps: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_active_trajectories: 1000,
            idle_timeout_secs: 24 * 60 * 60,
            max_reasoning_entries: 20,
            max_reasoning_chars: 2000,
            min_export_steps: 3,
        }
    }
}

/// Payload for one `record_step` call.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_type: StepType,
    pub input_data: serde_json::Value,
    pub reasoning: Vec<String>,
    pub intermediate_result: serde_json::Value,
    pub confidence: f64,
    pub computation_method: String,
    pub model_id: Option<String>,
    pub data_dependencies: Vec<String>,
    pub telemetry: Option<StepTelemetry>,
}

impl StepRecord {
    pub fn new(step_type: StepType, input_data: serde_json::Value, confidence: f64) -> Self {
        Self {
            step_type,
            input_data,
            reasoning: Vec::new(),
            intermediate_result: serde_json::Value::Null,
            confidence,
            computation_method: "rule_based".to_string(),
            model_id: None,
            data_dependencies: Vec::new(),
            telemetry: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: Vec<String>) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.intermediate_result = result;
        self
    }
}

/// Filters for trajectory queries.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryFilter {
    pub status: Option<TrajectoryStatus>,
    pub stock_id: Option<String>,
    pub analyst_type: Option<String>,
}

/// Counters over the collector's current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorStats {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_steps_recorded: usize,
}

/// Records reasoning steps for in-flight analysis runs and finalizes them
/// into immutable trajectory records.
pub struct TrajectoryCollector {
    config: CollectorConfig,
    active: DashMap<Uuid, AnalysisTrajectory>,
    completed: DashMap<Uuid, AnalysisTrajectory>,
    store: Arc<dyn TrajectoryStore>,
}

impl TrajectoryCollector {
    pub fn new(config: CollectorConfig, store: Arc<dyn TrajectoryStore>) -> Self {
        Self {
            config,
            active: DashMap::new(),
            completed: DashMap::new(),
            store,
        }
    }

    /// Opens a new active trajectory and returns its id.
    ///
    /// When the active set is full, idle trajectories are evicted first; if
    /// that frees no slot the call fails with `CapacityExceeded`.
    pub async fn start_trajectory(
        &self,
        stock_id: &str,
        analyst_info: AnalystInfo,
        user_id: &str,
        user_context: serde_json::Value,
        market_context: serde_json::Value,
    ) -> Result<Uuid, TrajectoryError> {
        if self.active.len() >= self.config.max_active_trajectories {
            let evicted = self.evict_idle().await;
            if evicted > 0 {
                info!(evicted, "Evicted idle trajectories to free capacity");
            }
            if self.active.len() >= self.config.max_active_trajectories {
                return Err(TrajectoryError::CapacityExceeded {
                    active: self.active.len(),
                    limit: self.config.max_active_trajectories,
                });
            }
        }

        let trajectory =
            AnalysisTrajectory::new(stock_id, analyst_info, user_id, user_context, market_context);
        let trajectory_id = trajectory.trajectory_id;
        debug!(%trajectory_id, stock_id, user_id, "Started trajectory");
        self.active.insert(trajectory_id, trajectory);
        Ok(trajectory_id)
    }

    /// Appends one reasoning step to an active trajectory.
    pub async fn record_step(
        &self,
        trajectory_id: Uuid,
        record: StepRecord,
    ) -> Result<Uuid, TrajectoryError> {
        let mut entry = self
            .active
            .get_mut(&trajectory_id)
            .ok_or_else(|| self.missing_error(trajectory_id))?;

        let step_number = entry.steps.len() as u32 + 1;
        let input_hash = content_hash(&record.input_data);
        let mut reasoning = record.reasoning;
        if reasoning.len() > self.config.max_reasoning_entries {
            reasoning.truncate(self.config.max_reasoning_entries);
        }
        for entry_text in reasoning.iter_mut() {
            if entry_text.len() > self.config.max_reasoning_chars {
                let mut cut = self.config.max_reasoning_chars;
                while !entry_text.is_char_boundary(cut) {
                    cut -= 1;
                }
                entry_text.truncate(cut);
            }
        }

        let step = DecisionStep {
            step_id: Uuid::new_v4(),
            trajectory_id,
            step_number,
            step_type: record.step_type,
            input_data: record.input_data,
            input_hash,
            reasoning,
            intermediate_result: record.intermediate_result,
            confidence: record.confidence.clamp(0.0, 1.0),
            computation_method: record.computation_method,
            model_id: record.model_id,
            data_dependencies: record.data_dependencies,
            telemetry: record.telemetry,
            recorded_at: Utc::now(),
        };
        let step_id = step.step_id;
        entry.last_activity = step.recorded_at;
        entry.steps.push(step);
        debug!(%trajectory_id, step_number, "Recorded decision step");
        Ok(step_id)
    }

    /// Finalizes an active trajectory as completed, computes its metrics and
    /// persists it in the background.
    pub async fn complete_trajectory(
        &self,
        trajectory_id: Uuid,
        recommendation: Recommendation,
        confidence: f64,
        target_price: Option<f64>,
        reasoning: Vec<String>,
    ) -> Result<AnalysisTrajectory, TrajectoryError> {
        let (_, mut trajectory) = self
            .active
            .remove(&trajectory_id)
            .ok_or_else(|| self.missing_error(trajectory_id))?;

        trajectory.status = TrajectoryStatus::Completed;
        trajectory.recommendation = Some(recommendation);
        trajectory.confidence = Some(confidence.clamp(0.0, 1.0));
        trajectory.target_price = target_price;
        trajectory.final_reasoning = reasoning;
        trajectory.ended_at = Some(Utc::now());
        trajectory.metrics = Some(TrajectoryMetrics::from_steps(
            &trajectory.steps,
            TrajectoryStatus::Completed,
        ));

        info!(
            %trajectory_id,
            steps = trajectory.steps.len(),
            %recommendation,
            "Completed trajectory"
        );
        self.completed.insert(trajectory_id, trajectory.clone());
        self.persist_in_background(trajectory.clone());
        Ok(trajectory)
    }

    /// Finalizes an active trajectory as failed, recording the reason.
    pub async fn fail_trajectory(
        &self,
        trajectory_id: Uuid,
        reason: &str,
    ) -> Result<AnalysisTrajectory, TrajectoryError> {
        let (_, mut trajectory) = self
            .active
            .remove(&trajectory_id)
            .ok_or_else(|| self.missing_error(trajectory_id))?;

        trajectory.status = TrajectoryStatus::Failed;
        trajectory.failure_reason = Some(reason.to_string());
        trajectory.ended_at = Some(Utc::now());
        trajectory.metrics = Some(TrajectoryMetrics::from_steps(
            &trajectory.steps,
            TrajectoryStatus::Failed,
        ));

        warn!(%trajectory_id, reason, "Failed trajectory");
        self.completed.insert(trajectory_id, trajectory.clone());
        self.persist_in_background(trajectory.clone());
        Ok(trajectory)
    }

    /// Force-fails trajectories idle longer than the configured timeout.
    /// Returns the number evicted.
    pub async fn evict_idle(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.config.idle_timeout_secs);
        let idle: Vec<Uuid> = self
            .active
            .iter()
            .filter(|entry| entry.last_activity < cutoff)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for trajectory_id in idle {
            match self
                .fail_trajectory(trajectory_id, "Idle timeout exceeded")
                .await
            {
                Ok(_) => evicted += 1,
                // Finalized concurrently between scan and eviction.
                Err(TrajectoryError::NotFound { .. })
                | Err(TrajectoryError::NotActive { .. }) => {}
                Err(e) => warn!(%trajectory_id, error = %e, "Idle eviction failed"),
            }
        }
        evicted
    }

    /// Looks up a trajectory in the completed set first, then the active set.
    pub fn get_trajectory(&self, trajectory_id: Uuid) -> Option<AnalysisTrajectory> {
        self.completed
            .get(&trajectory_id)
            .map(|t| t.clone())
            .or_else(|| self.active.get(&trajectory_id).map(|t| t.clone()))
    }

    /// Returns a user's trajectories, newest first, capped at `limit`.
    pub fn get_user_trajectories(
        &self,
        user_id: &str,
        filter: TrajectoryFilter,
        limit: usize,
    ) -> Vec<AnalysisTrajectory> {
        let mut matches: Vec<AnalysisTrajectory> = self
            .completed
            .iter()
            .chain(self.active.iter())
            .filter(|t| t.user_id == user_id)
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .stock_id
                    .as_deref()
                    .map_or(true, |s| t.stock_id == s)
            })
            .filter(|t| {
                filter
                    .analyst_type
                    .as_deref()
                    .map_or(true, |a| t.analyst_info.analyst_type == a)
            })
            .map(|t| t.clone())
            .collect();
        matches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matches.truncate(limit);
        matches
    }

    /// Produces GRPO-style training records for a user's completed
    /// trajectories that clear the quality and step-count gates.
    pub fn get_training_export(
        &self,
        user_id: &str,
        min_quality: f64,
        limit: usize,
    ) -> Vec<TrainingRecord> {
        let mut records: Vec<TrainingRecord> = self
            .completed
            .iter()
            .filter(|t| t.user_id == user_id && t.status == TrajectoryStatus::Completed)
            .filter(|t| t.steps.len() >= self.config.min_export_steps)
            .filter_map(|t| TrainingRecord::from_trajectory(&t))
            .filter(|r| r.quality_score >= min_quality)
            .collect();
        records.sort_by(|a, b| b.exported_at.cmp(&a.exported_at));
        records.truncate(limit);
        records
    }

    pub fn stats(&self) -> CollectorStats {
        let failed = self
            .completed
            .iter()
            .filter(|t| t.status == TrajectoryStatus::Failed)
            .count();
        let total_steps_recorded = self
            .completed
            .iter()
            .chain(self.active.iter())
            .map(|t| t.steps.len())
            .sum();
        CollectorStats {
            active: self.active.len(),
            completed: self.completed.len() - failed,
            failed,
            total_steps_recorded,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    fn missing_error(&self, trajectory_id: Uuid) -> TrajectoryError {
        if self.completed.contains_key(&trajectory_id) {
            TrajectoryError::NotActive { trajectory_id }
        } else {
            TrajectoryError::NotFound { trajectory_id }
        }
    }

    /// Persistence runs off the critical path; a failed write is logged and
    /// the in-memory record remains authoritative.
    fn persist_in_background(&self, trajectory: AnalysisTrajectory) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let trajectory_id = trajectory.trajectory_id;
            if let Err(e) = store.save(&trajectory).await {
                error!(%trajectory_id, error = %e, "Trajectory persistence failed");
            }
        });
    }
}

fn content_hash(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryTrajectoryStore;
    use serde_json::json;

    fn collector() -> TrajectoryCollector {
        TrajectoryCollector::new(
            CollectorConfig::default(),
            Arc::new(InMemoryTrajectoryStore::new()),
        )
    }

    async fn start(c: &TrajectoryCollector) -> Uuid {
        c.start_trajectory(
            "2330",
            AnalystInfo::new("technical", "1.0"),
            "user-1",
            json!({"tier": "free"}),
            json!({"session": "regular"}),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn step_numbers_are_gapless_and_one_based() {
        let c = collector();
        let id = start(&c).await;
        for i in 0..5 {
            c.record_step(
                id,
                StepRecord::new(StepType::DataCollection, json!({ "i": i }), 0.8),
            )
            .await
            .unwrap();
        }
        let t = c.get_trajectory(id).unwrap();
        for (i, step) in t.steps.iter().enumerate() {
            assert_eq!(step.step_number as usize, i + 1);
        }
    }

    #[tokio::test]
    async fn record_step_on_unknown_id_is_not_found() {
        let c = collector();
        let err = c
            .record_step(
                Uuid::new_v4(),
                StepRecord::new(StepType::DataCollection, json!({}), 0.5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrajectoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn finalized_trajectory_rejects_further_writes() {
        let c = collector();
        let id = start(&c).await;
        c.complete_trajectory(id, Recommendation::Buy, 0.9, None, vec![])
            .await
            .unwrap();

        let err = c
            .record_step(
                id,
                StepRecord::new(StepType::Validation, json!({}), 0.5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrajectoryError::NotActive { .. }));

        // Completing twice is a usage error.
        let err = c
            .complete_trajectory(id, Recommendation::Buy, 0.9, None, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, TrajectoryError::NotActive { .. }));
    }

    #[tokio::test]
    async fn reasoning_is_truncated_to_configured_bounds() {
        let config = CollectorConfig {
            max_reasoning_entries: 2,
            max_reasoning_chars: 5,
            ..CollectorConfig::default()
        };
        let c = TrajectoryCollector::new(config, Arc::new(InMemoryTrajectoryStore::new()));
        let id = start(&c).await;

        c.record_step(
            id,
            StepRecord::new(StepType::FinancialAnalysis, json!({}), 0.7).with_reasoning(vec![
                "aaaaaaaaaa".to_string(),
                "bb".to_string(),
                "cc".to_string(),
            ]),
        )
        .await
        .unwrap();

        let t = c.get_trajectory(id).unwrap();
        assert_eq!(t.steps[0].reasoning.len(), 2);
        assert_eq!(t.steps[0].reasoning[0], "aaaaa");
    }

    #[tokio::test]
    async fn capacity_guard_evicts_idle_before_rejecting() {
        let config = CollectorConfig {
            max_active_trajectories: 1,
            idle_timeout_secs: 0,
            ..CollectorConfig::default()
        };
        let c = TrajectoryCollector::new(config, Arc::new(InMemoryTrajectoryStore::new()));

        let first = start(&c).await;
        // The first trajectory is immediately idle (timeout 0), so starting a
        // second one evicts it instead of failing.
        let second = start(&c).await;
        assert_ne!(first, second);

        let evicted = c.get_trajectory(first).unwrap();
        assert_eq!(evicted.status, TrajectoryStatus::Failed);
        assert_eq!(
            evicted.failure_reason.as_deref(),
            Some("Idle timeout exceeded")
        );
    }

    #[tokio::test]
    async fn capacity_guard_rejects_when_nothing_is_idle() {
        let config = CollectorConfig {
            max_active_trajectories: 1,
            ..CollectorConfig::default()
        };
        let c = TrajectoryCollector::new(config, Arc::new(InMemoryTrajectoryStore::new()));
        let _busy = start(&c).await;

        let err = c
            .start_trajectory(
                "2317",
                AnalystInfo::new("technical", "1.0"),
                "user-2",
                json!(null),
                json!(null),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrajectoryError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn input_hash_is_deterministic() {
        let c = collector();
        let id = start(&c).await;
        c.record_step(
            id,
            StepRecord::new(StepType::DataCollection, json!({"a": 1}), 0.8),
        )
        .await
        .unwrap();
        c.record_step(
            id,
            StepRecord::new(StepType::DataCollection, json!({"a": 1}), 0.8),
        )
        .await
        .unwrap();
        let t = c.get_trajectory(id).unwrap();
        assert_eq!(t.steps[0].input_hash, t.steps[1].input_hash);
        assert_eq!(t.steps[0].input_hash.len(), 64);
    }

    #[tokio::test]
    async fn user_trajectory_query_applies_filters_and_limit() {
        let c = collector();
        for _ in 0..3 {
            let id = start(&c).await;
            c.complete_trajectory(id, Recommendation::Hold, 0.5, None, vec![])
                .await
                .unwrap();
        }
        let _active = start(&c).await;

        let all = c.get_user_trajectories("user-1", TrajectoryFilter::default(), 10);
        assert_eq!(all.len(), 4);

        let completed = c.get_user_trajectories(
            "user-1",
            TrajectoryFilter {
                status: Some(TrajectoryStatus::Completed),
                ..TrajectoryFilter::default()
            },
            10,
        );
        assert_eq!(completed.len(), 3);

        let limited = c.get_user_trajectories("user-1", TrajectoryFilter::default(), 2);
        assert_eq!(limited.len(), 2);

        assert!(c
            .get_user_trajectories("someone-else", TrajectoryFilter::default(), 10)
            .is_empty());
    }
}
