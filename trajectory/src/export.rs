//! GRPO-style training export.
//!
//! A training record is a flattened, self-contained view of one completed
//! trajectory: ordered steps with input/reasoning/output/confidence, the
//! final output, both context blobs and the derived quality metrics. Records
//! feed an external training pipeline and carry the schema version so the
//! consumer can detect shape changes.

use crate::types::{AnalysisTrajectory, TrajectoryMetrics, TrajectoryStatus};
use chrono::{DateTime, Utc};
use common::{Recommendation, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step in a training record, in recorded order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStep {
    pub step_number: u32,
    pub step_type: String,
    pub input_data: serde_json::Value,
    pub reasoning: Vec<String>,
    pub intermediate_result: serde_json::Value,
    pub confidence: f64,
}

/// A structured export of one completed trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub trajectory_id: Uuid,
    pub stock_id: String,
    pub analyst_type: String,
    pub steps: Vec<TrainingStep>,
    pub final_recommendation: Recommendation,
    pub final_confidence: f64,
    pub target_price: Option<f64>,
    pub final_reasoning: Vec<String>,
    pub user_context: serde_json::Value,
    pub market_context: serde_json::Value,
    pub metrics: TrajectoryMetrics,
    pub quality_score: f64,
    pub exported_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl TrainingRecord {
    /// Builds a record from a completed trajectory. Returns `None` for
    /// trajectories that never reached a final recommendation.
    pub fn from_trajectory(trajectory: &AnalysisTrajectory) -> Option<Self> {
        if trajectory.status != TrajectoryStatus::Completed {
            return None;
        }
        let recommendation = trajectory.recommendation?;
        let metrics = trajectory.metrics.clone()?;
        let quality_score = metrics.quality_score();

        let steps = trajectory
            .steps
            .iter()
            .map(|s| TrainingStep {
                step_number: s.step_number,
                step_type: s.step_type.as_str().to_string(),
                input_data: s.input_data.clone(),
                reasoning: s.reasoning.clone(),
                intermediate_result: s.intermediate_result.clone(),
                confidence: s.confidence,
            })
            .collect();

        Some(Self {
            trajectory_id: trajectory.trajectory_id,
            stock_id: trajectory.stock_id.clone(),
            analyst_type: trajectory.analyst_info.analyst_type.clone(),
            steps,
            final_recommendation: recommendation,
            final_confidence: trajectory.confidence.unwrap_or(0.0),
            target_price: trajectory.target_price,
            final_reasoning: trajectory.final_reasoning.clone(),
            user_context: trajectory.user_context.clone(),
            market_context: trajectory.market_context.clone(),
            metrics,
            quality_score,
            exported_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorConfig, StepRecord, TrajectoryCollector};
    use crate::storage::InMemoryTrajectoryStore;
    use crate::types::StepType;
    use common::AnalystInfo;
    use serde_json::json;
    use std::sync::Arc;

    async fn completed_trajectory_with_steps(n: usize) -> (TrajectoryCollector, Uuid) {
        let c = TrajectoryCollector::new(
            CollectorConfig::default(),
            Arc::new(InMemoryTrajectoryStore::new()),
        );
        let id = c
            .start_trajectory(
                "2330",
                AnalystInfo::new("technical", "1.0"),
                "user-1",
                json!({"tier": "premium"}),
                json!({"session": "regular"}),
            )
            .await
            .unwrap();
        for i in 0..n {
            c.record_step(
                id,
                StepRecord::new(StepType::FinancialAnalysis, json!({ "i": i }), 0.9)
                    .with_reasoning(vec![format!("step {}", i)]),
            )
            .await
            .unwrap();
        }
        c.complete_trajectory(id, Recommendation::Buy, 0.87, Some(600.0), vec![])
            .await
            .unwrap();
        (c, id)
    }

    #[tokio::test]
    async fn export_preserves_step_count_and_order() {
        let (c, id) = completed_trajectory_with_steps(3).await;
        let records = c.get_training_export("user-1", 0.0, 10);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.trajectory_id, id);
        assert_eq!(record.steps.len(), 3);
        for (i, step) in record.steps.iter().enumerate() {
            assert_eq!(step.step_number as usize, i + 1);
        }
        assert_eq!(record.final_recommendation, Recommendation::Buy);
        assert_eq!(record.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn export_skips_trajectories_below_minimum_step_count() {
        let (c, _) = completed_trajectory_with_steps(2).await;
        // Default minimum is 3 steps.
        assert!(c.get_training_export("user-1", 0.0, 10).is_empty());
    }

    #[tokio::test]
    async fn export_applies_quality_gate() {
        let (c, _) = completed_trajectory_with_steps(4).await;
        assert_eq!(c.get_training_export("user-1", 0.0, 10).len(), 1);
        assert!(c.get_training_export("user-1", 0.99, 10).is_empty());
    }

    #[tokio::test]
    async fn failed_trajectories_are_never_exported() {
        let c = TrajectoryCollector::new(
            CollectorConfig::default(),
            Arc::new(InMemoryTrajectoryStore::new()),
        );
        let id = c
            .start_trajectory(
                "2330",
                AnalystInfo::new("technical", "1.0"),
                "user-1",
                json!(null),
                json!(null),
            )
            .await
            .unwrap();
        for i in 0..4 {
            c.record_step(
                id,
                StepRecord::new(StepType::DataCollection, json!({ "i": i }), 0.9),
            )
            .await
            .unwrap();
        }
        c.fail_trajectory(id, "analyst error").await.unwrap();
        assert!(c.get_training_export("user-1", 0.0, 10).is_empty());
    }
}
