//! Trajectory and decision-step data model.

use chrono::{DateTime, Utc};
use common::{AnalystInfo, Recommendation, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Category of one recorded reasoning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    DataCollection,
    FinancialAnalysis,
    RiskAssessment,
    SentimentAnalysis,
    RecommendationLogic,
    Validation,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::DataCollection => "data_collection",
            StepType::FinancialAnalysis => "financial_analysis",
            StepType::RiskAssessment => "risk_assessment",
            StepType::SentimentAnalysis => "sentiment_analysis",
            StepType::RecommendationLogic => "recommendation_logic",
            StepType::Validation => "validation",
        }
    }

    /// Step categories a thorough analysis is expected to cover.
    pub fn expected_coverage() -> &'static [StepType] {
        &[
            StepType::DataCollection,
            StepType::FinancialAnalysis,
            StepType::RiskAssessment,
            StepType::RecommendationLogic,
        ]
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a trajectory. Terminal states are permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajectoryStatus {
    Active,
    Completed,
    Failed,
}

/// Optional performance telemetry attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTelemetry {
    pub elapsed_ms: u64,
    pub memory_bytes: Option<u64>,
}

/// One atomic recorded reasoning event. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionStep {
    pub step_id: Uuid,
    pub trajectory_id: Uuid,
    /// 1-based, monotonically increasing, no gaps within a trajectory.
    pub step_number: u32,
    pub step_type: StepType,
    pub input_data: serde_json::Value,
    /// SHA-256 hex digest of the serialized input, for dedup and audit.
    pub input_hash: String,
    pub reasoning: Vec<String>,
    pub intermediate_result: serde_json::Value,
    /// Step-level confidence in [0, 1].
    pub confidence: f64,
    pub computation_method: String,
    pub model_id: Option<String>,
    /// Names of upstream data sources this step consumed.
    pub data_dependencies: Vec<String>,
    pub telemetry: Option<StepTelemetry>,
    pub recorded_at: DateTime<Utc>,
}

/// Derived quality summary, computed once at trajectory completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryMetrics {
    pub total_steps: usize,
    pub average_confidence: f64,
    /// 1 − normalized stddev of step confidences; 1.0 means perfectly steady.
    pub confidence_consistency: f64,
    /// Average number of reasoning entries per step.
    pub reasoning_depth: f64,
    /// Fraction of steps that declared at least one data dependency.
    pub data_utilization: f64,
    pub completion_rate: f64,
    /// Fraction of validation-type steps that passed (confidence >= 0.5).
    pub validation_pass_rate: f64,
}

impl TrajectoryMetrics {
    pub fn from_steps(steps: &[DecisionStep], status: TrajectoryStatus) -> Self {
        let total_steps = steps.len();
        if total_steps == 0 {
            return Self {
                total_steps: 0,
                average_confidence: 0.0,
                confidence_consistency: 0.0,
                reasoning_depth: 0.0,
                data_utilization: 0.0,
                completion_rate: if status == TrajectoryStatus::Completed {
                    1.0
                } else {
                    0.0
                },
                validation_pass_rate: 1.0,
            };
        }

        let n = total_steps as f64;
        let average_confidence = steps.iter().map(|s| s.confidence).sum::<f64>() / n;
        let variance = steps
            .iter()
            .map(|s| (s.confidence - average_confidence).powi(2))
            .sum::<f64>()
            / n;
        // Stddev of values in [0,1] is at most 0.5, so 2x normalizes to [0,1].
        let confidence_consistency = (1.0 - 2.0 * variance.sqrt()).clamp(0.0, 1.0);

        let reasoning_depth =
            steps.iter().map(|s| s.reasoning.len()).sum::<usize>() as f64 / n;
        let data_utilization = steps
            .iter()
            .filter(|s| !s.data_dependencies.is_empty())
            .count() as f64
            / n;

        let covered: HashSet<StepType> = steps.iter().map(|s| s.step_type).collect();
        let expected = StepType::expected_coverage();
        let coverage = expected.iter().filter(|t| covered.contains(t)).count() as f64
            / expected.len() as f64;
        let completion_rate = if status == TrajectoryStatus::Completed {
            1.0
        } else {
            coverage
        };

        let validation_steps: Vec<&DecisionStep> = steps
            .iter()
            .filter(|s| s.step_type == StepType::Validation)
            .collect();
        let validation_pass_rate = if validation_steps.is_empty() {
            1.0
        } else {
            validation_steps.iter().filter(|s| s.confidence >= 0.5).count() as f64
                / validation_steps.len() as f64
        };

        Self {
            total_steps,
            average_confidence,
            confidence_consistency,
            reasoning_depth,
            data_utilization,
            completion_rate,
            validation_pass_rate,
        }
    }

    /// Composite quality score in [0, 1] used to gate training exports.
    pub fn quality_score(&self) -> f64 {
        let depth = (self.reasoning_depth / 3.0).min(1.0);
        0.35 * self.average_confidence
            + 0.25 * self.confidence_consistency
            + 0.2 * self.completion_rate
            + 0.2 * depth
    }
}

/// The unit of work: one analysis run's recorded steps and final output.
///
/// Steps may only be appended while `status` is `Active`; completion and
/// failure are one-shot transitions out of the active set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTrajectory {
    pub trajectory_id: Uuid,
    pub stock_id: String,
    pub analyst_info: AnalystInfo,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Updated on every recorded step; drives idle eviction.
    pub last_activity: DateTime<Utc>,
    pub steps: Vec<DecisionStep>,
    pub recommendation: Option<Recommendation>,
    pub confidence: Option<f64>,
    pub target_price: Option<f64>,
    pub final_reasoning: Vec<String>,
    pub user_context: serde_json::Value,
    pub market_context: serde_json::Value,
    pub status: TrajectoryStatus,
    pub failure_reason: Option<String>,
    pub metrics: Option<TrajectoryMetrics>,
    pub schema_version: u32,
}

impl AnalysisTrajectory {
    pub fn new(
        stock_id: impl Into<String>,
        analyst_info: AnalystInfo,
        user_id: impl Into<String>,
        user_context: serde_json::Value,
        market_context: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            trajectory_id: Uuid::new_v4(),
            stock_id: stock_id.into(),
            analyst_info,
            user_id: user_id.into(),
            started_at: now,
            ended_at: None,
            last_activity: now,
            steps: Vec::new(),
            recommendation: None,
            confidence: None,
            target_price: None,
            final_reasoning: Vec::new(),
            user_context,
            market_context,
            status: TrajectoryStatus::Active,
            failure_reason: None,
            metrics: None,
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TrajectoryStatus::Active
    }
}
