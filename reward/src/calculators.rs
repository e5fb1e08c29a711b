//! Reward calculator strategies.
//!
//! Each calculator scores one independent dimension of a completed
//! trajectory. The engine treats them as isolated: a calculator failure is
//! logged and skipped, and the signal is assembled from whichever components
//! succeeded.

use crate::types::{RewardMetrics, RewardType};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use common::{MarketPerformanceData, Recommendation, UserContext};
use trajectory::{AnalysisTrajectory, StepType};

/// One named reward dimension's scoring strategy.
#[async_trait]
pub trait RewardCalculator: Send + Sync {
    fn reward_type(&self) -> RewardType;

    async fn calculate(
        &self,
        trajectory: &AnalysisTrajectory,
        market: &MarketPerformanceData,
        user: &UserContext,
    ) -> Result<RewardMetrics>;
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn recommendation_of(trajectory: &AnalysisTrajectory) -> Result<Recommendation> {
    match trajectory.recommendation {
        Some(rec) => Ok(rec),
        None => bail!(
            "Trajectory {} has no final recommendation",
            trajectory.trajectory_id
        ),
    }
}

/// Configuration for the accuracy calculator.
#[derive(Debug, Clone)]
pub struct AccuracyConfig {
    /// Sigmoid steepness applied to the 30-day move.
    pub steepness: f64,
    /// Absolute move below which a HOLD counts as confirmed.
    pub hold_band: f64,
    /// Reward decay per elapsed day since the recommendation.
    pub daily_decay: f64,
    /// Decay never reduces the reward below this factor.
    pub decay_floor: f64,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            steepness: 10.0,
            hold_band: 0.05,
            daily_decay: 0.01,
            decay_floor: 0.5,
        }
    }
}

/// Scores how well the realized price move confirmed the recommendation.
///
/// The 30-day move is pushed through a direction-aware sigmoid, scaled by
/// the trajectory's own stated confidence, and decayed by elapsed time.
pub struct AccuracyCalculator {
    config: AccuracyConfig,
}

impl AccuracyCalculator {
    pub fn new(config: AccuracyConfig) -> Self {
        Self { config }
    }
}

impl Default for AccuracyCalculator {
    fn default() -> Self {
        Self::new(AccuracyConfig::default())
    }
}

#[async_trait]
impl RewardCalculator for AccuracyCalculator {
    fn reward_type(&self) -> RewardType {
        RewardType::Accuracy
    }

    async fn calculate(
        &self,
        trajectory: &AnalysisTrajectory,
        market: &MarketPerformanceData,
        _user: &UserContext,
    ) -> Result<RewardMetrics> {
        let rec = recommendation_of(trajectory)?;
        let confidence = trajectory.confidence.unwrap_or(0.5);
        let change = market.price_change_30d;

        // Map to [-1, 1]: positive when the move confirms the call.
        let direction_score = match rec {
            Recommendation::Buy => 2.0 * sigmoid(self.config.steepness * change) - 1.0,
            Recommendation::Sell => 2.0 * sigmoid(-self.config.steepness * change) - 1.0,
            Recommendation::Hold => 1.0 - 2.0 * (change.abs() / self.config.hold_band).min(1.0),
        };

        let elapsed_days = trajectory
            .ended_at
            .map(|end| (Utc::now() - end).num_days().max(0) as f64)
            .unwrap_or(0.0);
        let decay =
            (1.0 - self.config.daily_decay * elapsed_days).max(self.config.decay_floor);

        let raw = direction_score * confidence * decay;
        let quality = 0.5 * direction_score.abs() + 0.5 * confidence;

        Ok(RewardMetrics::new(RewardType::Accuracy, raw)
            .with_confidence(0.8)
            .with_quality(quality)
            .with_method("direction_sigmoid_30d")
            .with_sources(vec!["price_change_30d".to_string()]))
    }
}

/// Configuration for the return-performance calculator.
#[derive(Debug, Clone)]
pub struct ReturnPerformanceConfig {
    /// Weight on the benchmark-relative return.
    pub relative_weight: f64,
    /// Weight on the absolute directional return.
    pub absolute_weight: f64,
    /// tanh steepness for squashing returns into [-1, 1].
    pub squash_scale: f64,
    /// Factor pulling HOLD relative returns toward zero.
    pub hold_damping: f64,
}

impl Default for ReturnPerformanceConfig {
    fn default() -> Self {
        Self {
            relative_weight: 0.7,
            absolute_weight: 0.3,
            squash_scale: 3.0,
            hold_damping: 0.25,
        }
    }
}

/// Scores the realized return of following the recommendation, mostly
/// relative to the market benchmark.
pub struct ReturnPerformanceCalculator {
    config: ReturnPerformanceConfig,
}

impl ReturnPerformanceCalculator {
    pub fn new(config: ReturnPerformanceConfig) -> Self {
        Self { config }
    }
}

impl Default for ReturnPerformanceCalculator {
    fn default() -> Self {
        Self::new(ReturnPerformanceConfig::default())
    }
}

#[async_trait]
impl RewardCalculator for ReturnPerformanceCalculator {
    fn reward_type(&self) -> RewardType {
        RewardType::ReturnPerformance
    }

    async fn calculate(
        &self,
        trajectory: &AnalysisTrajectory,
        market: &MarketPerformanceData,
        _user: &UserContext,
    ) -> Result<RewardMetrics> {
        let rec = recommendation_of(trajectory)?;
        let change = market.price_change_30d;
        let benchmark = market.benchmark_change_30d;

        let (relative, directional) = match rec {
            Recommendation::Buy => (change - benchmark, change),
            Recommendation::Sell => (benchmark - change, -change),
            // A HOLD earns nothing directly; excess movement is mildly
            // penalized and relative credit is pulled toward zero.
            Recommendation::Hold => (
                (change - benchmark) * self.config.hold_damping,
                -change.abs() * 0.5,
            ),
        };

        let raw = self.config.relative_weight
            * (self.config.squash_scale * relative).tanh()
            + self.config.absolute_weight * (self.config.squash_scale * directional).tanh();

        Ok(RewardMetrics::new(RewardType::ReturnPerformance, raw)
            .with_confidence(0.75)
            .with_quality(0.5 + 0.5 * raw.abs())
            .with_method("relative_absolute_tanh")
            .with_sources(vec![
                "price_change_30d".to_string(),
                "benchmark_change_30d".to_string(),
            ]))
    }
}

/// Configuration for the risk-adjusted return calculator.
#[derive(Debug, Clone)]
pub struct RiskAdjustedConfig {
    /// Volatility floor to avoid dividing by near-zero realized vol.
    pub min_volatility: f64,
    /// Bonus added when the realized Sharpe ratio is positive.
    pub sharpe_bonus: f64,
}

impl Default for RiskAdjustedConfig {
    fn default() -> Self {
        Self {
            min_volatility: 0.05,
            sharpe_bonus: 0.1,
        }
    }
}

/// Scores return per unit of realized risk, penalized by drawdown.
pub struct RiskAdjustedReturnCalculator {
    config: RiskAdjustedConfig,
}

impl RiskAdjustedReturnCalculator {
    pub fn new(config: RiskAdjustedConfig) -> Self {
        Self { config }
    }
}

impl Default for RiskAdjustedReturnCalculator {
    fn default() -> Self {
        Self::new(RiskAdjustedConfig::default())
    }
}

#[async_trait]
impl RewardCalculator for RiskAdjustedReturnCalculator {
    fn reward_type(&self) -> RewardType {
        RewardType::RiskAdjustedReturn
    }

    async fn calculate(
        &self,
        trajectory: &AnalysisTrajectory,
        market: &MarketPerformanceData,
        _user: &UserContext,
    ) -> Result<RewardMetrics> {
        let rec = recommendation_of(trajectory)?;
        let directional = match rec {
            Recommendation::Buy => market.price_change_30d,
            Recommendation::Sell => -market.price_change_30d,
            Recommendation::Hold => -market.price_change_30d.abs() * 0.5,
        };

        let volatility = market.volatility_30d.max(self.config.min_volatility);
        let drawdown_penalty = (1.0 - 2.0 * market.max_drawdown.abs()).max(0.0);
        let mut raw = (directional / volatility) * drawdown_penalty;
        if market.sharpe_ratio > 0.0 {
            raw += self.config.sharpe_bonus * market.sharpe_ratio.min(1.0);
        }
        let raw = raw.clamp(-1.0, 1.0);

        Ok(RewardMetrics::new(RewardType::RiskAdjustedReturn, raw)
            .with_confidence(0.7)
            .with_quality(drawdown_penalty)
            .with_method("return_over_volatility")
            .with_sources(vec![
                "price_change_30d".to_string(),
                "volatility_30d".to_string(),
                "max_drawdown".to_string(),
                "sharpe_ratio".to_string(),
            ]))
    }
}

/// Configuration for the reasoning-quality calculator.
#[derive(Debug, Clone)]
pub struct ReasoningQualityConfig {
    pub depth_weight: f64,
    pub consistency_weight: f64,
    pub completeness_weight: f64,
    pub terminal_step_weight: f64,
    /// Total reasoning characters at which depth saturates.
    pub depth_saturation_chars: f64,
}

impl Default for ReasoningQualityConfig {
    fn default() -> Self {
        Self {
            depth_weight: 0.3,
            consistency_weight: 0.25,
            completeness_weight: 0.25,
            terminal_step_weight: 0.2,
            depth_saturation_chars: 800.0,
        }
    }
}

/// Scores the recorded reasoning process itself, independent of outcome.
pub struct ReasoningQualityCalculator {
    config: ReasoningQualityConfig,
}

impl ReasoningQualityCalculator {
    pub fn new(config: ReasoningQualityConfig) -> Self {
        Self { config }
    }
}

impl Default for ReasoningQualityCalculator {
    fn default() -> Self {
        Self::new(ReasoningQualityConfig::default())
    }
}

#[async_trait]
impl RewardCalculator for ReasoningQualityCalculator {
    fn reward_type(&self) -> RewardType {
        RewardType::ReasoningQuality
    }

    async fn calculate(
        &self,
        trajectory: &AnalysisTrajectory,
        _market: &MarketPerformanceData,
        _user: &UserContext,
    ) -> Result<RewardMetrics> {
        let steps = &trajectory.steps;
        if steps.is_empty() {
            bail!(
                "Trajectory {} has no recorded steps",
                trajectory.trajectory_id
            );
        }
        let n = steps.len() as f64;

        let avg_reasoning_chars = steps
            .iter()
            .map(|s| s.reasoning.iter().map(|r| r.len()).sum::<usize>())
            .sum::<usize>() as f64
            / n;
        let depth = (n * avg_reasoning_chars / self.config.depth_saturation_chars).min(1.0);

        let mean_conf = steps.iter().map(|s| s.confidence).sum::<f64>() / n;
        let variance = steps
            .iter()
            .map(|s| (s.confidence - mean_conf).powi(2))
            .sum::<f64>()
            / n;
        let consistency = (1.0 - 2.0 * variance.sqrt()).clamp(0.0, 1.0);

        let expected = StepType::expected_coverage();
        let completeness = expected
            .iter()
            .filter(|t| steps.iter().any(|s| s.step_type == **t))
            .count() as f64
            / expected.len() as f64;

        let has_terminal = steps
            .iter()
            .any(|s| s.step_type == StepType::RecommendationLogic);
        let terminal = if has_terminal { 1.0 } else { 0.0 };

        let blend = self.config.depth_weight * depth
            + self.config.consistency_weight * consistency
            + self.config.completeness_weight * completeness
            + self.config.terminal_step_weight * terminal;
        // Blend is in [0, 1]; rescale to the [-1, 1] reward band.
        let raw = 2.0 * blend - 1.0;

        Ok(RewardMetrics::new(RewardType::ReasoningQuality, raw)
            .with_confidence(0.9)
            .with_quality(blend)
            .with_method("process_quality_blend")
            .with_sources(vec!["decision_steps".to_string()]))
    }
}
