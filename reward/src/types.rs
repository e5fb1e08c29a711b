//! Reward signal data model.

use chrono::{DateTime, Utc};
use common::{MembershipTier, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Named reward dimensions produced by the calculator registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardType {
    Accuracy,
    ReturnPerformance,
    RiskAdjustedReturn,
    ReasoningQuality,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Accuracy => "accuracy",
            RewardType::ReturnPerformance => "return_performance",
            RewardType::RiskAdjustedReturn => "risk_adjusted_return",
            RewardType::ReasoningQuality => "reasoning_quality",
        }
    }

    pub fn all() -> &'static [RewardType] {
        &[
            RewardType::Accuracy,
            RewardType::ReturnPerformance,
            RewardType::RiskAdjustedReturn,
            RewardType::ReasoningQuality,
        ]
    }
}

impl std::fmt::Display for RewardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reward component's value and provenance.
///
/// All reward fields are intended to lie in [-1, 1] after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardMetrics {
    pub reward_type: RewardType,
    pub raw_reward: f64,
    pub weighted_reward: f64,
    pub final_reward: f64,
    /// Calculator's confidence in this component, in [0, 1].
    pub confidence: f64,
    /// Data-quality estimate in [0, 1]; drives dynamic weight adaptation.
    pub quality_score: f64,
    pub calculation_method: String,
    pub data_sources: Vec<String>,
    /// Set by the validator once the component passed its checks.
    pub is_validated: bool,
    pub computed_at: DateTime<Utc>,
}

impl RewardMetrics {
    pub fn new(reward_type: RewardType, raw_reward: f64) -> Self {
        let raw = raw_reward.clamp(-1.0, 1.0);
        Self {
            reward_type,
            raw_reward: raw,
            weighted_reward: raw,
            final_reward: raw,
            confidence: 0.5,
            quality_score: 0.5,
            calculation_method: String::new(),
            data_sources: Vec::new(),
            is_validated: false,
            computed_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = quality_score.clamp(0.0, 1.0);
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.calculation_method = method.into();
        self
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.data_sources = sources;
        self
    }
}

/// Aggregate multi-component reward for one trajectory.
///
/// `total_reward` is a weight-normalized mean over the components present and
/// is recomputed on every component change, never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardSignal {
    pub signal_id: Uuid,
    pub trajectory_id: Uuid,
    pub user_id: String,
    pub components: HashMap<RewardType, RewardMetrics>,
    pub weights: HashMap<RewardType, f64>,
    pub total_reward: f64,
    /// `total_reward` scaled by the membership-tier multiplier.
    pub weighted_total_reward: f64,
    pub membership_tier: MembershipTier,
    pub is_final: bool,
    pub requires_validation: bool,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl RewardSignal {
    pub fn new(
        trajectory_id: Uuid,
        user_id: impl Into<String>,
        membership_tier: MembershipTier,
    ) -> Self {
        Self {
            signal_id: Uuid::new_v4(),
            trajectory_id,
            user_id: user_id.into(),
            components: HashMap::new(),
            weights: HashMap::new(),
            total_reward: 0.0,
            weighted_total_reward: 0.0,
            membership_tier,
            is_final: false,
            requires_validation: true,
            created_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Adds or replaces one component and recomputes both totals.
    pub fn add_reward_component(&mut self, mut metrics: RewardMetrics, weight: f64) {
        let weight = weight.max(0.0);
        metrics.weighted_reward = metrics.raw_reward * weight;
        metrics.final_reward = metrics.raw_reward;
        self.weights.insert(metrics.reward_type, weight);
        self.components.insert(metrics.reward_type, metrics);
        self.recompute_totals();
    }

    /// Overrides one component's final reward (validator correction path)
    /// and recomputes totals.
    pub fn correct_component(&mut self, reward_type: RewardType, corrected: f64) {
        if let Some(metrics) = self.components.get_mut(&reward_type) {
            metrics.final_reward = corrected.clamp(-1.0, 1.0);
        }
        self.recompute_totals();
    }

    fn recompute_totals(&mut self) {
        let weight_sum: f64 = self
            .components
            .keys()
            .map(|t| self.weights.get(t).copied().unwrap_or(0.0))
            .sum();
        self.total_reward = if weight_sum > 0.0 {
            self.components
                .iter()
                .map(|(t, m)| m.final_reward * self.weights.get(t).copied().unwrap_or(0.0))
                .sum::<f64>()
                / weight_sum
        } else {
            0.0
        };
        self.weighted_total_reward = self.total_reward * self.membership_tier.multiplier();
    }

    pub fn component(&self, reward_type: RewardType) -> Option<&RewardMetrics> {
        self.components.get(&reward_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(tier: MembershipTier) -> RewardSignal {
        RewardSignal::new(Uuid::new_v4(), "user-1", tier)
    }

    #[test]
    fn totals_recomputed_on_every_component_add() {
        let mut s = signal(MembershipTier::Free);
        s.add_reward_component(RewardMetrics::new(RewardType::Accuracy, 0.8), 0.5);
        assert!((s.total_reward - 0.8).abs() < 1e-9);

        s.add_reward_component(RewardMetrics::new(RewardType::ReasoningQuality, 0.2), 0.5);
        // Equal weights: (0.8 + 0.2) / 2.
        assert!((s.total_reward - 0.5).abs() < 1e-9);

        // Replacing a component recomputes, never caches stale.
        s.add_reward_component(RewardMetrics::new(RewardType::Accuracy, 0.0), 0.5);
        assert!((s.total_reward - 0.1).abs() < 1e-9);
    }

    #[test]
    fn weighted_total_applies_tier_multiplier() {
        let mut s = signal(MembershipTier::Enterprise);
        s.add_reward_component(RewardMetrics::new(RewardType::Accuracy, 0.6), 0.3);
        s.add_reward_component(RewardMetrics::new(RewardType::ReturnPerformance, 0.2), 0.1);
        let expected_total = (0.6 * 0.3 + 0.2 * 0.1) / 0.4;
        assert!((s.total_reward - expected_total).abs() < 1e-9);
        assert!((s.weighted_total_reward - expected_total * 1.5).abs() < 1e-9);
    }

    #[test]
    fn empty_signal_has_zero_totals() {
        let s = signal(MembershipTier::Premium);
        assert_eq!(s.total_reward, 0.0);
        assert_eq!(s.weighted_total_reward, 0.0);
    }

    #[test]
    fn correction_updates_totals() {
        let mut s = signal(MembershipTier::Free);
        s.add_reward_component(RewardMetrics::new(RewardType::Accuracy, 0.9), 1.0);
        s.correct_component(RewardType::Accuracy, 0.4);
        assert!((s.total_reward - 0.4).abs() < 1e-9);
        assert!((s.components[&RewardType::Accuracy].final_reward - 0.4).abs() < 1e-9);
    }

    #[test]
    fn raw_reward_is_clamped_to_unit_band() {
        let m = RewardMetrics::new(RewardType::Accuracy, 3.5);
        assert_eq!(m.raw_reward, 1.0);
        let m = RewardMetrics::new(RewardType::Accuracy, -2.0);
        assert_eq!(m.raw_reward, -1.0);
    }
}
