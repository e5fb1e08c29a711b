//! Validation engines, one per rule type.

use crate::rules::{ValidationResult, ValidationRule, ValidationStatus};
use anyhow::Result;
use async_trait::async_trait;
use reward::RewardSignal;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::rules::ValidationRuleType;

/// Dispatch target for one rule type.
#[async_trait]
pub trait ValidationEngine: Send + Sync {
    fn rule_type(&self) -> ValidationRuleType;

    async fn check(
        &self,
        rule: &ValidationRule,
        signal: &RewardSignal,
        history: &[RewardSignal],
    ) -> Result<ValidationResult>;
}

/// Flags signals whose weighted total falls outside the configured band.
pub struct RangeCheckEngine;

#[async_trait]
impl ValidationEngine for RangeCheckEngine {
    fn rule_type(&self) -> ValidationRuleType {
        ValidationRuleType::RangeCheck
    }

    async fn check(
        &self,
        rule: &ValidationRule,
        signal: &RewardSignal,
        _history: &[RewardSignal],
    ) -> Result<ValidationResult> {
        let value = signal.weighted_total_reward;
        if value >= rule.min_value && value <= rule.max_value {
            return Ok(
                ValidationResult::new(signal, rule, ValidationStatus::Passed)
                    .with_confidence(0.95)
                    .with_detail("Value within configured range"),
            );
        }

        let (overshoot, bound) = if value > rule.max_value {
            (value - rule.max_value, rule.max_value)
        } else {
            (rule.min_value - value, rule.min_value)
        };
        let status = if overshoot > rule.tolerance {
            ValidationStatus::Failed
        } else {
            ValidationStatus::Warning
        };
        debug!(
            signal_id = %signal.signal_id,
            value,
            overshoot,
            "Range check breach"
        );
        Ok(ValidationResult::new(signal, rule, status)
            .with_confidence(0.9)
            .with_deviation(overshoot)
            .with_expected(bound)
            .with_detail(format!(
                "Value {:.4} outside [{:.2}, {:.2}] by {:.4}",
                value, rule.min_value, rule.max_value, overshoot
            )))
    }
}

/// Flags signals that are statistical outliers against recent history.
///
/// Two independent detectors (z-score and IQR bounds) must agree for a hard
/// failure; one flag alone is a warning. Too little history yields a
/// low-confidence warning rather than a silent skip.
pub struct OutlierDetectionEngine {
    /// Minimum historical signals required for a meaningful verdict.
    pub min_history: usize,
}

impl OutlierDetectionEngine {
    pub fn new() -> Self {
        Self { min_history: 10 }
    }
}

impl Default for OutlierDetectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValidationEngine for OutlierDetectionEngine {
    fn rule_type(&self) -> ValidationRuleType {
        ValidationRuleType::OutlierDetection
    }

    async fn check(
        &self,
        rule: &ValidationRule,
        signal: &RewardSignal,
        history: &[RewardSignal],
    ) -> Result<ValidationResult> {
        if history.len() < self.min_history {
            return Ok(
                ValidationResult::new(signal, rule, ValidationStatus::Warning)
                    .with_confidence(0.3)
                    .with_detail(format!(
                        "Insufficient history for outlier detection: {} of {} required",
                        history.len(),
                        self.min_history
                    )),
            );
        }

        let value = signal.weighted_total_reward;
        let values: Vec<f64> = history.iter().map(|s| s.weighted_total_reward).collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        if std < 1e-9 {
            let status = if (value - mean).abs() < 1e-9 {
                ValidationStatus::Passed
            } else {
                ValidationStatus::Failed
            };
            return Ok(ValidationResult::new(signal, rule, status)
                .with_confidence(0.9)
                .with_expected(mean)
                .with_detail("History has zero dispersion"));
        }

        let z = (value - mean).abs() / std;
        let z_flag = z > rule.z_score_threshold;

        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let q1 = percentile(&sorted, 0.25);
        let q3 = percentile(&sorted, 0.75);
        let iqr = q3 - q1;
        let iqr_flag =
            value < q1 - rule.iqr_multiplier * iqr || value > q3 + rule.iqr_multiplier * iqr;

        let (status, confidence) = match (z_flag, iqr_flag) {
            (true, true) => (ValidationStatus::Failed, z_confidence(z)),
            (true, false) | (false, true) => (ValidationStatus::Warning, 0.6),
            (false, false) => (ValidationStatus::Passed, 0.9),
        };

        Ok(ValidationResult::new(signal, rule, status)
            .with_confidence(confidence)
            .with_deviation(z)
            .with_expected(mean)
            .with_detail(format!(
                "z-score {:.2} (threshold {:.1}), IQR bounds [{:.3}, {:.3}]",
                z,
                rule.z_score_threshold,
                q1 - rule.iqr_multiplier * iqr,
                q3 + rule.iqr_multiplier * iqr
            )))
    }
}

/// Checks per-component agreement with each component's own history.
pub struct ConsistencyCheckEngine {
    /// Minimum historical observations per reward type.
    pub min_history_per_type: usize,
}

impl ConsistencyCheckEngine {
    pub fn new() -> Self {
        Self {
            min_history_per_type: 3,
        }
    }
}

impl Default for ConsistencyCheckEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValidationEngine for ConsistencyCheckEngine {
    fn rule_type(&self) -> ValidationRuleType {
        ValidationRuleType::ConsistencyCheck
    }

    async fn check(
        &self,
        rule: &ValidationRule,
        signal: &RewardSignal,
        history: &[RewardSignal],
    ) -> Result<ValidationResult> {
        let mut scores = Vec::new();

        for (reward_type, metrics) in &signal.components {
            let past: Vec<f64> = history
                .iter()
                .filter_map(|s| s.components.get(reward_type))
                .map(|m| m.final_reward)
                .collect();
            if past.len() < self.min_history_per_type {
                continue;
            }
            let n = past.len() as f64;
            let mean = past.iter().sum::<f64>() / n;
            let std = (past.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            let score = if std < 1e-9 {
                if (metrics.final_reward - mean).abs() < 0.05 {
                    1.0
                } else {
                    0.0
                }
            } else {
                (1.0 - (metrics.final_reward - mean).abs() / std).max(0.0)
            };
            scores.push(score);
        }

        if scores.is_empty() {
            return Ok(
                ValidationResult::new(signal, rule, ValidationStatus::Warning)
                    .with_confidence(0.4)
                    .with_detail("No historical overlap for any reward component"),
            );
        }

        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        let status = if avg >= rule.consistency_threshold {
            ValidationStatus::Passed
        } else if avg >= rule.consistency_threshold / 2.0 {
            ValidationStatus::Warning
        } else {
            ValidationStatus::Failed
        };

        Ok(ValidationResult::new(signal, rule, status)
            .with_confidence(0.85)
            .with_deviation(1.0 - avg)
            .with_detail(format!(
                "Mean consistency {:.3} across {} component(s), threshold {:.2}",
                avg,
                scores.len(),
                rule.consistency_threshold
            )))
    }
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = q * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Two-sided confidence derived from the z-score.
fn z_confidence(z: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * normal.cdf(z) - 1.0).clamp(0.5, 0.99),
        Err(_) => 0.8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::MembershipTier;
    use reward::{RewardMetrics, RewardType};
    use uuid::Uuid;

    fn signal_with_total(total: f64) -> RewardSignal {
        // A single full-weight component makes the weighted total equal the
        // component reward for a Free-tier user.
        let mut s = RewardSignal::new(Uuid::new_v4(), "user-1", MembershipTier::Free);
        s.add_reward_component(RewardMetrics::new(RewardType::Accuracy, total), 1.0);
        s
    }

    fn history(values: &[f64]) -> Vec<RewardSignal> {
        values.iter().map(|v| signal_with_total(*v)).collect()
    }

    #[tokio::test]
    async fn in_range_value_passes() {
        let engine = RangeCheckEngine;
        let rule = ValidationRule::new("range", ValidationRuleType::RangeCheck);
        let result = engine
            .check(&rule, &signal_with_total(0.4), &[])
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
    }

    #[tokio::test]
    async fn overshoot_beyond_tolerance_fails_with_deviation() {
        let engine = RangeCheckEngine;
        let rule = ValidationRule::new("range", ValidationRuleType::RangeCheck);
        // weighted_total_reward = 1.2 against [-1, 1] with tolerance 0.05.
        let mut signal = signal_with_total(1.0);
        signal.weighted_total_reward = 1.2;
        let result = engine.check(&rule, &signal, &[]).await.unwrap();
        assert_eq!(result.status, ValidationStatus::Failed);
        assert!((result.deviation - 0.2).abs() < 1e-9);
        assert_eq!(result.expected_value, Some(1.0));
    }

    #[tokio::test]
    async fn overshoot_within_tolerance_is_a_warning() {
        let engine = RangeCheckEngine;
        let rule = ValidationRule::new("range", ValidationRuleType::RangeCheck);
        let mut signal = signal_with_total(1.0);
        signal.weighted_total_reward = 1.03;
        let result = engine.check(&rule, &signal, &[]).await.unwrap();
        assert_eq!(result.status, ValidationStatus::Warning);
    }

    fn outlier_history() -> Vec<RewardSignal> {
        // Ten points with mean ~0.1 and stddev ~0.05.
        history(&[0.05, 0.07, 0.08, 0.09, 0.1, 0.1, 0.11, 0.12, 0.13, 0.15])
    }

    #[tokio::test]
    async fn extreme_value_fails_both_detectors() {
        let engine = OutlierDetectionEngine::new();
        let rule = ValidationRule::new("outlier", ValidationRuleType::OutlierDetection);
        let result = engine
            .check(&rule, &signal_with_total(0.6), &outlier_history())
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Failed);
        assert!(result.confidence >= 0.8);
        assert!(result.deviation > rule.z_score_threshold);
    }

    #[tokio::test]
    async fn value_near_the_mean_passes() {
        let engine = OutlierDetectionEngine::new();
        let rule = ValidationRule::new("outlier", ValidationRuleType::OutlierDetection);
        let result = engine
            .check(&rule, &signal_with_total(0.12), &outlier_history())
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
    }

    #[tokio::test]
    async fn short_history_warns_instead_of_skipping() {
        let engine = OutlierDetectionEngine::new();
        let rule = ValidationRule::new("outlier", ValidationRuleType::OutlierDetection);
        let result = engine
            .check(&rule, &signal_with_total(0.6), &history(&[0.1, 0.1, 0.1]))
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Warning);
        assert!(result.confidence <= 0.3);
    }

    #[tokio::test]
    async fn consistency_passes_for_stable_components() {
        let engine = ConsistencyCheckEngine::new();
        let rule = ValidationRule::new("consistency", ValidationRuleType::ConsistencyCheck);
        let result = engine
            .check(
                &rule,
                &signal_with_total(0.5),
                &history(&[0.5, 0.55, 0.45, 0.5]),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Passed);
    }

    #[tokio::test]
    async fn consistency_flags_large_departures() {
        let engine = ConsistencyCheckEngine::new();
        let rule = ValidationRule::new("consistency", ValidationRuleType::ConsistencyCheck);
        let result = engine
            .check(
                &rule,
                &signal_with_total(0.9),
                &history(&[0.1, 0.12, 0.08, 0.11]),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Failed);
    }

    #[tokio::test]
    async fn consistency_without_overlap_warns() {
        let engine = ConsistencyCheckEngine::new();
        let rule = ValidationRule::new("consistency", ValidationRuleType::ConsistencyCheck);
        let result = engine
            .check(&rule, &signal_with_total(0.5), &[])
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Warning);
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 5.0);
        assert_eq!(percentile(&sorted, 0.5), 3.0);
        assert!((percentile(&sorted, 0.25) - 2.0).abs() < 1e-9);
    }
}
