//! Declarative validation rules and their verdicts.

use chrono::{DateTime, Utc};
use common::{MembershipTier, SCHEMA_VERSION};
use reward::{RewardSignal, RewardType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of check a rule performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationRuleType {
    RangeCheck,
    OutlierDetection,
    ConsistencyCheck,
}

impl ValidationRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationRuleType::RangeCheck => "range_check",
            ValidationRuleType::OutlierDetection => "outlier_detection",
            ValidationRuleType::ConsistencyCheck => "consistency_check",
        }
    }
}

impl std::fmt::Display for ValidationRuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationSeverity {
    Info,
    Warning,
    Critical,
}

/// Verdict status for one rule applied to one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
    Warning,
    NeedsReview,
}

/// A declarative check over reward signals.
///
/// Thresholds that a given engine does not use are simply ignored by it;
/// empty applicability lists mean "applies to all".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub rule_id: String,
    pub rule_type: ValidationRuleType,
    pub min_value: f64,
    pub max_value: f64,
    /// Overshoot beyond a bound tolerated before a range breach hard-fails.
    pub tolerance: f64,
    pub z_score_threshold: f64,
    pub iqr_multiplier: f64,
    pub consistency_threshold: f64,
    pub severity: ValidationSeverity,
    pub applies_to_reward_types: Vec<RewardType>,
    pub applies_to_tiers: Vec<MembershipTier>,
    /// Whether the validator may correct the signal when this rule fails.
    pub auto_correct: bool,
    /// Relative weight used by rule-weight optimization.
    pub weight: f64,
}

impl ValidationRule {
    pub fn new(rule_id: impl Into<String>, rule_type: ValidationRuleType) -> Self {
        Self {
            rule_id: rule_id.into(),
            rule_type,
            min_value: -1.0,
            max_value: 1.0,
            tolerance: 0.05,
            z_score_threshold: 3.0,
            iqr_multiplier: 1.5,
            consistency_threshold: 0.5,
            severity: ValidationSeverity::Warning,
            applies_to_reward_types: Vec::new(),
            applies_to_tiers: Vec::new(),
            auto_correct: false,
            weight: 1.0,
        }
    }

    /// Standard rule set: one rule of each type over the full band.
    pub fn default_rules() -> Vec<ValidationRule> {
        vec![
            ValidationRule {
                severity: ValidationSeverity::Critical,
                auto_correct: true,
                ..ValidationRule::new("reward_range", ValidationRuleType::RangeCheck)
            },
            ValidationRule::new("reward_outlier", ValidationRuleType::OutlierDetection),
            ValidationRule::new("reward_consistency", ValidationRuleType::ConsistencyCheck),
        ]
    }

    /// Applicability filter over reward types present and membership tier.
    pub fn applies_to(&self, signal: &RewardSignal) -> bool {
        let tier_ok = self.applies_to_tiers.is_empty()
            || self.applies_to_tiers.contains(&signal.membership_tier);
        let type_ok = self.applies_to_reward_types.is_empty()
            || self
                .applies_to_reward_types
                .iter()
                .any(|t| signal.components.contains_key(t));
        tier_ok && type_ok
    }
}

/// One rule's verdict on one signal. Results are append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub result_id: Uuid,
    pub signal_id: Uuid,
    pub rule_id: String,
    pub rule_type: ValidationRuleType,
    pub status: ValidationStatus,
    /// Confidence in the verdict, in [0, 1].
    pub confidence: f64,
    pub original_value: f64,
    pub expected_value: Option<f64>,
    pub corrected_value: Option<f64>,
    /// Rule-specific magnitude of the violation (overshoot, z-score, ...).
    pub deviation: f64,
    pub detail: String,
    pub validated_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl ValidationResult {
    pub fn new(signal: &RewardSignal, rule: &ValidationRule, status: ValidationStatus) -> Self {
        Self {
            result_id: Uuid::new_v4(),
            signal_id: signal.signal_id,
            rule_id: rule.rule_id.clone(),
            rule_type: rule.rule_type,
            status,
            confidence: 0.5,
            original_value: signal.weighted_total_reward,
            expected_value: None,
            corrected_value: None,
            deviation: 0.0,
            detail: String::new(),
            validated_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Verdict for a rule whose engine itself failed: the rule counts as
    /// FAILED but the batch continues.
    pub fn engine_failure(signal: &RewardSignal, rule: &ValidationRule, error: &str) -> Self {
        let mut result = Self::new(signal, rule, ValidationStatus::Failed);
        result.confidence = 0.0;
        result.detail = format!("Validation engine error: {}", error);
        result
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_deviation(mut self, deviation: f64) -> Self {
        self.deviation = deviation;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_expected(mut self, expected: f64) -> Self {
        self.expected_value = Some(expected);
        self
    }
}
