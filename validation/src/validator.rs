//! The reward validator: rule dispatch, correction and tuning.

use crate::ab_testing::{
    assign_cohort, AbTestAnalysis, AbTestConfig, AbTestState, Cohort, ModelOptimization,
};
use crate::engines::{
    ConsistencyCheckEngine, OutlierDetectionEngine, RangeCheckEngine, ValidationEngine,
};
use crate::rules::{ValidationResult, ValidationRule, ValidationRuleType, ValidationStatus};
use anyhow::{bail, Result};
use dashmap::DashMap;
use futures::future::join_all;
use reward::{RewardSignal, RewardType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for the reward validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// How many validated signals to retain as rolling history.
    pub history_window: usize,
    pub ab_test: AbTestConfig,
    /// Nudge applied to a rule's weight during optimization.
    pub rule_weight_step: f64,
    pub rule_weight_min: f64,
    pub rule_weight_max: f64,
    /// Effectiveness ratio above which a rule's weight is nudged up.
    pub effectiveness_high_threshold: f64,
    /// Effectiveness ratio below which a rule's weight is nudged down.
    pub effectiveness_low_threshold: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            history_window: 100,
            ab_test: AbTestConfig::default(),
            rule_weight_step: 0.05,
            rule_weight_min: 0.05,
            rule_weight_max: 3.0,
            effectiveness_high_threshold: 0.7,
            effectiveness_low_threshold: 0.4,
        }
    }
}

/// Counts of recorded verdicts by status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_results: usize,
    pub by_status: HashMap<ValidationStatus, usize>,
    pub pass_rate: f64,
}

/// Runs pluggable validation checks over reward signals.
///
/// Rules are filtered by applicability, fanned out concurrently to their
/// engines, and a single rule's failure never aborts the batch.
pub struct RewardValidator {
    config: ValidatorConfig,
    engines: HashMap<ValidationRuleType, Box<dyn ValidationEngine>>,
    rules: RwLock<Vec<ValidationRule>>,
    history: RwLock<VecDeque<RewardSignal>>,
    results: DashMap<Uuid, Vec<ValidationResult>>,
    ab_state: RwLock<AbTestState>,
}

impl RewardValidator {
    /// Builds a validator with the standard engines and rule set.
    ///
    /// Fails on nonsensical configuration; the orchestrator treats that as
    /// "validation disabled" rather than a startup abort.
    pub fn try_new(config: ValidatorConfig) -> Result<Self> {
        if config.history_window == 0 {
            bail!("Validator history window must be positive");
        }
        if !(0.0..=1.0).contains(&config.ab_test.split_ratio) {
            bail!(
                "A/B split ratio must lie in [0, 1], got {}",
                config.ab_test.split_ratio
            );
        }

        let mut validator = Self {
            config,
            engines: HashMap::new(),
            rules: RwLock::new(ValidationRule::default_rules()),
            history: RwLock::new(VecDeque::new()),
            results: DashMap::new(),
            ab_state: RwLock::new(AbTestState::default()),
        };
        validator.register_engine(Box::new(RangeCheckEngine));
        validator.register_engine(Box::new(OutlierDetectionEngine::new()));
        validator.register_engine(Box::new(ConsistencyCheckEngine::new()));
        Ok(validator)
    }

    /// Engines are registered by rule type; re-registering replaces.
    pub fn register_engine(&mut self, engine: Box<dyn ValidationEngine>) {
        self.engines.insert(engine.rule_type(), engine);
    }

    pub async fn add_rule(&self, rule: ValidationRule) {
        self.rules.write().await.push(rule);
    }

    /// Validates one signal against the applicable rules.
    ///
    /// `historical` overrides the internal rolling window; `custom_rules`
    /// overrides the registered rule set. Auto-correction (where a rule
    /// opts in) clamps the signal in place.
    pub async fn validate_reward_signal(
        &self,
        signal: &mut RewardSignal,
        historical: Option<&[RewardSignal]>,
        custom_rules: Option<Vec<ValidationRule>>,
    ) -> Result<Vec<ValidationResult>> {
        let history: Vec<RewardSignal> = match historical {
            Some(h) => h.to_vec(),
            None => self.history.read().await.iter().cloned().collect(),
        };
        let rules = match custom_rules {
            Some(r) => r,
            None => self.rules.read().await.clone(),
        };
        let applicable: Vec<ValidationRule> =
            rules.into_iter().filter(|r| r.applies_to(signal)).collect();

        // All applicable rules run concurrently; an erroring engine becomes
        // a FAILED result instead of aborting the batch.
        let snapshot: &RewardSignal = signal;
        let checks = applicable.iter().map(|rule| {
            let engine = self.engines.get(&rule.rule_type);
            let history = &history;
            async move {
                match engine {
                    None => ValidationResult::engine_failure(
                        snapshot,
                        rule,
                        "no engine registered for rule type",
                    ),
                    Some(engine) => match engine.check(rule, snapshot, history).await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(
                                rule_id = %rule.rule_id,
                                error = %e,
                                "Validation engine failed"
                            );
                            ValidationResult::engine_failure(snapshot, rule, &e.to_string())
                        }
                    },
                }
            }
        });
        let mut results = join_all(checks).await;

        for (rule, result) in applicable.iter().zip(results.iter_mut()) {
            if result.status == ValidationStatus::Failed
                && rule.auto_correct
                && rule.rule_type == ValidationRuleType::RangeCheck
            {
                let original = signal.weighted_total_reward;
                let corrected = original.clamp(rule.min_value, rule.max_value);
                // Scale every component's final reward so the recomputed
                // totals land on the clamped value; the weighted total stays
                // the tier-multiplied aggregate, never a directly set field.
                if original.abs() > f64::EPSILON {
                    let scale = corrected / original;
                    let targets: Vec<(RewardType, f64)> = signal
                        .components
                        .iter()
                        .map(|(t, m)| (*t, m.final_reward * scale))
                        .collect();
                    for (reward_type, value) in targets {
                        signal.correct_component(reward_type, value);
                    }
                }
                info!(
                    signal_id = %signal.signal_id,
                    original,
                    corrected = signal.weighted_total_reward,
                    "Auto-corrected out-of-range reward"
                );
                result.corrected_value = Some(signal.weighted_total_reward);
            }
        }

        let all_passed = results
            .iter()
            .all(|r| r.status != ValidationStatus::Failed);
        if all_passed {
            for metrics in signal.components.values_mut() {
                metrics.is_validated = true;
            }
        }

        self.results
            .entry(signal.signal_id)
            .or_default()
            .extend(results.iter().cloned());

        {
            let mut window = self.history.write().await;
            window.push_back(signal.clone());
            while window.len() > self.config.history_window {
                window.pop_front();
            }
        }

        if self.config.ab_test.enabled {
            let cohort = assign_cohort(signal.signal_id, self.config.ab_test.split_ratio);
            let mut state = self.ab_state.write().await;
            state
                .stats_mut(cohort)
                .record(signal.weighted_total_reward, all_passed);
            debug!(signal_id = %signal.signal_id, %cohort, "Recorded A/B sample");
        }

        Ok(results)
    }

    /// Append-only result history for one signal.
    pub fn results_for(&self, signal_id: Uuid) -> Vec<ValidationResult> {
        self.results
            .get(&signal_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn validated_signal_count(&self) -> usize {
        self.results.len()
    }

    pub async fn validation_summary(&self) -> ValidationSummary {
        let mut by_status: HashMap<ValidationStatus, usize> = HashMap::new();
        let mut total = 0usize;
        for entry in self.results.iter() {
            for result in entry.value() {
                *by_status.entry(result.status).or_insert(0) += 1;
                total += 1;
            }
        }
        let passed = by_status
            .get(&ValidationStatus::Passed)
            .copied()
            .unwrap_or(0);
        ValidationSummary {
            total_results: total,
            by_status,
            pass_rate: if total > 0 {
                passed as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Compares the control and treatment cohorts.
    pub async fn analyze_ab_test_results(&self) -> AbTestAnalysis {
        self.ab_state.read().await.analyze(&self.config.ab_test)
    }

    /// Recommends a winning configuration based on the A/B aggregates.
    pub async fn optimize_reward_model(&self) -> ModelOptimization {
        let analysis = self.analyze_ab_test_results().await;
        let recommended_action = match analysis.winner {
            Some(Cohort::Treatment) => {
                "Adopt the treatment configuration as the new default".to_string()
            }
            Some(Cohort::Control) => {
                "Keep the control configuration; roll back the treatment".to_string()
            }
            None => "Keep collecting samples before changing configuration".to_string(),
        };
        ModelOptimization {
            winner: analysis.winner,
            analysis,
            recommended_action,
        }
    }

    /// Nudges each rule's weight from its observed effectiveness ratio
    /// (passed verdicts over total applications). Returns the new weights.
    pub async fn optimize_rule_weights(&self) -> HashMap<String, f64> {
        let mut per_rule: HashMap<String, (usize, usize)> = HashMap::new();
        for entry in self.results.iter() {
            for result in entry.value() {
                let counts = per_rule.entry(result.rule_id.clone()).or_insert((0, 0));
                counts.1 += 1;
                if result.status == ValidationStatus::Passed {
                    counts.0 += 1;
                }
            }
        }

        let mut rules = self.rules.write().await;
        let mut updated = HashMap::new();
        for rule in rules.iter_mut() {
            if let Some((passed, total)) = per_rule.get(&rule.rule_id) {
                if *total == 0 {
                    continue;
                }
                let effectiveness = *passed as f64 / *total as f64;
                if effectiveness > self.config.effectiveness_high_threshold {
                    rule.weight =
                        (rule.weight + self.config.rule_weight_step).min(self.config.rule_weight_max);
                } else if effectiveness < self.config.effectiveness_low_threshold {
                    rule.weight =
                        (rule.weight - self.config.rule_weight_step).max(self.config.rule_weight_min);
                }
                info!(
                    rule_id = %rule.rule_id,
                    effectiveness,
                    weight = rule.weight,
                    "Optimized rule weight"
                );
            }
            updated.insert(rule.rule_id.clone(), rule.weight);
        }
        updated
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::MembershipTier;
    use reward::{RewardMetrics, RewardType};

    fn validator() -> RewardValidator {
        RewardValidator::try_new(ValidatorConfig::default()).unwrap()
    }

    fn signal_with_total(total: f64) -> RewardSignal {
        let mut s = RewardSignal::new(Uuid::new_v4(), "user-1", MembershipTier::Free);
        s.add_reward_component(RewardMetrics::new(RewardType::Accuracy, total), 1.0);
        s
    }

    fn history(values: &[f64]) -> Vec<RewardSignal> {
        values.iter().map(|v| signal_with_total(*v)).collect()
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let bad = ValidatorConfig {
            ab_test: AbTestConfig {
                split_ratio: 1.5,
                ..AbTestConfig::default()
            },
            ..ValidatorConfig::default()
        };
        assert!(RewardValidator::try_new(bad).is_err());

        let bad = ValidatorConfig {
            history_window: 0,
            ..ValidatorConfig::default()
        };
        assert!(RewardValidator::try_new(bad).is_err());
    }

    #[tokio::test]
    async fn all_default_rules_produce_results() {
        let v = validator();
        let mut signal = signal_with_total(0.4);
        let results = v
            .validate_reward_signal(&mut signal, Some(&history(&[0.3; 12])), None)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(v.results_for(signal.signal_id).len(), 3);
    }

    #[tokio::test]
    async fn clean_signal_marks_components_validated() {
        let v = validator();
        let mut signal = signal_with_total(0.31);
        let hist = history(&[0.3, 0.31, 0.29, 0.3, 0.32, 0.3, 0.28, 0.31, 0.3, 0.29, 0.3, 0.31]);
        v.validate_reward_signal(&mut signal, Some(&hist), None)
            .await
            .unwrap();
        assert!(signal
            .components
            .values()
            .all(|m| m.is_validated));
    }

    #[tokio::test]
    async fn out_of_range_signal_is_auto_corrected() {
        let v = validator();
        // Enterprise multiplier pushes a 0.8 component to a 1.2 weighted
        // total, outside the [-1, 1] band.
        let mut signal = RewardSignal::new(Uuid::new_v4(), "user-1", MembershipTier::Enterprise);
        signal.add_reward_component(RewardMetrics::new(RewardType::Accuracy, 0.8), 1.0);
        assert!(signal.weighted_total_reward > 1.0);

        let results = v
            .validate_reward_signal(&mut signal, Some(&[]), None)
            .await
            .unwrap();
        let range = results
            .iter()
            .find(|r| r.rule_type == ValidationRuleType::RangeCheck)
            .unwrap();
        assert_eq!(range.status, ValidationStatus::Failed);
        assert!((range.corrected_value.unwrap() - 1.0).abs() < 1e-9);
        assert!((signal.weighted_total_reward - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn auto_correction_keeps_totals_consistent_with_components() {
        let v = validator();
        let mut signal = RewardSignal::new(Uuid::new_v4(), "user-1", MembershipTier::Enterprise);
        signal.add_reward_component(RewardMetrics::new(RewardType::Accuracy, 0.8), 1.0);

        v.validate_reward_signal(&mut signal, Some(&[]), None)
            .await
            .unwrap();

        // The correction flows through the components, so the weighted total
        // remains the tier-multiplied aggregate of what they now hold.
        let multiplier = signal.membership_tier.multiplier();
        assert!(
            (signal.weighted_total_reward - signal.total_reward * multiplier).abs() < 1e-9,
            "weighted_total_reward={} but total*multiplier={}",
            signal.weighted_total_reward,
            signal.total_reward * multiplier
        );
        let accuracy = signal.component(RewardType::Accuracy).unwrap();
        assert!((accuracy.final_reward - 1.0 / 1.5).abs() < 1e-9);
        assert!((signal.total_reward - 1.0 / 1.5).abs() < 1e-9);
    }

    struct PanickyEngine;

    #[async_trait]
    impl ValidationEngine for PanickyEngine {
        fn rule_type(&self) -> ValidationRuleType {
            ValidationRuleType::RangeCheck
        }

        async fn check(
            &self,
            _rule: &ValidationRule,
            _signal: &RewardSignal,
            _history: &[RewardSignal],
        ) -> Result<ValidationResult> {
            bail!("synthetic engine failure")
        }
    }

    #[tokio::test]
    async fn engine_failure_becomes_failed_result_without_aborting() {
        let mut v = validator();
        v.register_engine(Box::new(PanickyEngine));
        let mut signal = signal_with_total(0.4);
        let results = v
            .validate_reward_signal(&mut signal, Some(&[]), None)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        let range = results
            .iter()
            .find(|r| r.rule_type == ValidationRuleType::RangeCheck)
            .unwrap();
        assert_eq!(range.status, ValidationStatus::Failed);
        assert!(range.detail.contains("engine error"));
    }

    #[tokio::test]
    async fn history_window_is_bounded() {
        let config = ValidatorConfig {
            history_window: 5,
            ..ValidatorConfig::default()
        };
        let v = RewardValidator::try_new(config).unwrap();
        for i in 0..10 {
            let mut s = signal_with_total(0.1 + i as f64 * 0.01);
            v.validate_reward_signal(&mut s, None, None).await.unwrap();
        }
        assert_eq!(v.history.read().await.len(), 5);
    }

    #[tokio::test]
    async fn ab_samples_are_recorded_when_enabled() {
        let config = ValidatorConfig {
            ab_test: AbTestConfig {
                enabled: true,
                ..AbTestConfig::default()
            },
            ..ValidatorConfig::default()
        };
        let v = RewardValidator::try_new(config).unwrap();
        for _ in 0..20 {
            let mut s = signal_with_total(0.3);
            v.validate_reward_signal(&mut s, None, None).await.unwrap();
        }
        let analysis = v.analyze_ab_test_results().await;
        assert_eq!(analysis.control_samples + analysis.treatment_samples, 20);
    }

    #[tokio::test]
    async fn rule_weights_adapt_to_effectiveness() {
        let v = validator();
        // Every signal passes every rule, so all effectiveness ratios are
        // high and every weight is nudged up once per optimization pass.
        for _ in 0..5 {
            let mut s = signal_with_total(0.3);
            let hist = history(&[0.3, 0.31, 0.29, 0.3, 0.32, 0.3, 0.28, 0.31, 0.3, 0.29, 0.3, 0.31]);
            v.validate_reward_signal(&mut s, Some(&hist), None)
                .await
                .unwrap();
        }
        let weights = v.optimize_rule_weights().await;
        assert!((weights["reward_range"] - 1.05).abs() < 1e-9);
        assert!((weights["reward_outlier"] - 1.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn summary_counts_statuses() {
        let v = validator();
        let mut s = signal_with_total(0.4);
        v.validate_reward_signal(&mut s, Some(&[]), None)
            .await
            .unwrap();
        let summary = v.validation_summary().await;
        assert_eq!(summary.total_results, 3);
        // Range passes; outlier and consistency warn without history.
        assert_eq!(
            summary.by_status.get(&ValidationStatus::Warning).copied(),
            Some(2)
        );
    }
}
