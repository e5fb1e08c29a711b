//! A/B comparison of scoring configurations.
//!
//! Every validated signal is deterministically assigned to a control or
//! treatment cohort; running aggregates per cohort support effect-size
//! analysis and a winning-configuration recommendation.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Configuration for cohort assignment and analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestConfig {
    pub enabled: bool,
    /// Fraction of signals assigned to the treatment cohort.
    pub split_ratio: f64,
    /// Minimum samples per cohort before results are considered.
    pub min_samples_per_cohort: usize,
    /// Minimum absolute effect size (Cohen's d) to call a winner.
    pub effect_size_threshold: f64,
}

impl Default for AbTestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            split_ratio: 0.5,
            min_samples_per_cohort: 30,
            effect_size_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cohort {
    Control,
    Treatment,
}

impl std::fmt::Display for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cohort::Control => f.write_str("control"),
            Cohort::Treatment => f.write_str("treatment"),
        }
    }
}

/// Deterministic pseudo-random assignment keyed by signal id, so repeated
/// lookups of the same signal land in the same cohort.
pub fn assign_cohort(signal_id: Uuid, split_ratio: f64) -> Cohort {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    signal_id.hash(&mut hasher);
    let bucket = (hasher.finish() % 10_000) as f64 / 10_000.0;
    if bucket < split_ratio {
        Cohort::Treatment
    } else {
        Cohort::Control
    }
}

/// Running aggregates for one cohort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohortStats {
    pub samples: usize,
    pub reward_sum: f64,
    pub reward_sq_sum: f64,
    pub validation_passes: usize,
}

impl CohortStats {
    pub fn record(&mut self, reward: f64, passed: bool) {
        self.samples += 1;
        self.reward_sum += reward;
        self.reward_sq_sum += reward * reward;
        if passed {
            self.validation_passes += 1;
        }
    }

    pub fn mean_reward(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.reward_sum / self.samples as f64
        }
    }

    pub fn variance(&self) -> f64 {
        if self.samples < 2 {
            return 0.0;
        }
        let n = self.samples as f64;
        let mean = self.mean_reward();
        ((self.reward_sq_sum / n) - mean * mean).max(0.0)
    }

    pub fn pass_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.validation_passes as f64 / self.samples as f64
        }
    }
}

/// Cohort aggregates held by the validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AbTestState {
    pub control: CohortStats,
    pub treatment: CohortStats,
}

impl AbTestState {
    pub fn stats_mut(&mut self, cohort: Cohort) -> &mut CohortStats {
        match cohort {
            Cohort::Control => &mut self.control,
            Cohort::Treatment => &mut self.treatment,
        }
    }

    /// Effect size and verdict for the current aggregates.
    pub fn analyze(&self, config: &AbTestConfig) -> AbTestAnalysis {
        let control_mean = self.control.mean_reward();
        let treatment_mean = self.treatment.mean_reward();

        let pooled_var = (self.control.variance() + self.treatment.variance()) / 2.0;
        let effect_size = if pooled_var > 1e-12 {
            (treatment_mean - control_mean) / pooled_var.sqrt()
        } else {
            0.0
        };

        let sufficient_samples = self.control.samples >= config.min_samples_per_cohort
            && self.treatment.samples >= config.min_samples_per_cohort;
        let is_meaningful =
            sufficient_samples && effect_size.abs() >= config.effect_size_threshold;

        let winner = if is_meaningful {
            Some(if treatment_mean > control_mean {
                Cohort::Treatment
            } else {
                Cohort::Control
            })
        } else {
            None
        };

        let recommendation = match winner {
            Some(w) => format!(
                "Cohort {} outperforms ({:.3} vs {:.3}, effect size {:.2}). Consider promoting its configuration.",
                w, treatment_mean.max(control_mean), treatment_mean.min(control_mean), effect_size
            ),
            None if !sufficient_samples => format!(
                "Insufficient samples ({} control / {} treatment, {} required per cohort). Continue the test.",
                self.control.samples, self.treatment.samples, config.min_samples_per_cohort
            ),
            None => "No meaningful difference between cohorts. Either configuration can be kept.".to_string(),
        };

        AbTestAnalysis {
            control_samples: self.control.samples,
            treatment_samples: self.treatment.samples,
            control_mean,
            treatment_mean,
            control_pass_rate: self.control.pass_rate(),
            treatment_pass_rate: self.treatment.pass_rate(),
            effect_size,
            sufficient_samples,
            is_meaningful,
            winner,
            recommendation,
        }
    }
}

/// Outcome of comparing the two cohorts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestAnalysis {
    pub control_samples: usize,
    pub treatment_samples: usize,
    pub control_mean: f64,
    pub treatment_mean: f64,
    pub control_pass_rate: f64,
    pub treatment_pass_rate: f64,
    pub effect_size: f64,
    pub sufficient_samples: bool,
    pub is_meaningful: bool,
    pub winner: Option<Cohort>,
    pub recommendation: String,
}

/// Recommendation produced by `optimize_reward_model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOptimization {
    pub winner: Option<Cohort>,
    pub analysis: AbTestAnalysis,
    pub recommended_action: String,
}
