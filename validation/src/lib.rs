//! Reward-signal validation and tuning.
//!
//! Given a reward signal and a window of historical signals, the validator
//! fans out a set of declarative rules (range, outlier, consistency) to
//! their matching engines, optionally auto-corrects, and keeps per-cohort
//! A/B aggregates so the scoring configuration can be compared and evolved
//! over time.

pub mod ab_testing;
pub mod engines;
pub mod rules;
pub mod validator;

pub use ab_testing::{AbTestAnalysis, AbTestConfig, Cohort, CohortStats, ModelOptimization};
pub use engines::{
    ConsistencyCheckEngine, OutlierDetectionEngine, RangeCheckEngine, ValidationEngine,
};
pub use rules::{
    ValidationResult, ValidationRule, ValidationRuleType, ValidationSeverity, ValidationStatus,
};
pub use validator::{RewardValidator, ValidationSummary, ValidatorConfig};
