//! RULER reward engine: multi-component scoring of completed trajectories.
//!
//! Given a completed trajectory and observed market outcomes, the engine
//! computes a set of named reward components (accuracy, return performance,
//! risk-adjusted return, reasoning quality) through independent calculator
//! strategies and aggregates them into one weighted signal, scaled by the
//! user's membership tier. Component weights adapt over time through a
//! bounded heuristic reinforcement loop.

pub mod calculators;
pub mod engine;
pub mod market;
pub mod types;

pub use calculators::{
    AccuracyCalculator, ReasoningQualityCalculator, ReturnPerformanceCalculator, RewardCalculator,
    RiskAdjustedReturnCalculator,
};
pub use engine::{RewardEngine, RewardEngineConfig};
pub use market::{CachingMarketData, SyntheticMarketData};
pub use types::{RewardMetrics, RewardSignal, RewardType};
