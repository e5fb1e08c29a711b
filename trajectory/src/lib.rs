//! Trajectory collection for analysis runs.
//!
//! This crate records the step-by-step reasoning an analyst produces while
//! evaluating a subject and finalizes it into an immutable trajectory record:
//! - `TrajectoryCollector` owns the active/completed sets and the lifecycle
//! - `TrajectoryStore` abstracts persistence (file-backed or in-memory)
//! - `TrainingRecord` is the GRPO-style export consumed by downstream
//!   training pipelines

pub mod collector;
pub mod export;
pub mod storage;
pub mod types;

pub use collector::{CollectorConfig, CollectorStats, StepRecord, TrajectoryCollector, TrajectoryFilter};
pub use export::{TrainingRecord, TrainingStep};
pub use storage::{FileTrajectoryStore, InMemoryTrajectoryStore, TrajectoryStore};
pub use types::{
    AnalysisTrajectory, DecisionStep, StepTelemetry, StepType, TrajectoryMetrics, TrajectoryStatus,
};
