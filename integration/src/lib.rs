//! Integration layer: one request/response cycle per analysis.
//!
//! The orchestrator ties the collector, reward engine and validator into a
//! single `process_analysis` call under a global admission bound, tracks
//! per-user personalization state, and runs periodic maintenance (health
//! checks, metrics aggregation, profile persistence) as explicit long-lived
//! tasks with a documented start/stop lifecycle.

pub mod maintenance;
pub mod orchestrator;
pub mod personalization;

pub use maintenance::{MaintenanceConfig, MaintenanceHandle};
pub use orchestrator::{
    ActiveAnalysis, AnalysisMode, AnalysisOrchestrator, ComponentHealth, HealthState,
    IntegrationMetadata, OrchestratorConfig, SystemStatus,
};
pub use personalization::{
    PerformanceTrend, PersonalizationLevel, ProfileStore, RecommendationCache, UserProfile,
};
