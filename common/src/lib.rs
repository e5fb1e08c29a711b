//! Shared contracts for the decision-trajectory and reward pipeline.
//!
//! This crate defines the data types exchanged between the collector, reward
//! engine, validator and orchestrator:
//! - The opaque `Analyst` capability and its `AnalysisState`/`AnalysisResult`
//!   contract
//! - User context and membership tiers
//! - The market-performance provider interface
//! - The domain error taxonomy for trajectory operations

pub mod error;
pub mod market;
pub mod types;

pub use error::TrajectoryError;
pub use market::{MarketDataProvider, MarketPerformanceData};
pub use types::{
    AnalysisResult, AnalysisState, Analyst, AnalystInfo, MembershipTier, Recommendation,
    UserContext,
};

/// Version stamped into every persisted JSON document. Bumped whenever a
/// record shape changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;
