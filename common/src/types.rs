//! Core analysis contracts shared across the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Final recommendation direction produced by an analyst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Buy => "BUY",
            Recommendation::Sell => "SELL",
            Recommendation::Hold => "HOLD",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User classification that scales the final reward via a fixed multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipTier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl MembershipTier {
    /// Fixed reward multiplier per tier.
    pub fn multiplier(&self) -> f64 {
        match self {
            MembershipTier::Free => 1.0,
            MembershipTier::Basic => 1.15,
            MembershipTier::Premium => 1.3,
            MembershipTier::Enterprise => 1.5,
        }
    }
}

impl Default for MembershipTier {
    fn default() -> Self {
        MembershipTier::Free
    }
}

/// Caller identity and entitlements attached to one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub membership_tier: MembershipTier,
    /// Free-form caller preferences forwarded to analysts.
    #[serde(default)]
    pub preferences: serde_json::Value,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, membership_tier: MembershipTier) -> Self {
        Self {
            user_id: user_id.into(),
            membership_tier,
            preferences: serde_json::Value::Null,
        }
    }
}

/// Descriptive identity of an analyst implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystInfo {
    pub analyst_type: String,
    pub version: String,
}

impl AnalystInfo {
    pub fn new(analyst_type: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            analyst_type: analyst_type.into(),
            version: version.into(),
        }
    }
}

/// Input for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    /// Subject identifier (stock ticker or internal id).
    pub stock_id: String,
    pub user_context: UserContext,
    /// Additional opaque inputs forwarded to the analyst.
    #[serde(default)]
    pub additional_data: Option<serde_json::Value>,
}

/// Output of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub recommendation: Recommendation,
    /// Analyst's stated confidence in [0, 1].
    pub confidence: f64,
    pub target_price: Option<f64>,
    pub reasoning: Vec<String>,
}

/// Opaque analysis capability consumed by the orchestrator.
///
/// How a recommendation is produced is entirely the implementor's concern;
/// the pipeline only records, scores and validates the process and outcome.
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Descriptive identity used for trajectory attribution.
    fn info(&self) -> AnalystInfo;

    /// Evaluate one subject and produce a recommendation.
    async fn analyze(&self, state: &AnalysisState) -> anyhow::Result<AnalysisResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_multipliers_are_monotonic() {
        assert!(MembershipTier::Free.multiplier() < MembershipTier::Basic.multiplier());
        assert!(MembershipTier::Basic.multiplier() < MembershipTier::Premium.multiplier());
        assert!(MembershipTier::Premium.multiplier() < MembershipTier::Enterprise.multiplier());
        assert_eq!(MembershipTier::Free.multiplier(), 1.0);
        assert_eq!(MembershipTier::Enterprise.multiplier(), 1.5);
    }

    #[test]
    fn recommendation_round_trips_through_json() {
        let json = serde_json::to_string(&Recommendation::Buy).unwrap();
        let back: Recommendation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Recommendation::Buy);
    }
}
