//! Market-performance data contract.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Observed market outcome for one subject, relative to a recommendation date.
///
/// All change fields are fractional returns (0.08 == +8%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPerformanceData {
    pub stock_id: String,
    pub as_of: NaiveDate,
    pub price_change_1d: f64,
    pub price_change_7d: f64,
    pub price_change_30d: f64,
    pub price_change_90d: f64,
    pub benchmark_change_1d: f64,
    pub benchmark_change_7d: f64,
    pub benchmark_change_30d: f64,
    pub benchmark_change_90d: f64,
    /// Annualized 30-day realized volatility.
    pub volatility_30d: f64,
    /// Worst peak-to-trough move over the window, negative or zero.
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

/// Pluggable source of realized market outcomes.
///
/// The reward engine consumes this behind a short-TTL cache; implementations
/// may hit a live data service or serve synthetic data for testing.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_performance(
        &self,
        stock_id: &str,
        as_of: NaiveDate,
    ) -> anyhow::Result<MarketPerformanceData>;
}
