//! Market-data providers: a seeded synthetic generator and a TTL cache.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{MarketDataProvider, MarketPerformanceData};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Deterministic synthetic market data, seeded per (subject, date).
///
/// Stands in when no live provider is configured so the engine stays
/// testable; the same key always yields the same data.
pub struct SyntheticMarketData;

impl SyntheticMarketData {
    pub fn new() -> Self {
        Self
    }

    fn seed_for(stock_id: &str, as_of: NaiveDate) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        stock_id.hash(&mut hasher);
        as_of.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for SyntheticMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticMarketData {
    async fn fetch_performance(
        &self,
        stock_id: &str,
        as_of: NaiveDate,
    ) -> Result<MarketPerformanceData> {
        let mut rng = fastrand::Rng::with_seed(Self::seed_for(stock_id, as_of));

        // Horizons scale roughly with the square root of elapsed time.
        let base_move = rng.f64() * 0.16 - 0.08;
        let price_change_1d = base_move * 0.2 + (rng.f64() - 0.5) * 0.02;
        let price_change_7d = base_move * 0.5 + (rng.f64() - 0.5) * 0.04;
        let price_change_30d = base_move + (rng.f64() - 0.5) * 0.06;
        let price_change_90d = base_move * 1.7 + (rng.f64() - 0.5) * 0.1;

        let benchmark_move = base_move * 0.4 + (rng.f64() - 0.5) * 0.03;

        Ok(MarketPerformanceData {
            stock_id: stock_id.to_string(),
            as_of,
            price_change_1d,
            price_change_7d,
            price_change_30d,
            price_change_90d,
            benchmark_change_1d: benchmark_move * 0.2,
            benchmark_change_7d: benchmark_move * 0.5,
            benchmark_change_30d: benchmark_move,
            benchmark_change_90d: benchmark_move * 1.7,
            volatility_30d: 0.1 + rng.f64() * 0.35,
            max_drawdown: -(rng.f64() * 0.25),
            sharpe_ratio: rng.f64() * 3.0 - 1.0,
        })
    }
}

struct CacheEntry {
    data: MarketPerformanceData,
    fetched_at: Instant,
}

/// TTL cache in front of any provider, keyed by (subject, date).
pub struct CachingMarketData {
    inner: Arc<dyn MarketDataProvider>,
    ttl: Duration,
    cache: RwLock<HashMap<(String, NaiveDate), CacheEntry>>,
}

impl CachingMarketData {
    pub fn new(inner: Arc<dyn MarketDataProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[async_trait]
impl MarketDataProvider for CachingMarketData {
    async fn fetch_performance(
        &self,
        stock_id: &str,
        as_of: NaiveDate,
    ) -> Result<MarketPerformanceData> {
        let key = (stock_id.to_string(), as_of);
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!(stock_id, %as_of, "Market data cache hit");
                    return Ok(entry.data.clone());
                }
            }
        }

        let data = self.inner.fetch_performance(stock_id, as_of).await?;
        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CacheEntry {
                data: data.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(data)
    }
}
