//! The RULER reward engine: calculator registry and weighted aggregation.

use crate::calculators::{
    AccuracyCalculator, ReasoningQualityCalculator, ReturnPerformanceCalculator, RewardCalculator,
    RiskAdjustedReturnCalculator,
};
use crate::market::{CachingMarketData, SyntheticMarketData};
use crate::types::{RewardSignal, RewardType};
use anyhow::{bail, Result};
use chrono::Utc;
use common::{MarketDataProvider, UserContext};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use trajectory::{AnalysisTrajectory, TrajectoryStatus};

/// Configuration for the reward engine.
///
/// The adaptation increments are placeholder heuristics, deliberately
/// exposed as configuration rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEngineConfig {
    /// Starting weight per reward type.
    pub initial_weights: HashMap<RewardType, f64>,
    /// Weight nudge applied when a component performs well.
    pub weight_increment: f64,
    /// Weight nudge applied when a component performs poorly.
    pub weight_decrement: f64,
    pub max_weight: f64,
    pub min_weight: f64,
    /// Component quality above this is considered strong.
    pub quality_high_threshold: f64,
    /// Component quality below this is considered weak.
    pub quality_low_threshold: f64,
    /// Overall reward above this allows upward nudges.
    pub total_reward_high_threshold: f64,
    /// Overall reward below this forces downward nudges.
    pub total_reward_low_threshold: f64,
    /// Market-data cache TTL in seconds.
    pub market_cache_ttl_secs: u64,
}

impl Default for RewardEngineConfig {
    fn default() -> Self {
        let mut initial_weights = HashMap::new();
        initial_weights.insert(RewardType::Accuracy, 0.3);
        initial_weights.insert(RewardType::ReturnPerformance, 0.3);
        initial_weights.insert(RewardType::RiskAdjustedReturn, 0.2);
        initial_weights.insert(RewardType::ReasoningQuality, 0.2);
        Self {
            initial_weights,
            weight_increment: 0.02,
            weight_decrement: 0.02,
            max_weight: 1.0,
            min_weight: 0.01,
            quality_high_threshold: 0.7,
            quality_low_threshold: 0.3,
            total_reward_high_threshold: 0.5,
            total_reward_low_threshold: -0.3,
            market_cache_ttl_secs: 3600,
        }
    }
}

/// Registry of reward calculators plus the dynamic weight table.
pub struct RewardEngine {
    config: RewardEngineConfig,
    calculators: HashMap<RewardType, Box<dyn RewardCalculator>>,
    dynamic_weights: RwLock<HashMap<RewardType, f64>>,
    market: CachingMarketData,
}

impl RewardEngine {
    /// Builds an engine with an empty registry. The synthetic generator
    /// stands in when no market provider is given.
    pub fn new(config: RewardEngineConfig, provider: Option<Arc<dyn MarketDataProvider>>) -> Self {
        let provider = provider
            .unwrap_or_else(|| Arc::new(SyntheticMarketData::new()) as Arc<dyn MarketDataProvider>);
        let market = CachingMarketData::new(
            provider,
            Duration::from_secs(config.market_cache_ttl_secs),
        );
        let dynamic_weights = RwLock::new(config.initial_weights.clone());
        Self {
            config,
            calculators: HashMap::new(),
            dynamic_weights,
            market,
        }
    }

    /// Engine with the full standard calculator set registered.
    pub fn with_default_calculators(
        config: RewardEngineConfig,
        provider: Option<Arc<dyn MarketDataProvider>>,
    ) -> Self {
        let mut engine = Self::new(config, provider);
        engine.register_calculator(Box::new(AccuracyCalculator::default()));
        engine.register_calculator(Box::new(ReturnPerformanceCalculator::default()));
        engine.register_calculator(Box::new(RiskAdjustedReturnCalculator::default()));
        engine.register_calculator(Box::new(ReasoningQualityCalculator::default()));
        engine
    }

    /// New strategies are added by registration, keyed by their reward type.
    pub fn register_calculator(&mut self, calculator: Box<dyn RewardCalculator>) {
        let reward_type = calculator.reward_type();
        debug!(%reward_type, "Registered reward calculator");
        self.calculators.insert(reward_type, calculator);
    }

    /// Computes a reward signal for a completed trajectory.
    ///
    /// Calculator failures are contained: the failing component is logged
    /// and skipped, and the signal is assembled from the rest. `immediate`
    /// marks the signal as not requiring downstream validation.
    pub async fn generate_reward_signal(
        &self,
        trajectory: &AnalysisTrajectory,
        user_context: &UserContext,
        immediate: bool,
        custom_weights: Option<HashMap<RewardType, f64>>,
    ) -> Result<RewardSignal> {
        if trajectory.status != TrajectoryStatus::Completed {
            bail!(
                "Cannot score trajectory {} with status {:?}",
                trajectory.trajectory_id,
                trajectory.status
            );
        }

        let as_of = trajectory
            .ended_at
            .unwrap_or_else(Utc::now)
            .date_naive();
        let market = self
            .market
            .fetch_performance(&trajectory.stock_id, as_of)
            .await?;

        let weights = match custom_weights {
            Some(w) => w,
            None => self.dynamic_weights.read().await.clone(),
        };

        let mut signal = RewardSignal::new(
            trajectory.trajectory_id,
            &user_context.user_id,
            user_context.membership_tier,
        );
        signal.requires_validation = !immediate;

        for (reward_type, calculator) in &self.calculators {
            match calculator.calculate(trajectory, &market, user_context).await {
                Ok(metrics) => {
                    let weight = weights.get(reward_type).copied().unwrap_or(0.1);
                    signal.add_reward_component(metrics, weight);
                }
                Err(e) => {
                    warn!(
                        %reward_type,
                        trajectory_id = %trajectory.trajectory_id,
                        error = %e,
                        "Reward calculator failed, skipping component"
                    );
                }
            }
        }

        debug!(
            signal_id = %signal.signal_id,
            components = signal.components.len(),
            total = signal.total_reward,
            "Generated reward signal"
        );
        Ok(signal)
    }

    /// Marks a signal final and nudges the dynamic weight table.
    ///
    /// This is a bounded heuristic reinforcement loop, not a gradient
    /// method: strong components of strong signals gain weight, weak
    /// components lose it, and every weight stays inside
    /// [min_weight, max_weight].
    pub async fn finalize_reward_signal(&self, signal: &mut RewardSignal) {
        let mut weights = self.dynamic_weights.write().await;
        for (reward_type, metrics) in &signal.components {
            let entry = weights
                .entry(*reward_type)
                .or_insert(self.config.min_weight);
            if metrics.quality_score > self.config.quality_high_threshold
                && signal.weighted_total_reward > self.config.total_reward_high_threshold
            {
                *entry = (*entry + self.config.weight_increment).min(self.config.max_weight);
            } else if metrics.quality_score < self.config.quality_low_threshold
                || signal.weighted_total_reward < self.config.total_reward_low_threshold
            {
                *entry = (*entry - self.config.weight_decrement).max(self.config.min_weight);
            }
        }
        drop(weights);

        signal.is_final = true;
        info!(signal_id = %signal.signal_id, total = signal.weighted_total_reward, "Finalized reward signal");
    }

    /// Snapshot of the current dynamic weight table.
    pub async fn current_weights(&self) -> HashMap<RewardType, f64> {
        self.dynamic_weights.read().await.clone()
    }

    pub fn registered_types(&self) -> Vec<RewardType> {
        self.calculators.keys().copied().collect()
    }

    pub fn config(&self) -> &RewardEngineConfig {
        &self.config
    }
}
