//! One-call analysis pipeline: collect, score, validate, personalize.

use crate::maintenance::MaintenanceConfig;
use crate::personalization::ProfileStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{AnalysisResult, AnalysisState, Analyst, SCHEMA_VERSION};
use dashmap::DashMap;
use reward::{RewardEngine, RewardEngineConfig, RewardSignal, RewardType};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use trajectory::{
    CollectorConfig, CollectorStats, FileTrajectoryStore, StepRecord, StepType,
    TrajectoryCollector,
};
use uuid::Uuid;
use validation::{
    RewardValidator, ValidationResult, ValidationStatus, ValidationSummary, ValidatorConfig,
};

/// How much of the pipeline one analysis request runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMode {
    /// Score immediately, skip validation.
    Quick,
    /// Score and validate against the rolling history.
    Standard,
    /// Standard plus a rule-weight optimization pass.
    Deep,
}

/// Configuration for the orchestrator and the components it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Global admission bound on concurrently running analyses.
    pub max_concurrent_analyses: usize,
    /// Root directory for all persisted artifacts.
    pub storage_root: PathBuf,
    pub collector: CollectorConfig,
    pub reward: RewardEngineConfig,
    pub validator: ValidatorConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_analyses: 10,
            storage_root: PathBuf::from("art_data"),
            collector: CollectorConfig::default(),
            reward: RewardEngineConfig::default(),
            validator: ValidatorConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Bookkeeping entry for an analysis currently inside the pipeline.
#[derive(Debug, Clone)]
pub struct ActiveAnalysis {
    pub trajectory_id: Uuid,
    pub stock_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
}

/// Pipeline provenance returned alongside the analyst's result.
///
/// Partial degradation (fewer reward components, missing validation) is
/// visible here rather than raised as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationMetadata {
    pub trajectory_id: Uuid,
    /// Absent when reward generation failed; the analysis result itself is
    /// still returned.
    pub signal_id: Option<Uuid>,
    pub mode: AnalysisMode,
    pub total_steps: usize,
    pub total_reward: f64,
    pub weighted_total_reward: f64,
    pub reward_signal: Option<RewardSignal>,
    pub validation_results: Vec<ValidationResult>,
    /// None when validation was skipped or unavailable.
    pub validation_passed: Option<bool>,
    pub system_status: SystemStatus,
    pub processing_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub state: HealthState,
    pub detail: String,
}

/// Point-in-time snapshot of the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub components: HashMap<String, ComponentHealth>,
    pub collector: CollectorStats,
    pub validation: Option<ValidationSummary>,
    pub reward_weights: HashMap<RewardType, f64>,
    pub active_analyses: usize,
    pub tracked_users: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PersistedValidation<'a> {
    schema_version: u32,
    signal_id: Uuid,
    results: &'a [ValidationResult],
}

/// Ties the collector, reward engine and validator into a single
/// `process_analysis` call under a global admission bound.
pub struct AnalysisOrchestrator {
    config: OrchestratorConfig,
    collector: TrajectoryCollector,
    engine: RewardEngine,
    /// None when the validator config was rejected at startup; the pipeline
    /// runs without validation instead of refusing to start.
    validator: Option<RewardValidator>,
    profiles: ProfileStore,
    admission: Semaphore,
    active: DashMap<Uuid, ActiveAnalysis>,
}

impl AnalysisOrchestrator {
    /// Builds the full pipeline and loads persisted personalization state.
    /// Storage-directory creation failure is fatal; a rejected validator
    /// config only disables validation, and an unreadable profile file only
    /// loses personalization history.
    pub async fn new(config: OrchestratorConfig) -> Result<Self> {
        let store = FileTrajectoryStore::new(&config.storage_root)?;
        for sub in ["rewards", "validations"] {
            let dir = config.storage_root.join(sub);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create storage dir {:?}", dir))?;
        }

        let collector = TrajectoryCollector::new(config.collector.clone(), std::sync::Arc::new(store));
        let engine = RewardEngine::with_default_calculators(config.reward.clone(), None);
        let validator = match RewardValidator::try_new(config.validator.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Validator disabled by invalid configuration");
                None
            }
        };
        let profiles = ProfileStore::new(&config.storage_root);
        if let Err(e) = profiles.load().await {
            warn!(error = %e, "Could not load persisted user profiles, starting cold");
        }
        let admission = Semaphore::new(config.max_concurrent_analyses.max(1));

        info!(
            max_concurrent = config.max_concurrent_analyses,
            storage = ?config.storage_root,
            validation = validator.is_some(),
            "Orchestrator initialized"
        );
        Ok(Self {
            config,
            collector,
            engine,
            validator,
            profiles,
            admission,
            active: DashMap::new(),
        })
    }

    /// Runs one analysis end to end: trajectory collection around the
    /// analyst call, reward scoring, validation per mode, and profile
    /// update. The analyst's result is returned even when scoring fails.
    pub async fn process_analysis(
        &self,
        analyst: &dyn Analyst,
        state: &AnalysisState,
        mode: AnalysisMode,
    ) -> Result<(AnalysisResult, IntegrationMetadata)> {
        let started = Instant::now();
        let _permit = self
            .admission
            .acquire()
            .await
            .context("Analysis admission queue closed")?;

        let analyst_info = analyst.info();
        let trajectory_id = self
            .collector
            .start_trajectory(
                &state.stock_id,
                analyst_info.clone(),
                &state.user_context.user_id,
                serde_json::to_value(&state.user_context).unwrap_or(serde_json::Value::Null),
                state.additional_data.clone().unwrap_or(serde_json::Value::Null),
            )
            .await?;
        self.active.insert(
            trajectory_id,
            ActiveAnalysis {
                trajectory_id,
                stock_id: state.stock_id.clone(),
                user_id: state.user_context.user_id.clone(),
                started_at: Utc::now(),
            },
        );

        let outcome = self
            .run_pipeline(analyst, state, mode, trajectory_id, started)
            .await;
        self.active.remove(&trajectory_id);
        match &outcome {
            Ok(_) => {}
            Err(e) => {
                // Best effort; the trajectory may already be finalized.
                let _ = self
                    .collector
                    .fail_trajectory(trajectory_id, &e.to_string())
                    .await;
            }
        }
        outcome
    }

    async fn run_pipeline(
        &self,
        analyst: &dyn Analyst,
        state: &AnalysisState,
        mode: AnalysisMode,
        trajectory_id: Uuid,
        started: Instant,
    ) -> Result<(AnalysisResult, IntegrationMetadata)> {
        let analyst_info = analyst.info();

        self.collector
            .record_step(
                trajectory_id,
                StepRecord::new(
                    StepType::DataCollection,
                    json!({
                        "stock_id": state.stock_id,
                        "user_id": state.user_context.user_id,
                        "analyst_type": analyst_info.analyst_type,
                    }),
                    1.0,
                ),
            )
            .await?;

        // Analysts that hold a collector handle can record their own steps;
        // the trajectory id travels in the opaque additional data.
        let mut analyst_state = state.clone();
        let mut extra = match analyst_state.additional_data.take() {
            Some(serde_json::Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        extra.insert("trajectory_id".to_string(), json!(trajectory_id));
        analyst_state.additional_data = Some(serde_json::Value::Object(extra));

        let result = analyst
            .analyze(&analyst_state)
            .await
            .with_context(|| format!("Analyst {} failed", analyst_info.analyst_type))?;

        self.collector
            .record_step(
                trajectory_id,
                StepRecord::new(
                    StepType::RecommendationLogic,
                    json!({ "stock_id": state.stock_id }),
                    result.confidence,
                )
                .with_reasoning(result.reasoning.clone())
                .with_result(json!({
                    "recommendation": result.recommendation.as_str(),
                    "target_price": result.target_price,
                })),
            )
            .await?;

        let trajectory = self
            .collector
            .complete_trajectory(
                trajectory_id,
                result.recommendation,
                result.confidence,
                result.target_price,
                result.reasoning.clone(),
            )
            .await?;

        let immediate = mode == AnalysisMode::Quick;
        let mut reward_signal: Option<RewardSignal> = None;
        let mut validation_results: Vec<ValidationResult> = Vec::new();
        let mut validation_passed: Option<bool> = None;

        match self
            .engine
            .generate_reward_signal(&trajectory, &state.user_context, immediate, None)
            .await
        {
            Ok(mut signal) => {
                if !immediate {
                    match &self.validator {
                        Some(validator) => {
                            let results = validator
                                .validate_reward_signal(&mut signal, None, None)
                                .await?;
                            validation_passed = Some(
                                results
                                    .iter()
                                    .all(|r| r.status != ValidationStatus::Failed),
                            );
                            self.persist_validations(signal.signal_id, results.clone());
                            validation_results = results;
                            if mode == AnalysisMode::Deep {
                                validator.optimize_rule_weights().await;
                            }
                        }
                        None => {
                            debug!(%trajectory_id, "Validation unavailable, signal kept provisional");
                        }
                    }
                }
                self.engine.finalize_reward_signal(&mut signal).await;

                self.profiles.record_analysis(
                    &state.user_context.user_id,
                    &analyst_info.analyst_type,
                    result.confidence,
                    result.recommendation,
                    trajectory_id,
                    signal.weighted_total_reward,
                );
                self.persist_signal(signal.clone());
                reward_signal = Some(signal);
            }
            Err(e) => {
                // The recommendation is still useful without a score.
                warn!(%trajectory_id, error = %e, "Reward generation failed");
            }
        }

        let metadata = IntegrationMetadata {
            trajectory_id,
            signal_id: reward_signal.as_ref().map(|s| s.signal_id),
            mode,
            total_steps: trajectory.steps.len(),
            total_reward: reward_signal.as_ref().map_or(0.0, |s| s.total_reward),
            weighted_total_reward: reward_signal
                .as_ref()
                .map_or(0.0, |s| s.weighted_total_reward),
            reward_signal,
            validation_results,
            validation_passed,
            system_status: self.system_status().await,
            processing_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %trajectory_id,
            recommendation = %result.recommendation,
            reward = metadata.weighted_total_reward,
            ms = metadata.processing_ms,
            "Analysis processed"
        );
        Ok((result, metadata))
    }

    /// Per-component health, summarized for operators.
    pub async fn health_check(&self) -> HashMap<String, ComponentHealth> {
        let mut components = HashMap::new();

        let stats = self.collector.stats();
        let capacity = self.collector.config().max_active_trajectories;
        components.insert(
            "collector".to_string(),
            if stats.active >= capacity {
                ComponentHealth {
                    state: HealthState::Degraded,
                    detail: format!("active set at capacity ({})", capacity),
                }
            } else {
                ComponentHealth {
                    state: HealthState::Healthy,
                    detail: format!("{} active, {} completed", stats.active, stats.completed),
                }
            },
        );

        let registered = self.engine.registered_types().len();
        components.insert(
            "reward_engine".to_string(),
            if registered == 0 {
                ComponentHealth {
                    state: HealthState::Unhealthy,
                    detail: "no calculators registered".to_string(),
                }
            } else {
                ComponentHealth {
                    state: HealthState::Healthy,
                    detail: format!("{} calculators registered", registered),
                }
            },
        );

        components.insert(
            "validator".to_string(),
            match &self.validator {
                Some(v) => ComponentHealth {
                    state: HealthState::Healthy,
                    detail: format!("{} signals validated", v.validated_signal_count()),
                },
                None => ComponentHealth {
                    state: HealthState::Degraded,
                    detail: "validation disabled by configuration".to_string(),
                },
            },
        );

        components.insert(
            "storage".to_string(),
            if self.config.storage_root.is_dir() {
                ComponentHealth {
                    state: HealthState::Healthy,
                    detail: format!("{:?}", self.config.storage_root),
                }
            } else {
                ComponentHealth {
                    state: HealthState::Unhealthy,
                    detail: format!("storage root {:?} missing", self.config.storage_root),
                }
            },
        );

        components
    }

    /// Full status snapshot: health plus the live counters of every part.
    pub async fn system_status(&self) -> SystemStatus {
        let validation = match &self.validator {
            Some(v) => Some(v.validation_summary().await),
            None => None,
        };
        SystemStatus {
            components: self.health_check().await,
            collector: self.collector.stats(),
            validation,
            reward_weights: self.engine.current_weights().await,
            active_analyses: self.active.len(),
            tracked_users: self.profiles.len(),
            generated_at: Utc::now(),
        }
    }

    pub fn collector(&self) -> &TrajectoryCollector {
        &self.collector
    }

    pub fn engine(&self) -> &RewardEngine {
        &self.engine
    }

    pub fn validator(&self) -> Option<&RewardValidator> {
        self.validator.as_ref()
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn active_analyses(&self) -> Vec<ActiveAnalysis> {
        self.active.iter().map(|a| a.clone()).collect()
    }

    /// Signal persistence runs off the critical path; a failed write is
    /// logged and the in-memory signal remains authoritative.
    fn persist_signal(&self, signal: RewardSignal) {
        let path = self
            .config
            .storage_root
            .join("rewards")
            .join(format!("{}.json", signal.signal_id));
        tokio::spawn(async move {
            let body = match serde_json::to_vec_pretty(&signal) {
                Ok(body) => body,
                Err(e) => {
                    error!(signal_id = %signal.signal_id, error = %e, "Signal serialization failed");
                    return;
                }
            };
            if let Err(e) = tokio::fs::write(&path, body).await {
                error!(signal_id = %signal.signal_id, error = %e, "Signal persistence failed");
            }
        });
    }

    fn persist_validations(&self, signal_id: Uuid, results: Vec<ValidationResult>) {
        let path = self
            .config
            .storage_root
            .join("validations")
            .join(format!("{}.json", signal_id));
        tokio::spawn(async move {
            let record = PersistedValidation {
                schema_version: SCHEMA_VERSION,
                signal_id,
                results: &results,
            };
            let body = match serde_json::to_vec_pretty(&record) {
                Ok(body) => body,
                Err(e) => {
                    error!(%signal_id, error = %e, "Validation serialization failed");
                    return;
                }
            };
            if let Err(e) = tokio::fs::write(&path, body).await {
                error!(%signal_id, error = %e, "Validation persistence failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{AnalystInfo, MembershipTier, Recommendation, UserContext};

    struct StubAnalyst {
        fail: bool,
    }

    #[async_trait]
    impl Analyst for StubAnalyst {
        fn info(&self) -> AnalystInfo {
            AnalystInfo::new("technical", "1.0")
        }

        async fn analyze(&self, _state: &AnalysisState) -> Result<AnalysisResult> {
            if self.fail {
                anyhow::bail!("synthetic analyst failure");
            }
            Ok(AnalysisResult {
                recommendation: Recommendation::Buy,
                confidence: 0.87,
                target_price: Some(600.0),
                reasoning: vec!["momentum breakout".to_string()],
            })
        }
    }

    fn state() -> AnalysisState {
        AnalysisState {
            stock_id: "2330".to_string(),
            user_context: UserContext::new("user-1", MembershipTier::Free),
            additional_data: None,
        }
    }

    async fn orchestrator() -> (AnalysisOrchestrator, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            storage_root: tmp.path().to_path_buf(),
            ..OrchestratorConfig::default()
        };
        (AnalysisOrchestrator::new(config).await.unwrap(), tmp)
    }

    #[tokio::test]
    async fn quick_mode_scores_without_validation() {
        let (o, _tmp) = orchestrator().await;
        let (result, meta) = o
            .process_analysis(&StubAnalyst { fail: false }, &state(), AnalysisMode::Quick)
            .await
            .unwrap();
        assert_eq!(result.recommendation, Recommendation::Buy);
        assert!(meta.signal_id.is_some());
        assert_eq!(meta.validation_passed, None);
        assert_eq!(meta.total_steps, 2);
    }

    #[tokio::test]
    async fn standard_mode_records_validation_verdict() {
        let (o, _tmp) = orchestrator().await;
        let (_, meta) = o
            .process_analysis(&StubAnalyst { fail: false }, &state(), AnalysisMode::Standard)
            .await
            .unwrap();
        assert!(meta.validation_passed.is_some());
        assert_eq!(meta.validation_results.len(), 3);
        assert!(meta.reward_signal.is_some());
        // Scoring ran while this request was still the active one.
        assert_eq!(meta.system_status.active_analyses, 1);
        assert_eq!(
            o.validator().unwrap().results_for(meta.signal_id.unwrap()).len(),
            3
        );
    }

    #[tokio::test]
    async fn analyst_failure_fails_the_trajectory() {
        let (o, _tmp) = orchestrator().await;
        let err = o
            .process_analysis(&StubAnalyst { fail: true }, &state(), AnalysisMode::Quick)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("technical"));

        let stats = o.collector().stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.failed, 1);
        assert!(o.active_analyses().is_empty());
    }

    #[tokio::test]
    async fn invalid_validator_config_degrades_instead_of_aborting() {
        let tmp = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            storage_root: tmp.path().to_path_buf(),
            validator: ValidatorConfig {
                history_window: 0,
                ..ValidatorConfig::default()
            },
            ..OrchestratorConfig::default()
        };
        let o = AnalysisOrchestrator::new(config).await.unwrap();
        assert!(o.validator().is_none());

        // Standard mode still succeeds, just without a verdict.
        let (_, meta) = o
            .process_analysis(&StubAnalyst { fail: false }, &state(), AnalysisMode::Standard)
            .await
            .unwrap();
        assert!(meta.signal_id.is_some());
        assert_eq!(meta.validation_passed, None);

        let health = o.health_check().await;
        assert_eq!(health["validator"].state, HealthState::Degraded);
    }

    #[tokio::test]
    async fn status_snapshot_reflects_processed_work() {
        let (o, _tmp) = orchestrator().await;
        o.process_analysis(&StubAnalyst { fail: false }, &state(), AnalysisMode::Standard)
            .await
            .unwrap();

        let status = o.system_status().await;
        assert_eq!(status.collector.completed, 1);
        assert_eq!(status.active_analyses, 0);
        assert_eq!(status.tracked_users, 1);
        assert_eq!(status.reward_weights.len(), 4);
        assert!(status.validation.unwrap().total_results >= 3);
        assert_eq!(status.components["collector"].state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn profiles_accumulate_across_analyses() {
        let (o, _tmp) = orchestrator().await;
        for _ in 0..3 {
            o.process_analysis(&StubAnalyst { fail: false }, &state(), AnalysisMode::Quick)
                .await
                .unwrap();
        }
        let profile = o.profiles().profile("user-1").unwrap();
        assert_eq!(profile.total_analyses, 3);
        assert_eq!(profile.recommendation_counts["BUY"], 3);
    }

    #[tokio::test]
    async fn profiles_survive_an_orchestrator_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig {
            storage_root: tmp.path().to_path_buf(),
            ..OrchestratorConfig::default()
        };

        let o = AnalysisOrchestrator::new(config.clone()).await.unwrap();
        o.process_analysis(&StubAnalyst { fail: false }, &state(), AnalysisMode::Quick)
            .await
            .unwrap();
        o.profiles().persist().await.unwrap();
        drop(o);

        let restarted = AnalysisOrchestrator::new(config).await.unwrap();
        let profile = restarted.profiles().profile("user-1").unwrap();
        assert_eq!(profile.total_analyses, 1);
        assert_eq!(profile.recommendation_counts["BUY"], 1);
    }
}
