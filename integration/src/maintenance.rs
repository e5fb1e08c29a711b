//! Periodic maintenance tasks with an explicit start/stop lifecycle.

use crate::orchestrator::AnalysisOrchestrator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Intervals for the long-lived maintenance tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Health sweep: idle-trajectory eviction plus a status log line.
    pub health_check_interval_secs: u64,
    /// Recommendation-cache rebuild from user profiles.
    pub cache_refresh_interval_secs: u64,
    /// Profile persistence to disk.
    pub persistence_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 60,
            cache_refresh_interval_secs: 300,
            persistence_interval_secs: 120,
        }
    }
}

/// Owner of the spawned maintenance tasks.
///
/// Tasks run until `shutdown` is called; dropping the handle without a
/// shutdown aborts them with the runtime.
pub struct MaintenanceHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Spawns the health, cache-refresh and persistence loops.
    pub fn start(orchestrator: Arc<AnalysisOrchestrator>) -> Self {
        let config = orchestrator.config().maintenance.clone();
        let (stop, _) = watch::channel(false);
        let mut tasks = Vec::new();

        {
            let orchestrator = orchestrator.clone();
            let mut stop_rx = stop.subscribe();
            let period = Duration::from_secs(config.health_check_interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let evicted = orchestrator.collector().evict_idle().await;
                            if evicted > 0 {
                                info!(evicted, "Health sweep evicted idle trajectories");
                            }
                            let health = orchestrator.health_check().await;
                            for (name, component) in &health {
                                if component.state != crate::orchestrator::HealthState::Healthy {
                                    warn!(component = %name, detail = %component.detail, "Component not healthy");
                                }
                            }
                            let stats = orchestrator.collector().stats();
                            debug!(
                                active = stats.active,
                                completed = stats.completed,
                                failed = stats.failed,
                                steps = stats.total_steps_recorded,
                                "Health sweep complete"
                            );
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
            }));
        }

        {
            let orchestrator = orchestrator.clone();
            let mut stop_rx = stop.subscribe();
            let period = Duration::from_secs(config.cache_refresh_interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            orchestrator.profiles().refresh_caches();
                            debug!(users = orchestrator.profiles().len(), "Refreshed recommendation caches");
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
            }));
        }

        {
            let orchestrator = orchestrator.clone();
            let mut stop_rx = stop.subscribe();
            let period = Duration::from_secs(config.persistence_interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = orchestrator.profiles().persist().await {
                                error!(error = %e, "Profile persistence failed");
                            }
                        }
                        _ = stop_rx.changed() => {
                            // Final flush on the way out.
                            if let Err(e) = orchestrator.profiles().persist().await {
                                error!(error = %e, "Final profile flush failed");
                            }
                            break;
                        }
                    }
                }
            }));
        }

        info!(tasks = tasks.len(), "Maintenance tasks started");
        Self { stop, tasks }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signals every task to stop and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }
        info!("Maintenance tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;

    async fn orchestrator(tmp: &tempfile::TempDir) -> Arc<AnalysisOrchestrator> {
        let config = OrchestratorConfig {
            storage_root: tmp.path().to_path_buf(),
            maintenance: MaintenanceConfig {
                health_check_interval_secs: 1,
                cache_refresh_interval_secs: 1,
                persistence_interval_secs: 1,
            },
            ..OrchestratorConfig::default()
        };
        Arc::new(AnalysisOrchestrator::new(config).await.unwrap())
    }

    #[tokio::test]
    async fn start_and_shutdown_complete_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = MaintenanceHandle::start(orchestrator(&tmp).await);
        assert_eq!(handle.task_count(), 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_profiles_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let o = orchestrator(&tmp).await;
        o.profiles().record_analysis(
            "user-1",
            "technical",
            0.8,
            common::Recommendation::Buy,
            uuid::Uuid::new_v4(),
            0.2,
        );

        let handle = MaintenanceHandle::start(o.clone());
        handle.shutdown().await;

        assert!(tmp.path().join("user_profiles.json").exists());
    }
}
