//! Per-user personalization state and its persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{Recommendation, SCHEMA_VERSION};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Personalization level, a pure function of total analysis count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PersonalizationLevel {
    Basic,
    Intermediate,
    Advanced,
    Expert,
}

impl PersonalizationLevel {
    pub fn from_total_analyses(total: u64) -> Self {
        match total {
            0..=19 => PersonalizationLevel::Basic,
            20..=49 => PersonalizationLevel::Intermediate,
            50..=99 => PersonalizationLevel::Advanced,
            _ => PersonalizationLevel::Expert,
        }
    }
}

/// One historical performance observation for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformancePoint {
    pub trajectory_id: Uuid,
    pub reward: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Running confidence average for one analyst type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalystAffinity {
    pub analyses: u64,
    pub mean_confidence: f64,
}

impl AnalystAffinity {
    fn record(&mut self, confidence: f64) {
        self.analyses += 1;
        let n = self.analyses as f64;
        self.mean_confidence += (confidence - self.mean_confidence) / n;
    }
}

/// Accumulated personalization state for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub total_analyses: u64,
    pub analyst_affinity: HashMap<String, AnalystAffinity>,
    pub recommendation_counts: HashMap<String, u64>,
    /// Bounded: only the most recent observations are retained.
    pub performance_history: VecDeque<PerformancePoint>,
    pub level: PersonalizationLevel,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl UserProfile {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_analyses: 0,
            analyst_affinity: HashMap::new(),
            recommendation_counts: HashMap::new(),
            performance_history: VecDeque::new(),
            level: PersonalizationLevel::Basic,
            updated_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Simple trend over the last two performance points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceTrend {
    Improving,
    Declining,
    Flat,
}

/// Precomputed per-user recommendations, refreshed periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationCache {
    pub user_id: String,
    /// Analyst types ranked by mean confidence, best first.
    pub top_analysts: Vec<String>,
    pub preferred_recommendation: Option<Recommendation>,
    pub trend: PerformanceTrend,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct PersistedProfiles {
    schema_version: u32,
    profiles: HashMap<String, UserProfile>,
}

/// Keyed store for user profiles plus the derived recommendation caches.
///
/// Profiles persist as one `user_profiles.json` document under the storage
/// root; a failed write is logged and retried on the next maintenance pass.
pub struct ProfileStore {
    profiles: DashMap<String, UserProfile>,
    caches: DashMap<String, RecommendationCache>,
    path: PathBuf,
    max_history: usize,
}

impl ProfileStore {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        Self {
            profiles: DashMap::new(),
            caches: DashMap::new(),
            path: storage_root.as_ref().join("user_profiles.json"),
            max_history: 100,
        }
    }

    /// Loads previously persisted profiles. Missing file means a cold start.
    pub async fn load(&self) -> Result<usize> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read profile file {:?}", self.path))
            }
        };
        let persisted: PersistedProfiles =
            serde_json::from_slice(&body).context("Failed to parse profile file")?;
        if persisted.schema_version != SCHEMA_VERSION {
            warn!(
                found = persisted.schema_version,
                expected = SCHEMA_VERSION,
                "Profile file has a different schema version"
            );
        }
        let count = persisted.profiles.len();
        for (user_id, profile) in persisted.profiles {
            self.profiles.insert(user_id, profile);
        }
        info!(count, "Loaded user profiles");
        Ok(count)
    }

    /// Records one completed analysis into the user's profile.
    pub fn record_analysis(
        &self,
        user_id: &str,
        analyst_type: &str,
        confidence: f64,
        recommendation: Recommendation,
        trajectory_id: Uuid,
        reward: f64,
    ) {
        let mut profile = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id));

        profile.total_analyses += 1;
        profile
            .analyst_affinity
            .entry(analyst_type.to_string())
            .or_default()
            .record(confidence);
        *profile
            .recommendation_counts
            .entry(recommendation.as_str().to_string())
            .or_insert(0) += 1;
        profile.performance_history.push_back(PerformancePoint {
            trajectory_id,
            reward,
            recorded_at: Utc::now(),
        });
        while profile.performance_history.len() > self.max_history {
            profile.performance_history.pop_front();
        }
        profile.level = PersonalizationLevel::from_total_analyses(profile.total_analyses);
        profile.updated_at = Utc::now();
        debug!(user_id, total = profile.total_analyses, "Updated user profile");
    }

    pub fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.get(user_id).map(|p| p.clone())
    }

    pub fn recommendation_cache(&self, user_id: &str) -> Option<RecommendationCache> {
        self.caches.get(user_id).map(|c| c.clone())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Rebuilds every user's recommendation cache from their profile.
    pub fn refresh_caches(&self) {
        for profile in self.profiles.iter() {
            let mut ranked: Vec<(String, f64)> = profile
                .analyst_affinity
                .iter()
                .map(|(name, a)| (name.clone(), a.mean_confidence))
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let top_analysts: Vec<String> =
                ranked.into_iter().take(3).map(|(name, _)| name).collect();

            let preferred_recommendation = profile
                .recommendation_counts
                .iter()
                .max_by_key(|(_, count)| **count)
                .and_then(|(name, _)| match name.as_str() {
                    "BUY" => Some(Recommendation::Buy),
                    "SELL" => Some(Recommendation::Sell),
                    "HOLD" => Some(Recommendation::Hold),
                    _ => None,
                });

            let trend = {
                let history = &profile.performance_history;
                if history.len() < 2 {
                    PerformanceTrend::Flat
                } else {
                    let last = history[history.len() - 1].reward;
                    let prev = history[history.len() - 2].reward;
                    if last > prev + 1e-9 {
                        PerformanceTrend::Improving
                    } else if last < prev - 1e-9 {
                        PerformanceTrend::Declining
                    } else {
                        PerformanceTrend::Flat
                    }
                }
            };

            self.caches.insert(
                profile.user_id.clone(),
                RecommendationCache {
                    user_id: profile.user_id.clone(),
                    top_analysts,
                    preferred_recommendation,
                    trend,
                    refreshed_at: Utc::now(),
                },
            );
        }
    }

    /// Writes the full profile map to disk.
    pub async fn persist(&self) -> Result<()> {
        let profiles: HashMap<String, UserProfile> = self
            .profiles
            .iter()
            .map(|p| (p.key().clone(), p.value().clone()))
            .collect();
        let persisted = PersistedProfiles {
            schema_version: SCHEMA_VERSION,
            profiles,
        };
        let body =
            serde_json::to_vec_pretty(&persisted).context("Failed to serialize profiles")?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("Failed to write profile file {:?}", self.path))?;
        Ok(())
    }
}
