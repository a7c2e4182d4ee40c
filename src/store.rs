//! Cached per-guild configuration backed by the database.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::database::Database;
use crate::error::{GuardianError, Result};
use crate::models::CommunityConfig;

/// Lazily loaded, process-lifetime cache of [`CommunityConfig`]s.
///
/// Each guild has its own lock, so updates to one guild never wait on another.
pub struct CommunityStore {
    db: Database,
    default_alert_targets: Vec<u64>,
    entries: DashMap<u64, Arc<Mutex<CommunityConfig>>>,
}

impl CommunityStore {
    pub fn new(db: Database, default_alert_targets: Vec<u64>) -> Self {
        Self {
            db,
            default_alert_targets,
            entries: DashMap::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn default_alert_targets(&self) -> &[u64] {
        &self.default_alert_targets
    }

    /// Shared handle to a guild's config, loading it on first use.
    pub async fn entry(&self, guild_id: u64) -> Result<Arc<Mutex<CommunityConfig>>> {
        if let Some(entry) = self.entries.get(&guild_id) {
            return Ok(Arc::clone(entry.value()));
        }

        let mut config = self
            .db
            .load_community_config(guild_id)
            .await?
            .unwrap_or_else(|| CommunityConfig::new(guild_id, &self.default_alert_targets));
        config.ensure_alert_targets(&self.default_alert_targets);

        // A concurrent first load may have won the race; keep whichever landed first.
        let entry = self
            .entries
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(config)));
        Ok(Arc::clone(entry.value()))
    }

    /// Copy of the current config.
    ///
    /// Falls back to built-in defaults, uncached, if the database cannot be read.
    pub async fn snapshot(&self, guild_id: u64) -> CommunityConfig {
        match self.entry(guild_id).await {
            Ok(entry) => entry.lock().await.clone(),
            Err(e) => {
                tracing::warn!(guild_id, error = %e, "Config load failed, using defaults");
                CommunityConfig::new(guild_id, &self.default_alert_targets)
            }
        }
    }

    /// Apply a mutation and persist the result.
    ///
    /// The in-memory change is kept even when saving fails, in which case
    /// [`GuardianError::ConfigPersistFailed`] is returned.
    pub async fn update<R>(
        &self,
        guild_id: u64,
        mutate: impl FnOnce(&mut CommunityConfig) -> R,
    ) -> Result<R> {
        let entry = self.entry(guild_id).await?;
        let mut config = entry.lock().await;

        let result = mutate(&mut config);
        config.ensure_alert_targets(&self.default_alert_targets);

        self.db
            .save_community_config(&config)
            .await
            .map_err(|e| GuardianError::ConfigPersistFailed(e.to_string()))?;

        Ok(result)
    }
}
