//! Guild structure backups.
//!
//! Snapshots a guild's roles and channels into the database so an admin can
//! see what existed before a raid. Each snapshot carries a SHA-256 checksum
//! of its JSON payload, verified whenever it is read back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::database::{BackupRecord, Database};
use crate::error::{GuardianError, Result};
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub id: u64,
    pub name: String,
    pub permissions: u64,
    pub colour: u32,
    pub position: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub id: u64,
    pub name: String,
    pub kind: String,
    pub position: u16,
}

/// Roles and channels of a guild at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub guild_id: u64,
    pub roles: Vec<RoleSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
}

/// Stored backup metadata, without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
    pub roles: usize,
    pub channels: usize,
}

/// Hex-encoded SHA-256 of a payload.
pub fn checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Creates and reads structure snapshots.
#[derive(Clone)]
pub struct BackupService {
    db: Database,
    platform: Arc<dyn Platform>,
}

impl BackupService {
    pub fn new(db: Database, platform: Arc<dyn Platform>) -> Self {
        Self { db, platform }
    }

    /// Snapshot the guild's current structure and store it.
    pub async fn create_backup(&self, guild_id: u64) -> Result<BackupSummary> {
        let snapshot = self.platform.structure_snapshot(guild_id).await?;
        let payload = serde_json::to_string(&snapshot)?;
        let checksum = checksum(&payload);
        let created_at = Utc::now();

        let id = self
            .db
            .insert_backup(guild_id, &checksum, &payload, created_at)
            .await?;

        tracing::info!(
            guild_id,
            backup_id = id,
            roles = snapshot.roles.len(),
            channels = snapshot.channels.len(),
            "Structure backup created"
        );

        Ok(BackupSummary {
            id,
            created_at,
            checksum,
            roles: snapshot.roles.len(),
            channels: snapshot.channels.len(),
        })
    }

    /// Newest backups for a guild.
    pub async fn list_backups(&self, guild_id: u64, limit: u32) -> Result<Vec<BackupSummary>> {
        let records = self.db.list_backups(guild_id, limit).await?;
        records
            .iter()
            .map(|r| -> Result<BackupSummary> { Ok(summarize(r, &decode(r)?)) })
            .collect()
    }

    pub async fn count_backups(&self, guild_id: u64) -> Result<u64> {
        self.db.count_backups(guild_id).await
    }

    /// Load one backup, failing if its checksum no longer matches.
    pub async fn get_backup(&self, guild_id: u64, backup_id: i64) -> Result<Option<StructureSnapshot>> {
        match self.db.get_backup(guild_id, backup_id).await? {
            Some(record) => decode(&record).map(Some),
            None => Ok(None),
        }
    }
}

fn decode(record: &BackupRecord) -> Result<StructureSnapshot> {
    let actual = checksum(&record.payload);
    if actual != record.checksum {
        return Err(GuardianError::Backup(format!(
            "Backup {} failed verification: expected {}, got {}",
            record.id, record.checksum, actual
        )));
    }
    Ok(serde_json::from_str(&record.payload)?)
}

fn summarize(record: &BackupRecord, snapshot: &StructureSnapshot) -> BackupSummary {
    BackupSummary {
        id: record.id,
        created_at: record.created_at,
        checksum: record.checksum.clone(),
        roles: snapshot.roles.len(),
        channels: snapshot.channels.len(),
    }
}
