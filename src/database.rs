//! SQLite database for persistent storage.
//!
//! Holds per-guild protection settings, the append-only evidence and action
//! logs, and structure backups.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{GuardianError, Result};
use crate::models::{ActionKind, CommunityConfig};

/// One stored detection, mass or not.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceRecord {
    pub id: i64,
    pub guild_id: u64,
    pub actor_id: u64,
    pub kind: ActionKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// One response the bot took (or failed to take) to a detection.
///
/// `actor_id` is whoever performed the destructive action; `target_id` and
/// `target_name` describe what it was performed on (the deleted channel or
/// role, the removed member, the added bot).
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub id: i64,
    pub guild_id: u64,
    pub actor_id: u64,
    pub kind: ActionKind,
    pub target_id: u64,
    pub target_name: String,
    pub outcome: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Action log row to append.
#[derive(Debug, Clone, Copy)]
pub struct NewAction<'a> {
    pub guild_id: u64,
    pub actor_id: u64,
    pub kind: ActionKind,
    pub target_id: u64,
    pub target_name: &'a str,
    pub outcome: &'a str,
    pub detail: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// Stored snapshot of a guild's roles and channels.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub id: i64,
    pub guild_id: u64,
    pub checksum: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    ///
    /// Creates the database file and initializes schema if needed.
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GuardianError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| GuardianError::Database(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A single connection, since every sqlite memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| GuardianError::Database(format!("Failed to create in-memory db: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| GuardianError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| GuardianError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    // ========== Community Configuration ==========

    /// Load a stored guild configuration, `None` if the guild was never saved.
    pub async fn load_community_config(&self, guild_id: u64) -> Result<Option<CommunityConfig>> {
        let row = sqlx::query(
            "SELECT guild_id, log_channel_id, thresholds, exempt_users, exempt_bots,
                    alert_targets, isolation_role_id, auto_isolate, isolated_actors,
                    lockdown_active
             FROM community_config WHERE guild_id = ?",
        )
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to get config: {}", e)))?;

        row.map(|row| community_config_from_row(&row)).transpose()
    }

    /// Insert or replace a guild configuration.
    pub async fn save_community_config(&self, config: &CommunityConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO community_config (guild_id, log_channel_id, thresholds, exempt_users,
                exempt_bots, alert_targets, isolation_role_id, auto_isolate, isolated_actors,
                lockdown_active, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(guild_id) DO UPDATE SET
                log_channel_id = excluded.log_channel_id,
                thresholds = excluded.thresholds,
                exempt_users = excluded.exempt_users,
                exempt_bots = excluded.exempt_bots,
                alert_targets = excluded.alert_targets,
                isolation_role_id = excluded.isolation_role_id,
                auto_isolate = excluded.auto_isolate,
                isolated_actors = excluded.isolated_actors,
                lockdown_active = excluded.lockdown_active,
                updated_at = excluded.updated_at",
        )
        .bind(config.guild_id as i64)
        .bind(config.log_channel_id.map(|id| id as i64))
        .bind(serde_json::to_string(&config.thresholds)?)
        .bind(serde_json::to_string(&config.exempt_users)?)
        .bind(serde_json::to_string(&config.exempt_bots)?)
        .bind(serde_json::to_string(&config.alert_targets)?)
        .bind(config.isolation_role_id.map(|id| id as i64))
        .bind(config.auto_isolate)
        .bind(serde_json::to_string(&config.isolated_actors)?)
        .bind(config.lockdown_active)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to save config: {}", e)))?;

        Ok(())
    }

    // ========== Evidence ==========

    /// Append a detection to the evidence log.
    pub async fn append_evidence(
        &self,
        guild_id: u64,
        actor_id: u64,
        kind: ActionKind,
        payload: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO evidence (guild_id, actor_id, kind, payload, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(guild_id as i64)
        .bind(actor_id as i64)
        .bind(kind.as_str())
        .bind(payload.to_string())
        .bind(format_timestamp(timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to append evidence: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// Newest evidence for a guild, optionally restricted to one actor.
    pub async fn recent_evidence(
        &self,
        guild_id: u64,
        actor_id: Option<u64>,
        limit: u32,
    ) -> Result<Vec<EvidenceRecord>> {
        let rows = match actor_id {
            Some(actor_id) => {
                sqlx::query(
                    "SELECT id, guild_id, actor_id, kind, payload, timestamp
                     FROM evidence WHERE guild_id = ? AND actor_id = ?
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?",
                )
                .bind(guild_id as i64)
                .bind(actor_id as i64)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, guild_id, actor_id, kind, payload, timestamp
                     FROM evidence WHERE guild_id = ?
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?",
                )
                .bind(guild_id as i64)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| GuardianError::Database(format!("Failed to get evidence: {}", e)))?;

        rows.iter()
            .map(|row| -> Result<EvidenceRecord> {
                Ok(EvidenceRecord {
                    id: row.get("id"),
                    guild_id: row.get::<i64, _>("guild_id") as u64,
                    actor_id: row.get::<i64, _>("actor_id") as u64,
                    kind: row.get::<String, _>("kind").parse()?,
                    payload: serde_json::from_str(row.get("payload"))?,
                    timestamp: parse_timestamp(row.get("timestamp"))?,
                })
            })
            .collect()
    }

    // ========== Action Log ==========

    /// Append an escalation result to the action log.
    pub async fn append_action(&self, action: &NewAction<'_>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO action_log (guild_id, actor_id, kind, target_id, target_name,
                outcome, detail, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(action.guild_id as i64)
        .bind(action.actor_id as i64)
        .bind(action.kind.as_str())
        .bind(action.target_id as i64)
        .bind(action.target_name)
        .bind(action.outcome)
        .bind(action.detail)
        .bind(format_timestamp(action.timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to append action: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// Newest actions for a guild.
    pub async fn recent_actions(&self, guild_id: u64, limit: u32) -> Result<Vec<ActionRecord>> {
        let rows = sqlx::query(
            "SELECT id, guild_id, actor_id, kind, target_id, target_name, outcome, detail, timestamp
             FROM action_log WHERE guild_id = ?
             ORDER BY timestamp DESC, id DESC
             LIMIT ?",
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to get action log: {}", e)))?;

        rows.iter()
            .map(|row| -> Result<ActionRecord> {
                Ok(ActionRecord {
                    id: row.get("id"),
                    guild_id: row.get::<i64, _>("guild_id") as u64,
                    actor_id: row.get::<i64, _>("actor_id") as u64,
                    kind: row.get::<String, _>("kind").parse()?,
                    target_id: row.get::<i64, _>("target_id") as u64,
                    target_name: row.get("target_name"),
                    outcome: row.get("outcome"),
                    detail: row.get("detail"),
                    timestamp: parse_timestamp(row.get("timestamp"))?,
                })
            })
            .collect()
    }

    // ========== Structure Backups ==========

    /// Store a structure snapshot and return its id.
    pub async fn insert_backup(
        &self,
        guild_id: u64,
        checksum: &str,
        payload: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO structure_backups (guild_id, checksum, payload, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(guild_id as i64)
        .bind(checksum)
        .bind(payload)
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to store backup: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// Newest snapshots for a guild.
    pub async fn list_backups(&self, guild_id: u64, limit: u32) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(
            "SELECT id, guild_id, checksum, payload, created_at
             FROM structure_backups WHERE guild_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to list backups: {}", e)))?;

        rows.iter().map(backup_from_row).collect()
    }

    pub async fn count_backups(&self, guild_id: u64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM structure_backups WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| GuardianError::Database(format!("Failed to count backups: {}", e)))?;

        Ok(count as u64)
    }

    /// Fetch one snapshot, scoped to its guild.
    pub async fn get_backup(&self, guild_id: u64, backup_id: i64) -> Result<Option<BackupRecord>> {
        let row = sqlx::query(
            "SELECT id, guild_id, checksum, payload, created_at
             FROM structure_backups WHERE guild_id = ? AND id = ?",
        )
        .bind(guild_id as i64)
        .bind(backup_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GuardianError::Database(format!("Failed to get backup: {}", e)))?;

        row.as_ref().map(backup_from_row).transpose()
    }
}

fn community_config_from_row(row: &SqliteRow) -> Result<CommunityConfig> {
    Ok(CommunityConfig {
        guild_id: row.get::<i64, _>("guild_id") as u64,
        log_channel_id: row.get::<Option<i64>, _>("log_channel_id").map(|id| id as u64),
        thresholds: serde_json::from_str(row.get("thresholds"))?,
        exempt_users: serde_json::from_str(row.get("exempt_users"))?,
        exempt_bots: serde_json::from_str(row.get("exempt_bots"))?,
        alert_targets: serde_json::from_str(row.get("alert_targets"))?,
        isolation_role_id: row
            .get::<Option<i64>, _>("isolation_role_id")
            .map(|id| id as u64),
        auto_isolate: row.get("auto_isolate"),
        isolated_actors: serde_json::from_str(row.get("isolated_actors"))?,
        lockdown_active: row.get("lockdown_active"),
    })
}

fn backup_from_row(row: &SqliteRow) -> Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id"),
        guild_id: row.get::<i64, _>("guild_id") as u64,
        checksum: row.get("checksum"),
        payload: row.get("payload"),
        created_at: parse_timestamp(row.get("created_at"))?,
    })
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GuardianError::Database(format!("Invalid timestamp: {}", e)))
}

/// Database schema SQL.
const SCHEMA: &str = r#"
-- Per-guild protection settings; set-valued columns hold JSON arrays
CREATE TABLE IF NOT EXISTS community_config (
    guild_id INTEGER PRIMARY KEY,
    log_channel_id INTEGER,
    thresholds TEXT NOT NULL,
    exempt_users TEXT NOT NULL DEFAULT '[]',
    exempt_bots TEXT NOT NULL DEFAULT '[]',
    alert_targets TEXT NOT NULL DEFAULT '[]',
    isolation_role_id INTEGER,
    auto_isolate INTEGER NOT NULL DEFAULT 0,
    isolated_actors TEXT NOT NULL DEFAULT '[]',
    lockdown_active INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

-- Detections, append-only
CREATE TABLE IF NOT EXISTS evidence (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild_id INTEGER NOT NULL,
    actor_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

-- Actions taken by the bot, append-only
CREATE TABLE IF NOT EXISTS action_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild_id INTEGER NOT NULL,
    actor_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    target_name TEXT NOT NULL,
    outcome TEXT NOT NULL,
    detail TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

-- Role and channel snapshots
CREATE TABLE IF NOT EXISTS structure_backups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild_id INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_evidence_guild_time ON evidence(guild_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_evidence_guild_actor ON evidence(guild_id, actor_id);
CREATE INDEX IF NOT EXISTS idx_action_log_guild_time ON action_log(guild_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_action_log_guild_actor ON action_log(guild_id, actor_id);
CREATE INDEX IF NOT EXISTS idx_backups_guild_time ON structure_backups(guild_id, created_at DESC);
"#;
