//! Core data models for the Guardian bot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GuardianError;

/// Destructive action kinds that are tracked per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ChannelDelete,
    RoleDelete,
    MemberKick,
    MemberBan,
    BotJoin,
}

impl ActionKind {
    /// Every tracked kind, in display order.
    pub const ALL: [ActionKind; 5] = [
        Self::ChannelDelete,
        Self::RoleDelete,
        Self::MemberKick,
        Self::MemberBan,
        Self::BotJoin,
    ];

    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelDelete => "channel_delete",
            Self::RoleDelete => "role_delete",
            Self::MemberKick => "member_kick",
            Self::MemberBan => "member_ban",
            Self::BotJoin => "bot_join",
        }
    }

    /// Human label used in alert titles.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ChannelDelete => "Channel Deleted",
            Self::RoleDelete => "Role Deleted",
            Self::MemberKick => "Member Kicked",
            Self::MemberBan => "Member Banned",
            Self::BotJoin => "Bot Added",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = GuardianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                GuardianError::Config(format!(
                    "Invalid feature '{}'. Valid features: {}",
                    s,
                    Self::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

/// Rate policy for one action kind.
///
/// `count` and `window` are absent for kinds that only carry an enabled
/// flag (bot joins), which are treated as mass on every occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Lookback window in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<u64>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Threshold {
    /// Rate-limited threshold: `count` actions within `window` seconds.
    pub fn rate(count: u32, window: u64) -> Self {
        Self {
            count: Some(count),
            window: Some(window),
            enabled: true,
        }
    }

    /// Flag-only threshold.
    pub fn flag(enabled: bool) -> Self {
        Self {
            count: None,
            window: None,
            enabled,
        }
    }
}

/// Built-in thresholds applied to a guild with no stored configuration.
pub fn default_thresholds() -> BTreeMap<ActionKind, Threshold> {
    BTreeMap::from([
        (ActionKind::ChannelDelete, Threshold::rate(3, 60)),
        (ActionKind::RoleDelete, Threshold::rate(3, 60)),
        (ActionKind::MemberKick, Threshold::rate(5, 60)),
        (ActionKind::MemberBan, Threshold::rate(5, 60)),
        (ActionKind::BotJoin, Threshold::flag(true)),
    ])
}

/// Per-guild protection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub guild_id: u64,
    pub log_channel_id: Option<u64>,
    pub thresholds: BTreeMap<ActionKind, Threshold>,
    /// Users that never trigger detection.
    pub exempt_users: BTreeSet<u64>,
    /// Bots that may be added without a response.
    pub exempt_bots: BTreeSet<u64>,
    /// Users or roles that receive raid alerts by DM.
    pub alert_targets: BTreeSet<u64>,
    pub isolation_role_id: Option<u64>,
    pub auto_isolate: bool,
    /// Actors currently under lockdown. Only the lockdown manager writes this.
    pub isolated_actors: BTreeSet<u64>,
    /// Whether `@everyone` is denied sending in every text channel.
    #[serde(default)]
    pub lockdown_active: bool,
}

impl CommunityConfig {
    /// Create a config with built-in defaults.
    pub fn new(guild_id: u64, default_alert_targets: &[u64]) -> Self {
        Self {
            guild_id,
            log_channel_id: None,
            thresholds: default_thresholds(),
            exempt_users: BTreeSet::new(),
            exempt_bots: BTreeSet::new(),
            alert_targets: default_alert_targets.iter().copied().collect(),
            isolation_role_id: None,
            auto_isolate: false,
            isolated_actors: BTreeSet::new(),
            lockdown_active: false,
        }
    }

    /// Restore the default alert targets if the set was emptied.
    pub fn ensure_alert_targets(&mut self, defaults: &[u64]) {
        if self.alert_targets.is_empty() {
            self.alert_targets = defaults.iter().copied().collect();
        }
    }

    /// Whether events of this kind should be inspected at all.
    ///
    /// Kinds without a stored threshold count as enabled here; the detector
    /// still refuses to classify them as mass.
    pub fn is_enabled(&self, kind: ActionKind) -> bool {
        self.thresholds.get(&kind).map_or(true, |t| t.enabled)
    }

    pub fn threshold(&self, kind: ActionKind) -> Option<&Threshold> {
        self.thresholds.get(&kind)
    }

    /// Enable or disable a kind, creating a flag-only entry when missing.
    pub fn set_enabled(&mut self, kind: ActionKind, enabled: bool) {
        self.thresholds
            .entry(kind)
            .and_modify(|t| t.enabled = enabled)
            .or_insert_with(|| Threshold::flag(enabled));
    }

    pub fn is_exempt_user(&self, user_id: u64) -> bool {
        self.exempt_users.contains(&user_id)
    }
}

/// Kind of entity whose deletion is watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Channel,
    Role,
}

impl EntityKind {
    pub fn action_kind(&self) -> ActionKind {
        match self {
            Self::Channel => ActionKind::ChannelDelete,
            Self::Role => ActionKind::RoleDelete,
        }
    }
}

/// A raw gateway event relevant to raid protection.
#[derive(Debug, Clone)]
pub enum RawEvent {
    EntityDeleted {
        guild_id: u64,
        kind: EntityKind,
        entity_id: u64,
        name: String,
        observed_at: DateTime<Utc>,
    },
    MemberRemoved {
        guild_id: u64,
        member_id: u64,
        member_name: String,
        observed_at: DateTime<Utc>,
    },
    MemberAdded {
        guild_id: u64,
        member_id: u64,
        member_name: String,
        is_bot: bool,
        verified_bot: bool,
        observed_at: DateTime<Utc>,
    },
}

impl RawEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            Self::EntityDeleted { guild_id, .. }
            | Self::MemberRemoved { guild_id, .. }
            | Self::MemberAdded { guild_id, .. } => *guild_id,
        }
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        match self {
            Self::EntityDeleted { observed_at, .. }
            | Self::MemberRemoved { observed_at, .. }
            | Self::MemberAdded { observed_at, .. } => *observed_at,
        }
    }
}

/// One attributed entry from the guild audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub target_id: u64,
    pub actor_id: u64,
    pub actor_is_bot: bool,
    pub timestamp: DateTime<Utc>,
}

/// What an event acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub id: u64,
    pub name: String,
    /// Set for bot joins only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_bot: Option<bool>,
}

/// A classified, attributed action. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    pub guild_id: u64,
    pub actor_id: u64,
    pub kind: ActionKind,
    pub target: TargetDescriptor,
    pub is_mass: bool,
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    /// Evidence payload stored alongside the event.
    pub fn evidence_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "target_name": self.target.name,
            "target_id": self.target.id,
            "is_mass": self.is_mass,
        });
        if let Some(verified) = self.target.verified_bot {
            payload["verified"] = serde_json::Value::Bool(verified);
        }
        payload
    }
}

/// Result of an escalation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    None,
    Isolated,
    Removed,
    IsolationFailedThenRemoved,
    ActionFailed(String),
}

impl EscalationOutcome {
    /// Short label written to the action log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Isolated => "isolated",
            Self::Removed => "removed",
            Self::IsolationFailedThenRemoved => "isolation_failed_then_removed",
            Self::ActionFailed(_) => "action_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ActionFailed(_))
    }
}

/// Visual weight of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

/// Platform-neutral alert payload, rendered as an embed by the Discord layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub title: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
    pub severity: AlertSeverity,
}

impl AlertMessage {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            severity: AlertSeverity::Critical,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }
}
