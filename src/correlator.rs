//! Attribution of raw events to the actor who caused them.
//!
//! Discord does not say who deleted a channel or removed a member; the
//! answer has to be read back from the audit log, which may lag behind the
//! gateway event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{ErrorContext, GuardianError};
use crate::models::{ActionKind, AuditEntry};
use crate::platform::Platform;

/// Who performed an action, as read from the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub actor_id: u64,
    pub actor_is_bot: bool,
    /// Action kind of the matching entry. Differs from the query only for
    /// member removals, where kick and ban are both searched.
    pub kind: ActionKind,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Found(Attribution),
    NotFound,
}

impl Correlation {
    pub fn found(self) -> Option<Attribution> {
        match self {
            Self::Found(attribution) => Some(attribution),
            Self::NotFound => None,
        }
    }
}

/// First entry, in the given newest-first order, whose target is `target_id`.
pub fn find_first(entries: &[AuditEntry], target_id: u64) -> Option<&AuditEntry> {
    entries.iter().find(|entry| entry.target_id == target_id)
}

pub struct AuditCorrelator {
    platform: Arc<dyn Platform>,
    lookback: u8,
    delay: Duration,
}

impl AuditCorrelator {
    /// `lookback` is the number of newest entries inspected, `delay` a wait
    /// applied before every audit query.
    pub fn new(platform: Arc<dyn Platform>, lookback: u8, delay: Duration) -> Self {
        Self {
            platform,
            lookback: lookback.max(1),
            delay,
        }
    }

    /// Find the actor behind an action of `kind` on `target_id`.
    ///
    /// Query failures count as a miss; nothing is retried.
    pub async fn correlate(&self, guild_id: u64, kind: ActionKind, target_id: u64) -> Correlation {
        self.wait_for_propagation().await;
        match self.lookup(guild_id, kind, target_id).await {
            Some(attribution) => Correlation::Found(attribution),
            None => {
                GuardianError::CorrelationMiss { target_id }.log_with_context(
                    &ErrorContext::new(format!("correlate {}", kind)).with_guild_id(guild_id),
                );
                Correlation::NotFound
            }
        }
    }

    /// Attribute a member removal, which may be either a kick or a ban.
    ///
    /// When both trails match, the newer entry wins; a tie goes to the ban.
    pub async fn correlate_removal(&self, guild_id: u64, member_id: u64) -> Correlation {
        self.wait_for_propagation().await;
        let (kick, ban) = tokio::join!(
            self.lookup(guild_id, ActionKind::MemberKick, member_id),
            self.lookup(guild_id, ActionKind::MemberBan, member_id),
        );

        let winner = match (kick, ban) {
            (Some(kick), Some(ban)) => Some(if kick.timestamp > ban.timestamp { kick } else { ban }),
            (kick, ban) => kick.or(ban),
        };

        match winner {
            Some(attribution) => Correlation::Found(attribution),
            None => {
                // Members leave on their own all the time; not worth a warning.
                tracing::debug!(guild_id, member_id, "Member removal has no audit entry");
                Correlation::NotFound
            }
        }
    }

    async fn wait_for_propagation(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn lookup(&self, guild_id: u64, kind: ActionKind, target_id: u64) -> Option<Attribution> {
        let entries = match self
            .platform
            .recent_audit_entries(guild_id, kind, self.lookback)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(guild_id, kind = %kind, error = %e, "Audit log query failed");
                return None;
            }
        };

        find_first(&entries, target_id).map(|entry| Attribution {
            actor_id: entry.actor_id,
            actor_is_bot: entry.actor_is_bot,
            kind,
            timestamp: entry.timestamp,
        })
    }
}
