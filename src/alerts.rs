//! Alert rendering and delivery.
//!
//! Raid alerts go by direct message to every configured alert target. A
//! target is a user or a role; roles are expanded to their members. Each
//! recipient is tried once, concurrently and independently of the others.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;

use crate::escalation::EscalationResult;
use crate::models::{ActionKind, AlertMessage, AlertSeverity, DetectionEvent, EscalationOutcome};
use crate::platform::{Platform, Recipient};

/// Delivery counts for one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Direct messages that went through.
    pub delivered: usize,
    /// Direct messages or recipient lookups that failed.
    pub failed: usize,
    /// Targets that are neither a user nor a role.
    pub unresolved: usize,
}

pub struct AlertFanout {
    platform: Arc<dyn Platform>,
}

impl AlertFanout {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// DM `alert` to every recipient behind `targets`.
    ///
    /// A user reachable through several targets is messaged once.
    pub async fn broadcast(
        &self,
        guild_id: u64,
        targets: &BTreeSet<u64>,
        alert: &AlertMessage,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();
        if targets.is_empty() {
            return report;
        }

        let community = self
            .platform
            .community_name(guild_id)
            .await
            .unwrap_or_else(|| "your server".to_string());
        let headline = format!("🚨 **RAID ALERT in {}** 🚨", community);

        let mut recipients = Vec::new();
        for &target_id in targets {
            match self.platform.resolve_recipient(guild_id, target_id).await {
                Ok(Recipient::Individual(user_id)) => recipients.push(user_id),
                Ok(Recipient::Group(members)) => recipients.extend(members),
                Ok(Recipient::Unresolvable) => {
                    tracing::warn!(guild_id, target_id, "Alert target is neither a user nor a role");
                    report.unresolved += 1;
                }
                Err(e) => {
                    tracing::warn!(guild_id, target_id, error = %e, "Failed to resolve alert target");
                    report.failed += 1;
                }
            }
        }

        let mut seen = HashSet::new();
        recipients.retain(|id| seen.insert(*id));

        let headline = &headline;
        let results = join_all(recipients.into_iter().map(|user_id| async move {
            (user_id, self.platform.send_direct(user_id, headline, alert).await)
        }))
        .await;

        for (user_id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(guild_id, user_id, error = %e, "Failed to deliver alert");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            guild_id,
            delivered = report.delivered,
            failed = report.failed,
            unresolved = report.unresolved,
            "Alert fan-out finished"
        );
        report
    }

    /// Post to the guild's log channel, if one is set. Returns whether it was posted.
    pub async fn post_log(&self, guild_id: u64, channel_id: Option<u64>, alert: &AlertMessage) -> bool {
        let Some(channel_id) = channel_id else {
            return false;
        };
        match self.platform.post_log(channel_id, alert).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(guild_id, channel_id, error = %e, "Failed to post to log channel");
                false
            }
        }
    }
}

fn target_label(kind: ActionKind) -> (&'static str, &'static str) {
    match kind {
        ActionKind::ChannelDelete => ("Channel", "Deleted by"),
        ActionKind::RoleDelete => ("Role", "Deleted by"),
        ActionKind::MemberKick => ("Member", "Kicked by"),
        ActionKind::MemberBan => ("Member", "Banned by"),
        ActionKind::BotJoin => ("Bot", "Added by"),
    }
}

/// Render a detection and its escalation as an alert.
pub fn detection_alert(event: &DetectionEvent, result: &EscalationResult) -> AlertMessage {
    let (noun, verb) = target_label(event.kind);

    let title = match (event.kind, event.target.verified_bot) {
        (ActionKind::BotJoin, Some(true)) => "Verified Bot Added".to_string(),
        (ActionKind::BotJoin, _) => "UNVERIFIED BOT ADDED - POTENTIAL RAID".to_string(),
        (kind, _) if event.is_mass => {
            format!("{} - RAID DETECTED", kind.label().to_uppercase())
        }
        (kind, _) => kind.label().to_string(),
    };

    let target = match event.kind {
        ActionKind::MemberKick | ActionKind::MemberBan | ActionKind::BotJoin => {
            format!("<@{}> ({})", event.target.id, event.target.id)
        }
        _ => event.target.name.clone(),
    };
    let description = format!(
        "**{}:** {}\n**{}:** <@{}> ({})",
        noun, target, verb, event.actor_id, event.actor_id
    );

    let severity = match event.kind {
        ActionKind::BotJoin => AlertSeverity::Warning,
        _ if event.is_mass => AlertSeverity::Critical,
        _ => AlertSeverity::Info,
    };

    let mut alert = AlertMessage::new(title, description).severity(severity);
    if let Some(verified) = event.target.verified_bot {
        alert = alert.field("Verified", if verified { "Yes" } else { "No" });
    }
    match &result.outcome {
        EscalationOutcome::None => {}
        EscalationOutcome::ActionFailed(_) => {
            alert = alert.field("Action Failed", result.detail.clone());
        }
        _ => {
            alert = alert.field("Action Taken", result.detail.clone());
        }
    }
    alert
}
