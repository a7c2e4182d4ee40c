//! Graduated response to mass actions.
//!
//! One policy covers every action kind. What differs per kind (audit
//! reason, whether a total failure is still announced) lives in
//! [`KindPolicy`].

use std::sync::Arc;

use crate::lockdown::LockdownManager;
use crate::models::{ActionKind, CommunityConfig, DetectionEvent, EscalationOutcome};
use crate::platform::Platform;

/// Per-kind escalation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPolicy {
    /// Reason attached to the ban or kick in the audit log.
    pub reason: &'static str,
    /// Alert recipients are messaged even when every response failed.
    pub notify_on_failure: bool,
}

/// Build the policy for `kind`.
///
/// Role deletions keep alerting on failure while `role_delete_always_notify`
/// is set; bot joins always alert.
pub fn kind_policy(kind: ActionKind, role_delete_always_notify: bool) -> KindPolicy {
    match kind {
        ActionKind::ChannelDelete => KindPolicy {
            reason: "Anti-Raid: Mass channel deletion detected",
            notify_on_failure: false,
        },
        ActionKind::RoleDelete => KindPolicy {
            reason: "Anti-Raid: Mass role deletion detected",
            notify_on_failure: role_delete_always_notify,
        },
        ActionKind::MemberKick => KindPolicy {
            reason: "Anti-Raid: Mass kick detected",
            notify_on_failure: false,
        },
        ActionKind::MemberBan => KindPolicy {
            reason: "Anti-Raid: Mass ban detected",
            notify_on_failure: false,
        },
        ActionKind::BotJoin => KindPolicy {
            reason: "Anti-Raid: Unverified bot added",
            notify_on_failure: true,
        },
    }
}

/// What escalation did and whether alert recipients should hear about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationResult {
    pub outcome: EscalationOutcome,
    /// Human-readable summary for the action log and alert embed.
    pub detail: String,
    pub notify: bool,
}

impl EscalationResult {
    fn new(outcome: EscalationOutcome, detail: impl Into<String>, notify: bool) -> Self {
        Self {
            outcome,
            detail: detail.into(),
            notify,
        }
    }

    fn nothing() -> Self {
        Self::new(EscalationOutcome::None, "None", false)
    }
}

pub struct EscalationPolicy {
    platform: Arc<dyn Platform>,
    lockdown: Arc<LockdownManager>,
    role_delete_always_notify: bool,
}

impl EscalationPolicy {
    pub fn new(
        platform: Arc<dyn Platform>,
        lockdown: Arc<LockdownManager>,
        role_delete_always_notify: bool,
    ) -> Self {
        Self {
            platform,
            lockdown,
            role_delete_always_notify,
        }
    }

    pub fn policy(&self, kind: ActionKind) -> KindPolicy {
        kind_policy(kind, self.role_delete_always_notify)
    }

    /// Respond to a detection. Never fails; failures become
    /// [`EscalationOutcome::ActionFailed`].
    ///
    /// Exemptions are checked before detection, so `event.actor_id` is
    /// assumed to be a legitimate target here.
    pub async fn escalate(&self, config: &CommunityConfig, event: &DetectionEvent) -> EscalationResult {
        if !event.is_mass {
            return EscalationResult::nothing();
        }

        let policy = self.policy(event.kind);
        let result = match event.kind {
            ActionKind::BotJoin => self.remove_bot(event, policy).await,
            _ => self.punish_actor(config, event, policy).await,
        };

        tracing::info!(
            guild_id = event.guild_id,
            actor_id = event.actor_id,
            kind = %event.kind,
            outcome = result.outcome.as_str(),
            notify = result.notify,
            "Escalation finished"
        );
        result
    }

    /// Isolate first when the guild asks for it, ban otherwise or as fallback.
    async fn punish_actor(
        &self,
        config: &CommunityConfig,
        event: &DetectionEvent,
        policy: KindPolicy,
    ) -> EscalationResult {
        let guild_id = event.guild_id;
        let actor_id = event.actor_id;

        if config.auto_isolate && config.isolation_role_id.is_some() {
            let isolation_error = match self.lockdown.isolate(guild_id, actor_id, policy.reason).await {
                Ok(()) => {
                    return EscalationResult::new(
                        EscalationOutcome::Isolated,
                        format!("User <@{}> has been LOCKED DOWN", actor_id),
                        true,
                    );
                }
                Err(e) => e,
            };

            tracing::warn!(guild_id, actor_id, error = %isolation_error, "Isolation failed, banning instead");

            return match self.platform.ban(guild_id, actor_id, policy.reason).await {
                Ok(()) => EscalationResult::new(
                    EscalationOutcome::IsolationFailedThenRemoved,
                    format!(
                        "Lockdown failed ({}), user <@{}> has been BANNED",
                        isolation_error, actor_id
                    ),
                    true,
                ),
                Err(ban_error) => {
                    let reason = format!(
                        "Lockdown failed: {}; ban also failed: {}",
                        isolation_error, ban_error
                    );
                    EscalationResult::new(
                        EscalationOutcome::ActionFailed(reason.clone()),
                        reason,
                        policy.notify_on_failure,
                    )
                }
            };
        }

        match self.platform.ban(guild_id, actor_id, policy.reason).await {
            Ok(()) => EscalationResult::new(
                EscalationOutcome::Removed,
                format!("User <@{}> has been BANNED immediately", actor_id),
                true,
            ),
            Err(e) => {
                let reason = format!("Ban failed: {}", e);
                EscalationResult::new(
                    EscalationOutcome::ActionFailed(reason.clone()),
                    reason,
                    policy.notify_on_failure,
                )
            }
        }
    }

    /// Bot joins target the added bot; verified bots are only reported.
    async fn remove_bot(&self, event: &DetectionEvent, policy: KindPolicy) -> EscalationResult {
        let bot_id = event.target.id;

        if event.target.verified_bot == Some(true) {
            return EscalationResult::new(EscalationOutcome::None, "Alert sent", true);
        }

        match self.platform.kick(event.guild_id, bot_id, policy.reason).await {
            Ok(()) => EscalationResult::new(
                EscalationOutcome::Removed,
                format!("Bot <@{}> has been KICKED", bot_id),
                true,
            ),
            Err(e) => {
                let reason = format!("Kick failed: {}", e);
                EscalationResult::new(
                    EscalationOutcome::ActionFailed(reason.clone()),
                    reason,
                    policy.notify_on_failure,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::database::Database;
    use crate::escalation::{kind_policy, EscalationPolicy};
    use crate::lockdown::LockdownManager;
    use crate::models::{ActionKind, CommunityConfig, DetectionEvent, EscalationOutcome, TargetDescriptor};
    use crate::store::CommunityStore;
    use crate::test_support::{Call, FakePlatform};

    const GUILD: u64 = 12345;
    const ACTOR: u64 = 7;
    const ROLE: u64 = 900;

    struct Harness {
        policy: EscalationPolicy,
        store: Arc<CommunityStore>,
        fake: FakePlatform,
    }

    async fn harness(auto_isolate: bool, role_delete_always_notify: bool) -> Harness {
        let db = Database::in_memory().await.expect("should create db");
        let store = Arc::new(CommunityStore::new(db, vec![1]));
        if auto_isolate {
            store
                .update(GUILD, |c| {
                    c.auto_isolate = true;
                    c.isolation_role_id = Some(ROLE);
                })
                .await
                .expect("configure");
        }
        let fake = FakePlatform::new();
        let platform: Arc<dyn crate::platform::Platform> = Arc::new(fake.clone());
        let lockdown = Arc::new(LockdownManager::new(Arc::clone(&store), Arc::clone(&platform)));
        Harness {
            policy: EscalationPolicy::new(platform, lockdown, role_delete_always_notify),
            store,
            fake,
        }
    }

    fn event(kind: ActionKind, is_mass: bool) -> DetectionEvent {
        DetectionEvent {
            guild_id: GUILD,
            actor_id: ACTOR,
            kind,
            target: TargetDescriptor {
                id: 500,
                name: "general".to_string(),
                verified_bot: None,
            },
            is_mass,
            timestamp: Utc::now(),
        }
    }

    fn bot_event(verified: bool) -> DetectionEvent {
        let mut event = event(ActionKind::BotJoin, true);
        event.target = TargetDescriptor {
            id: 600,
            name: "nuker#0001".to_string(),
            verified_bot: Some(verified),
        };
        event
    }

    async fn config(h: &Harness) -> CommunityConfig {
        h.store.snapshot(GUILD).await
    }

    #[test]
    fn role_deletion_notifies_on_failure_only_when_flagged() {
        assert!(kind_policy(ActionKind::RoleDelete, true).notify_on_failure);
        assert!(!kind_policy(ActionKind::RoleDelete, false).notify_on_failure);
        assert!(!kind_policy(ActionKind::ChannelDelete, true).notify_on_failure);
        assert!(!kind_policy(ActionKind::MemberKick, true).notify_on_failure);
        assert!(!kind_policy(ActionKind::MemberBan, true).notify_on_failure);
        assert!(kind_policy(ActionKind::BotJoin, false).notify_on_failure);
    }

    #[tokio::test]
    async fn non_mass_event_does_nothing() {
        let h = harness(false, true).await;
        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::ChannelDelete, false))
            .await;

        assert_eq!(result.outcome, EscalationOutcome::None);
        assert!(!result.notify);
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn mass_event_bans_actor() {
        let h = harness(false, true).await;
        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::ChannelDelete, true))
            .await;

        assert_eq!(result.outcome, EscalationOutcome::Removed);
        assert!(result.notify);
        assert_eq!(h.fake.calls(), vec![Call::Ban(ACTOR)]);
    }

    #[tokio::test]
    async fn failed_ban_is_silent_for_channel_deletion() {
        let h = harness(false, true).await;
        h.fake.fail_ban();

        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::ChannelDelete, true))
            .await;

        assert!(result.outcome.is_failure());
        assert!(!result.notify);
    }

    #[tokio::test]
    async fn failed_ban_still_notifies_for_role_deletion() {
        let h = harness(false, true).await;
        h.fake.fail_ban();

        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::RoleDelete, true))
            .await;

        assert!(result.outcome.is_failure());
        assert!(result.notify);
    }

    #[tokio::test]
    async fn auto_isolate_prefers_lockdown() {
        let h = harness(true, true).await;
        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::MemberKick, true))
            .await;

        assert_eq!(result.outcome, EscalationOutcome::Isolated);
        assert!(result.notify);
        assert!(h.store.snapshot(GUILD).await.isolated_actors.contains(&ACTOR));
        assert!(!h.fake.calls().contains(&Call::Ban(ACTOR)));
    }

    #[tokio::test]
    async fn listed_actor_is_isolated_again() {
        let h = harness(true, true).await;
        h.store
            .update(GUILD, |c| c.isolated_actors.insert(ACTOR))
            .await
            .expect("seed");

        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::ChannelDelete, true))
            .await;

        assert_eq!(result.outcome, EscalationOutcome::Isolated);
        assert_eq!(
            h.fake.calls(),
            vec![Call::Isolate { user_id: ACTOR, role_id: ROLE }]
        );
    }

    #[tokio::test]
    async fn failed_isolation_falls_back_to_ban() {
        let h = harness(true, true).await;
        h.fake.fail_isolation();

        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::ChannelDelete, true))
            .await;

        assert_eq!(result.outcome, EscalationOutcome::IsolationFailedThenRemoved);
        assert!(result.notify);
        assert!(h.fake.calls().contains(&Call::Ban(ACTOR)));
    }

    #[tokio::test]
    async fn isolation_and_ban_both_failing_is_action_failed() {
        let h = harness(true, true).await;
        h.fake.fail_isolation();
        h.fake.fail_ban();

        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::ChannelDelete, true))
            .await;

        assert!(matches!(result.outcome, EscalationOutcome::ActionFailed(_)));
        assert!(!result.notify);
    }

    #[tokio::test]
    async fn auto_isolate_without_role_bans_directly() {
        let h = harness(false, true).await;
        h.store
            .update(GUILD, |c| c.auto_isolate = true)
            .await
            .expect("configure");

        let result = h
            .policy
            .escalate(&config(&h).await, &event(ActionKind::MemberBan, true))
            .await;

        assert_eq!(result.outcome, EscalationOutcome::Removed);
        assert_eq!(h.fake.calls(), vec![Call::Ban(ACTOR)]);
    }

    #[tokio::test]
    async fn unverified_bot_is_kicked() {
        let h = harness(true, true).await;
        let result = h.policy.escalate(&config(&h).await, &bot_event(false)).await;

        assert_eq!(result.outcome, EscalationOutcome::Removed);
        assert!(result.notify);
        assert_eq!(h.fake.calls(), vec![Call::Kick(600)]);
    }

    #[tokio::test]
    async fn verified_bot_is_only_reported() {
        let h = harness(false, true).await;
        let result = h.policy.escalate(&config(&h).await, &bot_event(true)).await;

        assert_eq!(result.outcome, EscalationOutcome::None);
        assert_eq!(result.detail, "Alert sent");
        assert!(result.notify);
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_bot_kick_still_notifies() {
        let h = harness(false, true).await;
        h.fake.fail_kick();

        let result = h.policy.escalate(&config(&h).await, &bot_event(false)).await;

        assert!(result.outcome.is_failure());
        assert!(result.notify);
    }
}
