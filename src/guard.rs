//! Raid protection pipeline.
//!
//! raw event -> audit correlation -> exemption check -> mass-action
//! detection -> escalation -> evidence, action log, log channel, alerts.
//!
//! Correlation runs concurrently for all events. Everything after it runs on
//! the guild's lane, in the order the events were received.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::alerts::{detection_alert, AlertFanout, FanoutReport};
use crate::config::GuardianConfig;
use crate::correlator::AuditCorrelator;
use crate::database::NewAction;
use crate::detector::MassActionDetector;
use crate::error::ErrorContext;
use crate::escalation::{EscalationPolicy, EscalationResult};
use crate::lanes::CommunityLanes;
use crate::lockdown::LockdownManager;
use crate::models::{ActionKind, DetectionEvent, RawEvent, TargetDescriptor};
use crate::platform::Platform;
use crate::store::CommunityStore;

/// An attributed event waiting for detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub guild_id: u64,
    pub actor_id: u64,
    pub actor_is_bot: bool,
    pub kind: ActionKind,
    pub target: TargetDescriptor,
    pub observed_at: DateTime<Utc>,
}

/// Everything the pipeline did for one event.
#[derive(Debug, Clone)]
pub struct IncidentReport {
    pub event: DetectionEvent,
    pub escalation: EscalationResult,
    /// Present when alert recipients were messaged.
    pub fanout: Option<FanoutReport>,
    pub posted_to_log: bool,
}

/// Engine settings taken from process configuration.
#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub audit_lookback: u8,
    pub audit_delay: std::time::Duration,
    pub role_delete_always_notify: bool,
}

impl From<&GuardianConfig> for GuardSettings {
    fn from(config: &GuardianConfig) -> Self {
        Self {
            audit_lookback: config.audit_lookback,
            audit_delay: config.audit_delay,
            role_delete_always_notify: config.role_delete_always_notify,
        }
    }
}

pub struct RaidGuard {
    platform: Arc<dyn Platform>,
    store: Arc<CommunityStore>,
    detector: MassActionDetector,
    correlator: AuditCorrelator,
    lockdown: Arc<LockdownManager>,
    escalation: EscalationPolicy,
    alerts: AlertFanout,
    lanes: CommunityLanes,
    /// The bot's own user id, 0 until the gateway reports ready.
    self_id: AtomicU64,
}

impl RaidGuard {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<CommunityStore>,
        settings: GuardSettings,
    ) -> Self {
        let lockdown = Arc::new(LockdownManager::new(
            Arc::clone(&store),
            Arc::clone(&platform),
        ));
        Self {
            correlator: AuditCorrelator::new(
                Arc::clone(&platform),
                settings.audit_lookback,
                settings.audit_delay,
            ),
            escalation: EscalationPolicy::new(
                Arc::clone(&platform),
                Arc::clone(&lockdown),
                settings.role_delete_always_notify,
            ),
            alerts: AlertFanout::new(Arc::clone(&platform)),
            platform,
            detector: MassActionDetector::new(),
            lanes: CommunityLanes::new(),
            lockdown,
            store,
            self_id: AtomicU64::new(0),
        }
    }

    pub fn set_self_id(&self, user_id: u64) {
        self.self_id.store(user_id, Ordering::Relaxed);
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn store(&self) -> &Arc<CommunityStore> {
        &self.store
    }

    pub fn lockdown(&self) -> &Arc<LockdownManager> {
        &self.lockdown
    }

    pub fn detector(&self) -> &MassActionDetector {
        &self.detector
    }

    /// Start processing an event and return a handle to its outcome.
    ///
    /// The guild's lane slot is taken immediately, so detection follows
    /// receive order even though correlation finishes in any order.
    pub fn dispatch(self: &Arc<Self>, event: RawEvent) -> oneshot::Receiver<Option<IncidentReport>> {
        let guild_id = event.guild_id();
        let (candidate_tx, candidate_rx) = oneshot::channel::<Option<Candidate>>();
        let (report_tx, report_rx) = oneshot::channel();

        let departed = match &event {
            RawEvent::MemberRemoved { member_id, .. } => Some(*member_id),
            _ => None,
        };

        let guard = Arc::clone(self);
        let slot = self.lanes.submit(guild_id, async move {
            if let Some(member_id) = departed {
                guard.forget_departed(guild_id, member_id).await;
            }
            let report = match candidate_rx.await {
                Ok(Some(candidate)) => guard.apply(candidate).await,
                _ => None,
            };
            let _ = report_tx.send(report);
        });

        if let Err(e) = slot {
            e.log_with_context(&ErrorContext::new("dispatch").with_guild_id(guild_id));
            return report_rx;
        }

        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let candidate = guard.resolve(&event).await;
            let _ = candidate_tx.send(candidate);
        });

        report_rx
    }

    /// A member who left can no longer be unlocked; drop their isolation entry.
    async fn forget_departed(&self, guild_id: u64, member_id: u64) {
        if let Err(e) = self.lockdown.forget(guild_id, member_id).await {
            e.log_with_context(
                &ErrorContext::new("forget_departed")
                    .with_guild_id(guild_id)
                    .with_user_id(member_id),
            );
        }
    }

    /// Process an event and wait for the outcome.
    pub async fn handle(self: &Arc<Self>, event: RawEvent) -> Option<IncidentReport> {
        self.dispatch(event).await.ok().flatten()
    }

    /// Attribute a raw event to an actor.
    ///
    /// Returns `None` for events that cannot be attributed or need no
    /// attention (human joins, whitelisted bots, voluntary leaves).
    pub async fn resolve(&self, event: &RawEvent) -> Option<Candidate> {
        let guild_id = event.guild_id();
        let observed_at = event.observed_at();

        let (attribution, target) = match event {
            RawEvent::EntityDeleted {
                kind,
                entity_id,
                name,
                ..
            } => {
                let action = kind.action_kind();
                if !self.store.snapshot(guild_id).await.is_enabled(action) {
                    return None;
                }
                let attribution = self
                    .correlator
                    .correlate(guild_id, action, *entity_id)
                    .await
                    .found()?;
                let target = TargetDescriptor {
                    id: *entity_id,
                    name: name.clone(),
                    verified_bot: None,
                };
                (attribution, target)
            }
            RawEvent::MemberRemoved {
                member_id,
                member_name,
                ..
            } => {
                let attribution = self
                    .correlator
                    .correlate_removal(guild_id, *member_id)
                    .await
                    .found()?;
                let target = TargetDescriptor {
                    id: *member_id,
                    name: member_name.clone(),
                    verified_bot: None,
                };
                (attribution, target)
            }
            RawEvent::MemberAdded {
                member_id,
                member_name,
                is_bot,
                verified_bot,
                ..
            } => {
                if !is_bot {
                    return None;
                }
                let config = self.store.snapshot(guild_id).await;
                if !config.is_enabled(ActionKind::BotJoin) {
                    return None;
                }
                if config.exempt_bots.contains(member_id) {
                    tracing::debug!(guild_id, bot_id = member_id, "Whitelisted bot joined");
                    return None;
                }
                let attribution = self
                    .correlator
                    .correlate(guild_id, ActionKind::BotJoin, *member_id)
                    .await
                    .found()?;
                let target = TargetDescriptor {
                    id: *member_id,
                    name: member_name.clone(),
                    verified_bot: Some(*verified_bot),
                };
                (attribution, target)
            }
        };

        Some(Candidate {
            guild_id,
            actor_id: attribution.actor_id,
            actor_is_bot: attribution.actor_is_bot,
            kind: attribution.kind,
            target,
            observed_at,
        })
    }

    fn is_exempt(&self, config: &crate::models::CommunityConfig, candidate: &Candidate) -> bool {
        candidate.actor_is_bot
            || config.is_exempt_user(candidate.actor_id)
            || candidate.actor_id == self.self_id.load(Ordering::Relaxed)
    }

    /// Detection and response for an attributed event. Runs on the guild's lane.
    pub async fn apply(&self, candidate: Candidate) -> Option<IncidentReport> {
        let guild_id = candidate.guild_id;
        let config = self.store.snapshot(guild_id).await;

        if !config.is_enabled(candidate.kind) {
            return None;
        }
        if self.is_exempt(&config, &candidate) {
            tracing::debug!(
                guild_id,
                actor_id = candidate.actor_id,
                kind = %candidate.kind,
                "Exempt actor ignored"
            );
            return None;
        }

        let is_mass = self.detector.observe(
            &config,
            candidate.actor_id,
            candidate.kind,
            candidate.observed_at,
        );
        let event = DetectionEvent {
            guild_id,
            actor_id: candidate.actor_id,
            kind: candidate.kind,
            target: candidate.target,
            is_mass,
            timestamp: candidate.observed_at,
        };

        tracing::info!(
            guild_id,
            actor_id = event.actor_id,
            kind = %event.kind,
            target_id = event.target.id,
            is_mass,
            "Destructive action detected"
        );

        let db = self.store.database();
        if let Err(e) = db
            .append_evidence(
                guild_id,
                event.actor_id,
                event.kind,
                &event.evidence_payload(),
                event.timestamp,
            )
            .await
        {
            e.log_with_context(
                &ErrorContext::new("append_evidence")
                    .with_guild_id(guild_id)
                    .with_user_id(event.actor_id),
            );
        }

        let escalation = self.escalation.escalate(&config, &event).await;

        if let Err(e) = db
            .append_action(&NewAction {
                guild_id,
                actor_id: event.actor_id,
                kind: event.kind,
                target_id: event.target.id,
                target_name: &event.target.name,
                outcome: escalation.outcome.as_str(),
                detail: &escalation.detail,
                timestamp: Utc::now(),
            })
            .await
        {
            e.log_with_context(
                &ErrorContext::new("append_action")
                    .with_guild_id(guild_id)
                    .with_user_id(event.actor_id),
            );
        }

        let alert = detection_alert(&event, &escalation);
        let posted_to_log = self
            .alerts
            .post_log(guild_id, config.log_channel_id, &alert)
            .await;

        let fanout = if escalation.notify {
            Some(
                self.alerts
                    .broadcast(guild_id, &config.alert_targets, &alert)
                    .await,
            )
        } else {
            None
        };

        Some(IncidentReport {
            event,
            escalation,
            fanout,
            posted_to_log,
        })
    }
}
