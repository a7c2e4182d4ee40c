//! Mass-action detection.
//!
//! Tracks, per guild, actor and action kind, a sliding window of action
//! timestamps and decides whether the newest action crosses the guild's
//! threshold.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::{ActionKind, CommunityConfig};

/// Window length used when a threshold has a count but no window.
const FALLBACK_WINDOW_SECS: u64 = 60;

/// Timestamps of one actor's recent actions of one kind, oldest first.
#[derive(Debug, Default)]
struct ActionWindow {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl ActionWindow {
    /// Drop everything older than `cutoff`. The cutoff itself stays in the window.
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.timestamps.front().is_some_and(|t| *t < cutoff) {
            self.timestamps.pop_front();
        }
    }
}

/// Per-actor sliding-window detector.
///
/// Windows are created on the first counted action and never removed; an
/// idle window is simply pruned to empty on its next use.
#[derive(Default)]
pub struct MassActionDetector {
    windows: DashMap<(u64, u64, ActionKind), ActionWindow>,
}

impl MassActionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action at `now` and report whether it is a mass action.
    ///
    /// - disabled or unconfigured kind: never mass, nothing recorded
    /// - enabled kind without a count: always mass, nothing recorded
    /// - otherwise: prune to `[now - window, now]`, append, compare with count
    pub fn observe(
        &self,
        config: &CommunityConfig,
        actor_id: u64,
        kind: ActionKind,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(threshold) = config.threshold(kind) else {
            return false;
        };
        if !threshold.enabled {
            return false;
        }
        let Some(count) = threshold.count else {
            return true;
        };

        let window_secs = threshold.window.unwrap_or(FALLBACK_WINDOW_SECS);
        let cutoff = i64::try_from(window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut entry = self
            .windows
            .entry((config.guild_id, actor_id, kind))
            .or_default();
        entry.prune(cutoff);
        entry.timestamps.push_back(now);

        let live = entry.timestamps.len();
        let is_mass = live >= count as usize;

        tracing::debug!(
            guild_id = config.guild_id,
            actor_id,
            kind = %kind,
            live,
            count,
            window_secs,
            is_mass,
            "Observed action"
        );

        is_mass
    }

    /// Number of timestamps currently stored for an actor, without pruning.
    pub fn window_len(&self, guild_id: u64, actor_id: u64, kind: ActionKind) -> usize {
        self.windows
            .get(&(guild_id, actor_id, kind))
            .map_or(0, |w| w.timestamps.len())
    }

    /// Whether an actor has ever had a window for this kind.
    pub fn has_window(&self, guild_id: u64, actor_id: u64, kind: ActionKind) -> bool {
        self.windows.contains_key(&(guild_id, actor_id, kind))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::detector::MassActionDetector;
    use crate::models::{ActionKind, CommunityConfig, Threshold};

    fn config_with(kind: ActionKind, threshold: Threshold) -> CommunityConfig {
        let mut config = CommunityConfig::new(12345, &[1]);
        config.thresholds.insert(kind, threshold);
        config
    }

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid") + Duration::seconds(secs)
    }

    #[test]
    fn third_action_within_window_is_mass() {
        let detector = MassActionDetector::new();
        let config = config_with(ActionKind::ChannelDelete, Threshold::rate(3, 60));

        assert!(!detector.observe(&config, 7, ActionKind::ChannelDelete, at(0)));
        assert!(!detector.observe(&config, 7, ActionKind::ChannelDelete, at(10)));
        assert!(detector.observe(&config, 7, ActionKind::ChannelDelete, at(20)));
    }

    #[test]
    fn old_actions_leave_the_window() {
        let detector = MassActionDetector::new();
        let config = config_with(ActionKind::ChannelDelete, Threshold::rate(3, 60));

        assert!(!detector.observe(&config, 7, ActionKind::ChannelDelete, at(0)));
        assert!(!detector.observe(&config, 7, ActionKind::ChannelDelete, at(30)));
        assert!(!detector.observe(&config, 7, ActionKind::ChannelDelete, at(90)));

        // t=0 pruned, t=30 sits exactly on the cutoff and stays
        assert_eq!(detector.window_len(12345, 7, ActionKind::ChannelDelete), 2);
    }

    #[test]
    fn count_of_one_fires_immediately() {
        let detector = MassActionDetector::new();
        let config = config_with(ActionKind::MemberBan, Threshold::rate(1, 60));

        assert!(detector.observe(&config, 7, ActionKind::MemberBan, at(0)));
    }

    #[test]
    fn flag_only_kind_is_always_mass_without_state() {
        let detector = MassActionDetector::new();
        let config = CommunityConfig::new(12345, &[1]);

        assert!(detector.observe(&config, 7, ActionKind::BotJoin, at(0)));
        assert!(detector.observe(&config, 7, ActionKind::BotJoin, at(1)));
        assert!(!detector.has_window(12345, 7, ActionKind::BotJoin));
    }

    #[test]
    fn disabled_kind_is_never_mass() {
        let detector = MassActionDetector::new();
        let mut config = config_with(ActionKind::RoleDelete, Threshold::rate(1, 60));
        config.set_enabled(ActionKind::RoleDelete, false);

        assert!(!detector.observe(&config, 7, ActionKind::RoleDelete, at(0)));
        assert!(!detector.has_window(12345, 7, ActionKind::RoleDelete));
    }

    #[test]
    fn unconfigured_kind_is_never_mass() {
        let detector = MassActionDetector::new();
        let mut config = CommunityConfig::new(12345, &[1]);
        config.thresholds.remove(&ActionKind::MemberKick);

        for i in 0..10 {
            assert!(!detector.observe(&config, 7, ActionKind::MemberKick, at(i)));
        }
        assert!(!detector.has_window(12345, 7, ActionKind::MemberKick));
    }

    #[test]
    fn windows_are_per_actor_and_kind() {
        let detector = MassActionDetector::new();
        let config = CommunityConfig::new(12345, &[1]);

        detector.observe(&config, 7, ActionKind::ChannelDelete, at(0));
        detector.observe(&config, 7, ActionKind::ChannelDelete, at(1));
        assert!(!detector.observe(&config, 8, ActionKind::ChannelDelete, at(2)));
        assert!(!detector.observe(&config, 7, ActionKind::RoleDelete, at(2)));
        assert!(detector.observe(&config, 7, ActionKind::ChannelDelete, at(2)));
    }

    #[test]
    fn guilds_are_isolated() {
        let detector = MassActionDetector::new();
        let guild_a = CommunityConfig::new(11111, &[1]);
        let guild_b = CommunityConfig::new(22222, &[1]);

        detector.observe(&guild_a, 7, ActionKind::RoleDelete, at(0));
        detector.observe(&guild_a, 7, ActionKind::RoleDelete, at(1));
        assert!(!detector.observe(&guild_b, 7, ActionKind::RoleDelete, at(2)));
        assert!(detector.observe(&guild_a, 7, ActionKind::RoleDelete, at(2)));
    }

    #[test]
    fn count_without_window_uses_fallback() {
        let detector = MassActionDetector::new();
        let config = config_with(
            ActionKind::ChannelDelete,
            Threshold {
                count: Some(2),
                window: None,
                enabled: true,
            },
        );

        assert!(!detector.observe(&config, 7, ActionKind::ChannelDelete, at(0)));
        assert!(!detector.observe(&config, 7, ActionKind::ChannelDelete, at(61)));
        assert!(detector.observe(&config, 7, ActionKind::ChannelDelete, at(100)));
    }
}
