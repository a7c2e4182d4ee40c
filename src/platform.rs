//! Boundary between the protection engine and the chat platform.
//!
//! Everything the engine asks of Discord goes through [`Platform`]. The
//! production implementation lives in [`crate::discord`]; tests use an
//! in-memory fake.

use std::future::Future;
use std::time::Duration;

use serenity::async_trait;

use crate::backup::StructureSnapshot;
use crate::error::{GuardianError, Result};
use crate::models::{ActionKind, AlertMessage, AuditEntry};

/// What an alert target id turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// A single user.
    Individual(u64),
    /// A role, expanded to its current members.
    Group(Vec<u64>),
    /// Neither a reachable user nor a role of the guild.
    Unresolvable,
}

/// Privileged members found by `/guard scan`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityScan {
    /// Human members holding the administrator permission.
    pub administrators: Vec<u64>,
    /// Bot members and whether Discord marks each one verified.
    pub bots: Vec<(u64, bool)>,
}

/// Platform operations used by correlation, escalation, lockdown and alerts.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Newest-first audit entries of one action kind, at most `limit`.
    async fn recent_audit_entries(
        &self,
        guild_id: u64,
        kind: ActionKind,
        limit: u8,
    ) -> Result<Vec<AuditEntry>>;

    async fn is_member(&self, guild_id: u64, user_id: u64) -> Result<bool>;

    /// Ban a user from the guild.
    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()>;

    /// Kick a member. Used for unverified bots.
    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()>;

    async fn apply_isolation_marker(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()>;

    async fn clear_isolation_marker(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()>;

    async fn resolve_recipient(&self, guild_id: u64, target_id: u64) -> Result<Recipient>;

    /// Direct message one user.
    async fn send_direct(&self, user_id: u64, headline: &str, alert: &AlertMessage) -> Result<()>;

    /// Post an alert into a guild channel.
    async fn post_log(&self, channel_id: u64, alert: &AlertMessage) -> Result<()>;

    /// Display name of the guild, if it can be fetched.
    async fn community_name(&self, guild_id: u64) -> Option<String>;

    async fn structure_snapshot(&self, guild_id: u64) -> Result<StructureSnapshot>;

    /// Deny `@everyone` the send permission in every text channel.
    ///
    /// Best effort per channel; returns how many were changed.
    async fn lock_text_channels(&self, guild_id: u64, reason: &str) -> Result<usize>;

    /// Undo [`Platform::lock_text_channels`]; returns how many were changed.
    async fn unlock_text_channels(&self, guild_id: u64, reason: &str) -> Result<usize>;

    async fn security_scan(&self, guild_id: u64) -> Result<SecurityScan>;

    /// Permission bits the bot holds in the guild.
    async fn self_permissions(&self, guild_id: u64) -> Result<u64>;
}

/// Run a platform call with an upper bound on its duration.
///
/// Elapsing is reported as [`GuardianError::PlatformCallFailed`].
pub async fn within<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GuardianError::PlatformCallFailed(format!(
            "{} timed out after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

/// Wraps a platform so every call is bounded by the same timeout.
pub struct TimedPlatform<P> {
    inner: P,
    limit: Duration,
}

impl<P: Platform> TimedPlatform<P> {
    pub fn new(inner: P, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<P: Platform> Platform for TimedPlatform<P> {
    async fn recent_audit_entries(
        &self,
        guild_id: u64,
        kind: ActionKind,
        limit: u8,
    ) -> Result<Vec<AuditEntry>> {
        within(
            self.limit,
            "audit query",
            self.inner.recent_audit_entries(guild_id, kind, limit),
        )
        .await
    }

    async fn is_member(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        within(
            self.limit,
            "member lookup",
            self.inner.is_member(guild_id, user_id),
        )
        .await
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        within(self.limit, "ban", self.inner.ban(guild_id, user_id, reason)).await
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        within(self.limit, "kick", self.inner.kick(guild_id, user_id, reason)).await
    }

    async fn apply_isolation_marker(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()> {
        within(
            self.limit,
            "add isolation role",
            self.inner
                .apply_isolation_marker(guild_id, user_id, role_id, reason),
        )
        .await
    }

    async fn clear_isolation_marker(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()> {
        within(
            self.limit,
            "remove isolation role",
            self.inner
                .clear_isolation_marker(guild_id, user_id, role_id, reason),
        )
        .await
    }

    async fn resolve_recipient(&self, guild_id: u64, target_id: u64) -> Result<Recipient> {
        within(
            self.limit,
            "resolve recipient",
            self.inner.resolve_recipient(guild_id, target_id),
        )
        .await
    }

    async fn send_direct(&self, user_id: u64, headline: &str, alert: &AlertMessage) -> Result<()> {
        within(
            self.limit,
            "direct message",
            self.inner.send_direct(user_id, headline, alert),
        )
        .await
    }

    async fn post_log(&self, channel_id: u64, alert: &AlertMessage) -> Result<()> {
        within(
            self.limit,
            "log channel post",
            self.inner.post_log(channel_id, alert),
        )
        .await
    }

    async fn community_name(&self, guild_id: u64) -> Option<String> {
        tokio::time::timeout(self.limit, self.inner.community_name(guild_id))
            .await
            .ok()
            .flatten()
    }

    async fn structure_snapshot(&self, guild_id: u64) -> Result<StructureSnapshot> {
        within(
            self.limit,
            "structure snapshot",
            self.inner.structure_snapshot(guild_id),
        )
        .await
    }

    async fn lock_text_channels(&self, guild_id: u64, reason: &str) -> Result<usize> {
        within(
            self.limit,
            "lock channels",
            self.inner.lock_text_channels(guild_id, reason),
        )
        .await
    }

    async fn unlock_text_channels(&self, guild_id: u64, reason: &str) -> Result<usize> {
        within(
            self.limit,
            "unlock channels",
            self.inner.unlock_text_channels(guild_id, reason),
        )
        .await
    }

    async fn security_scan(&self, guild_id: u64) -> Result<SecurityScan> {
        within(
            self.limit,
            "security scan",
            self.inner.security_scan(guild_id),
        )
        .await
    }

    async fn self_permissions(&self, guild_id: u64) -> Result<u64> {
        within(
            self.limit,
            "permission lookup",
            self.inner.self_permissions(guild_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::GuardianError;
    use crate::platform::{within, Platform, TimedPlatform};
    use crate::test_support::FakePlatform;

    #[tokio::test]
    async fn within_passes_through_results() {
        let value = within(Duration::from_secs(1), "noop", async { Ok(5) }).await;
        assert_eq!(value.ok(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn within_reports_timeout_as_platform_failure() {
        let result: crate::error::Result<()> = within(Duration::from_secs(10), "ban", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(GuardianError::PlatformCallFailed(msg)) => assert!(msg.contains("ban")),
            other => panic!("expected PlatformCallFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_platform_bounds_slow_calls() {
        let fake = FakePlatform::new();
        fake.set_delay(Duration::from_secs(30));
        let timed = TimedPlatform::new(fake, Duration::from_secs(10));

        let result = timed.ban(1, 2, "test").await;
        assert!(matches!(result, Err(GuardianError::PlatformCallFailed(_))));
        assert!(timed.community_name(1).await.is_none());
    }
}
