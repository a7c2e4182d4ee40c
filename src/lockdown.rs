//! Per-actor isolation and server-wide lockdown.
//!
//! An isolated actor carries the guild's isolation role and is listed in
//! `CommunityConfig::isolated_actors`. This module is the only writer of
//! that set and of `CommunityConfig::lockdown_active`.

use std::sync::Arc;

use crate::error::{GuardianError, Result};
use crate::platform::Platform;
use crate::store::CommunityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Normal,
    Isolated,
}

pub struct LockdownManager {
    store: Arc<CommunityStore>,
    platform: Arc<dyn Platform>,
}

impl LockdownManager {
    pub fn new(store: Arc<CommunityStore>, platform: Arc<dyn Platform>) -> Self {
        Self { store, platform }
    }

    pub async fn state(&self, guild_id: u64, user_id: u64) -> LockState {
        if self
            .store
            .snapshot(guild_id)
            .await
            .isolated_actors
            .contains(&user_id)
        {
            LockState::Isolated
        } else {
            LockState::Normal
        }
    }

    /// Move an actor from `Normal` to `Isolated`.
    ///
    /// The role is granted on every call, so isolating an already isolated
    /// actor restores a role that was taken off by hand. On
    /// [`GuardianError::ConfigPersistFailed`] the actor is isolated in
    /// memory and on Discord, only the save is missing.
    pub async fn isolate(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        let config = self.store.snapshot(guild_id).await;
        let role_id = config
            .isolation_role_id
            .ok_or(GuardianError::NotConfigured { guild_id })?;

        if !self.platform.is_member(guild_id, user_id).await? {
            return Err(GuardianError::ActorNotPresent { user_id });
        }

        self.platform
            .apply_isolation_marker(guild_id, user_id, role_id, reason)
            .await?;

        if config.isolated_actors.contains(&user_id) {
            tracing::debug!(guild_id, user_id, role_id, "Isolation role re-applied");
            return Ok(());
        }

        self.store
            .update(guild_id, |c| c.isolated_actors.insert(user_id))
            .await?;

        tracing::info!(guild_id, user_id, role_id, "Actor isolated");
        Ok(())
    }

    /// Move an actor back to `Normal`.
    ///
    /// An actor who already left the guild is reported as
    /// [`GuardianError::ActorNotPresent`] and nothing changes; their entry
    /// goes away through [`LockdownManager::forget`] when the leave is seen.
    pub async fn unlock(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        let config = self.store.snapshot(guild_id).await;
        let role_id = config
            .isolation_role_id
            .ok_or(GuardianError::NotConfigured { guild_id })?;

        if !self.platform.is_member(guild_id, user_id).await? {
            return Err(GuardianError::ActorNotPresent { user_id });
        }

        self.platform
            .clear_isolation_marker(guild_id, user_id, role_id, reason)
            .await?;

        self.store
            .update(guild_id, |c| c.isolated_actors.remove(&user_id))
            .await?;

        tracing::info!(guild_id, user_id, role_id, "Actor unlocked");
        Ok(())
    }

    /// Drop a member who left the guild from the isolated set.
    ///
    /// Returns whether an entry was removed.
    pub async fn forget(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        if !self
            .store
            .snapshot(guild_id)
            .await
            .isolated_actors
            .contains(&user_id)
        {
            return Ok(false);
        }

        let removed = self
            .store
            .update(guild_id, |c| c.isolated_actors.remove(&user_id))
            .await?;
        if removed {
            tracing::info!(guild_id, user_id, "Isolated actor left the server");
        }
        Ok(removed)
    }

    /// Deny `@everyone` from sending messages in every text channel.
    ///
    /// Returns the number of channels locked, or `None` when the server is
    /// already locked down.
    pub async fn lock_server(&self, guild_id: u64, reason: &str) -> Result<Option<usize>> {
        if self.store.snapshot(guild_id).await.lockdown_active {
            return Ok(None);
        }

        let locked = self.platform.lock_text_channels(guild_id, reason).await?;
        self.store
            .update(guild_id, |c| c.lockdown_active = true)
            .await?;

        tracing::warn!(guild_id, channels = locked, "Server locked down");
        Ok(Some(locked))
    }

    /// Lift a server lockdown.
    ///
    /// Returns the number of channels unlocked, or `None` when the server
    /// was not locked down.
    pub async fn unlock_server(&self, guild_id: u64, reason: &str) -> Result<Option<usize>> {
        if !self.store.snapshot(guild_id).await.lockdown_active {
            return Ok(None);
        }

        let unlocked = self.platform.unlock_text_channels(guild_id, reason).await?;
        self.store
            .update(guild_id, |c| c.lockdown_active = false)
            .await?;

        tracing::info!(guild_id, channels = unlocked, "Server lockdown lifted");
        Ok(Some(unlocked))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::database::Database;
    use crate::error::GuardianError;
    use crate::lockdown::{LockState, LockdownManager};
    use crate::store::CommunityStore;
    use crate::test_support::{Call, FakePlatform, TEXT_CHANNELS};

    const GUILD: u64 = 12345;
    const ROLE: u64 = 900;

    async fn setup(with_role: bool) -> (LockdownManager, Arc<CommunityStore>, FakePlatform) {
        let db = Database::in_memory().await.expect("should create db");
        let store = Arc::new(CommunityStore::new(db, vec![1]));
        if with_role {
            store
                .update(GUILD, |c| c.isolation_role_id = Some(ROLE))
                .await
                .expect("configure role");
        }
        let fake = FakePlatform::new();
        let manager = LockdownManager::new(Arc::clone(&store), Arc::new(fake.clone()));
        (manager, store, fake)
    }

    #[tokio::test]
    async fn isolate_without_role_is_not_configured() {
        let (manager, store, fake) = setup(false).await;

        let result = manager.isolate(GUILD, 7, "test").await;

        assert!(matches!(result, Err(GuardianError::NotConfigured { guild_id: GUILD })));
        assert!(store.snapshot(GUILD).await.isolated_actors.is_empty());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn isolate_then_unlock_round_trip() {
        let (manager, store, fake) = setup(true).await;

        manager.isolate(GUILD, 7, "raid").await.expect("isolate");
        assert_eq!(manager.state(GUILD, 7).await, LockState::Isolated);

        manager.unlock(GUILD, 7, "cleared").await.expect("unlock");
        assert_eq!(manager.state(GUILD, 7).await, LockState::Normal);

        let stored = store
            .database()
            .load_community_config(GUILD)
            .await
            .expect("load")
            .expect("saved");
        assert!(!stored.isolated_actors.contains(&7));
        assert_eq!(
            fake.calls(),
            vec![
                Call::Isolate { user_id: 7, role_id: ROLE },
                Call::Unisolate { user_id: 7, role_id: ROLE },
            ]
        );
    }

    #[tokio::test]
    async fn isolation_is_persisted() {
        let (manager, store, _fake) = setup(true).await;

        manager.isolate(GUILD, 7, "raid").await.expect("isolate");

        let stored = store
            .database()
            .load_community_config(GUILD)
            .await
            .expect("load")
            .expect("saved");
        assert!(stored.isolated_actors.contains(&7));
    }

    #[tokio::test]
    async fn second_isolation_reapplies_role() {
        let (manager, store, fake) = setup(true).await;

        manager.isolate(GUILD, 7, "raid").await.expect("first");
        manager.isolate(GUILD, 7, "raid").await.expect("second");

        let isolations = fake
            .calls()
            .into_iter()
            .filter(|c| *c == Call::Isolate { user_id: 7, role_id: ROLE })
            .count();
        assert_eq!(isolations, 2);
        assert_eq!(store.snapshot(GUILD).await.isolated_actors.len(), 1);
    }

    #[tokio::test]
    async fn listed_actor_without_role_gets_it_back() {
        let (manager, store, fake) = setup(true).await;
        store
            .update(GUILD, |c| c.isolated_actors.insert(7))
            .await
            .expect("seed");

        manager.isolate(GUILD, 7, "raid").await.expect("isolate");

        assert!(fake.calls().contains(&Call::Isolate { user_id: 7, role_id: ROLE }));
        assert_eq!(manager.state(GUILD, 7).await, LockState::Isolated);
    }

    #[tokio::test]
    async fn absent_actor_is_reported() {
        let (manager, store, fake) = setup(true).await;
        fake.remove_member(7);

        let result = manager.isolate(GUILD, 7, "raid").await;

        assert!(matches!(result, Err(GuardianError::ActorNotPresent { user_id: 7 })));
        assert!(store.snapshot(GUILD).await.isolated_actors.is_empty());
    }

    #[tokio::test]
    async fn failed_role_grant_leaves_state_normal() {
        let (manager, _store, fake) = setup(true).await;
        fake.fail_isolation();

        let result = manager.isolate(GUILD, 7, "raid").await;

        assert!(matches!(result, Err(GuardianError::PlatformCallFailed(_))));
        assert_eq!(manager.state(GUILD, 7).await, LockState::Normal);
    }

    #[tokio::test]
    async fn failed_role_removal_keeps_actor_isolated() {
        let (manager, _store, fake) = setup(true).await;
        manager.isolate(GUILD, 7, "raid").await.expect("isolate");
        fake.fail_clear();

        let result = manager.unlock(GUILD, 7, "cleared").await;

        assert!(matches!(result, Err(GuardianError::PlatformCallFailed(_))));
        assert_eq!(manager.state(GUILD, 7).await, LockState::Isolated);
    }

    #[tokio::test]
    async fn unlocking_departed_actor_changes_nothing() {
        let (manager, store, fake) = setup(true).await;
        manager.isolate(GUILD, 7, "raid").await.expect("isolate");
        fake.remove_member(7);

        let result = manager.unlock(GUILD, 7, "cleared").await;

        assert!(matches!(result, Err(GuardianError::ActorNotPresent { user_id: 7 })));
        assert_eq!(manager.state(GUILD, 7).await, LockState::Isolated);
        assert!(!fake.calls().iter().any(|c| matches!(c, Call::Unisolate { .. })));
        let stored = store
            .database()
            .load_community_config(GUILD)
            .await
            .expect("load")
            .expect("saved");
        assert!(stored.isolated_actors.contains(&7));
    }

    #[tokio::test]
    async fn forget_clears_departed_actor() {
        let (manager, store, _fake) = setup(true).await;
        manager.isolate(GUILD, 7, "raid").await.expect("isolate");

        assert!(manager.forget(GUILD, 7).await.expect("forget"));
        assert!(!manager.forget(GUILD, 7).await.expect("again"));

        let stored = store
            .database()
            .load_community_config(GUILD)
            .await
            .expect("load")
            .expect("saved");
        assert!(!stored.isolated_actors.contains(&7));
    }

    #[tokio::test]
    async fn server_lockdown_round_trip() {
        let (manager, store, fake) = setup(false).await;

        assert_eq!(manager.unlock_server(GUILD, "calm").await.expect("unlock"), None);

        assert_eq!(manager.lock_server(GUILD, "raid").await.expect("lock"), Some(TEXT_CHANNELS));
        assert!(store.snapshot(GUILD).await.lockdown_active);
        assert_eq!(manager.lock_server(GUILD, "raid").await.expect("again"), None);

        assert_eq!(manager.unlock_server(GUILD, "calm").await.expect("unlock"), Some(TEXT_CHANNELS));
        assert!(!store.snapshot(GUILD).await.lockdown_active);
        assert_eq!(fake.calls(), vec![Call::LockChannels, Call::UnlockChannels]);

        let stored = store
            .database()
            .load_community_config(GUILD)
            .await
            .expect("load")
            .expect("saved");
        assert!(!stored.lockdown_active);
    }

    #[tokio::test]
    async fn failed_channel_lock_leaves_flag_clear() {
        let (manager, store, fake) = setup(false).await;
        fake.fail_channel_locks();

        let result = manager.lock_server(GUILD, "raid").await;

        assert!(matches!(result, Err(GuardianError::PlatformCallFailed(_))));
        assert!(!store.snapshot(GUILD).await.lockdown_active);
    }

    #[tokio::test]
    async fn persist_failure_keeps_isolation_in_memory() {
        let (manager, store, _fake) = setup(true).await;
        sqlx::query("DROP TABLE community_config")
            .execute(store.database().pool())
            .await
            .expect("drop");

        let result = manager.isolate(GUILD, 7, "raid").await;

        assert!(matches!(result, Err(GuardianError::ConfigPersistFailed(_))));
        assert_eq!(manager.state(GUILD, 7).await, LockState::Isolated);
    }
}
