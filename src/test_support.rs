//! In-memory platform used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serenity::async_trait;

use crate::backup::{ChannelSnapshot, RoleSnapshot, StructureSnapshot};
use crate::error::{GuardianError, Result};
use crate::models::{ActionKind, AlertMessage, AuditEntry};
use crate::platform::{Platform, Recipient, SecurityScan};

/// Text channels the fake reports as locked or unlocked.
pub const TEXT_CHANNELS: usize = 2;

/// A platform call observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Audit(ActionKind),
    Ban(u64),
    Kick(u64),
    Isolate { user_id: u64, role_id: u64 },
    Unisolate { user_id: u64, role_id: u64 },
    Direct(u64),
    Log(u64),
    LockChannels,
    UnlockChannels,
}

#[derive(Default)]
struct FakeState {
    audit: HashMap<ActionKind, Vec<AuditEntry>>,
    audit_fails: bool,
    absent_members: HashSet<u64>,
    fail_ban: bool,
    fail_kick: bool,
    fail_isolation: bool,
    fail_clear: bool,
    fail_channel_locks: bool,
    scan: SecurityScan,
    self_permissions: u64,
    failing_recipients: HashSet<u64>,
    groups: HashMap<u64, Vec<u64>>,
    unresolvable: HashSet<u64>,
    delay: Option<Duration>,
    calls: Vec<Call>,
    direct_messages: Vec<(u64, String, AlertMessage)>,
    log_posts: Vec<(u64, AlertMessage)>,
}

/// Scriptable [`Platform`]. Clones share state.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Newest-first audit entries returned for `kind`.
    pub fn set_audit(&self, kind: ActionKind, entries: Vec<AuditEntry>) {
        self.with_state(|s| {
            s.audit.insert(kind, entries);
        });
    }

    pub fn fail_audit(&self) {
        self.with_state(|s| s.audit_fails = true);
    }

    pub fn remove_member(&self, user_id: u64) {
        self.with_state(|s| {
            s.absent_members.insert(user_id);
        });
    }

    pub fn fail_ban(&self) {
        self.with_state(|s| s.fail_ban = true);
    }

    pub fn fail_kick(&self) {
        self.with_state(|s| s.fail_kick = true);
    }

    pub fn fail_isolation(&self) {
        self.with_state(|s| s.fail_isolation = true);
    }

    pub fn fail_clear(&self) {
        self.with_state(|s| s.fail_clear = true);
    }

    pub fn fail_channel_locks(&self) {
        self.with_state(|s| s.fail_channel_locks = true);
    }

    pub fn set_scan(&self, scan: SecurityScan) {
        self.with_state(|s| s.scan = scan);
    }

    pub fn set_self_permissions(&self, bits: u64) {
        self.with_state(|s| s.self_permissions = bits);
    }

    pub fn fail_recipient(&self, user_id: u64) {
        self.with_state(|s| {
            s.failing_recipients.insert(user_id);
        });
    }

    pub fn add_group(&self, role_id: u64, members: Vec<u64>) {
        self.with_state(|s| {
            s.groups.insert(role_id, members);
        });
    }

    pub fn make_unresolvable(&self, target_id: u64) {
        self.with_state(|s| {
            s.unresolvable.insert(target_id);
        });
    }

    pub fn set_delay(&self, delay: Duration) {
        self.with_state(|s| s.delay = Some(delay));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn direct_messages(&self) -> Vec<(u64, String, AlertMessage)> {
        self.with_state(|s| s.direct_messages.clone())
    }

    pub fn log_posts(&self) -> Vec<(u64, AlertMessage)> {
        self.with_state(|s| s.log_posts.clone())
    }

    async fn pause(&self) {
        let delay = self.with_state(|s| s.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, call: Call) {
        self.with_state(|s| s.calls.push(call));
    }
}

fn refused(what: &str) -> GuardianError {
    GuardianError::PlatformCallFailed(format!("{} refused: Missing Permissions", what))
}

#[async_trait]
impl Platform for FakePlatform {
    async fn recent_audit_entries(
        &self,
        _guild_id: u64,
        kind: ActionKind,
        limit: u8,
    ) -> Result<Vec<AuditEntry>> {
        self.pause().await;
        self.record(Call::Audit(kind));
        self.with_state(|s| {
            if s.audit_fails {
                return Err(refused("audit log"));
            }
            Ok(s.audit
                .get(&kind)
                .map(|entries| entries.iter().take(limit as usize).cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn is_member(&self, _guild_id: u64, user_id: u64) -> Result<bool> {
        self.pause().await;
        Ok(self.with_state(|s| !s.absent_members.contains(&user_id)))
    }

    async fn ban(&self, _guild_id: u64, user_id: u64, _reason: &str) -> Result<()> {
        self.pause().await;
        self.record(Call::Ban(user_id));
        if self.with_state(|s| s.fail_ban) {
            return Err(refused("ban"));
        }
        Ok(())
    }

    async fn kick(&self, _guild_id: u64, user_id: u64, _reason: &str) -> Result<()> {
        self.pause().await;
        self.record(Call::Kick(user_id));
        if self.with_state(|s| s.fail_kick) {
            return Err(refused("kick"));
        }
        Ok(())
    }

    async fn apply_isolation_marker(
        &self,
        _guild_id: u64,
        user_id: u64,
        role_id: u64,
        _reason: &str,
    ) -> Result<()> {
        self.pause().await;
        self.record(Call::Isolate { user_id, role_id });
        if self.with_state(|s| s.fail_isolation) {
            return Err(refused("add role"));
        }
        Ok(())
    }

    async fn clear_isolation_marker(
        &self,
        _guild_id: u64,
        user_id: u64,
        role_id: u64,
        _reason: &str,
    ) -> Result<()> {
        self.pause().await;
        self.record(Call::Unisolate { user_id, role_id });
        if self.with_state(|s| s.fail_clear) {
            return Err(refused("remove role"));
        }
        Ok(())
    }

    async fn resolve_recipient(&self, _guild_id: u64, target_id: u64) -> Result<Recipient> {
        self.pause().await;
        Ok(self.with_state(|s| {
            if s.unresolvable.contains(&target_id) {
                Recipient::Unresolvable
            } else if let Some(members) = s.groups.get(&target_id) {
                Recipient::Group(members.clone())
            } else {
                Recipient::Individual(target_id)
            }
        }))
    }

    async fn send_direct(&self, user_id: u64, headline: &str, alert: &AlertMessage) -> Result<()> {
        self.pause().await;
        self.record(Call::Direct(user_id));
        self.with_state(|s| {
            if s.failing_recipients.contains(&user_id) {
                return Err(refused("direct message"));
            }
            s.direct_messages
                .push((user_id, headline.to_string(), alert.clone()));
            Ok(())
        })
    }

    async fn post_log(&self, channel_id: u64, alert: &AlertMessage) -> Result<()> {
        self.pause().await;
        self.record(Call::Log(channel_id));
        self.with_state(|s| s.log_posts.push((channel_id, alert.clone())));
        Ok(())
    }

    async fn community_name(&self, _guild_id: u64) -> Option<String> {
        self.pause().await;
        Some("Test Server".to_string())
    }

    async fn structure_snapshot(&self, guild_id: u64) -> Result<StructureSnapshot> {
        self.pause().await;
        Ok(StructureSnapshot {
            guild_id,
            roles: vec![RoleSnapshot {
                id: 10,
                name: "Moderator".to_string(),
                permissions: 8,
                colour: 0x00ff00,
                position: 1,
            }],
            channels: vec![ChannelSnapshot {
                id: 20,
                name: "general".to_string(),
                kind: "text".to_string(),
                position: 0,
            }],
        })
    }

    async fn lock_text_channels(&self, _guild_id: u64, _reason: &str) -> Result<usize> {
        self.pause().await;
        self.record(Call::LockChannels);
        if self.with_state(|s| s.fail_channel_locks) {
            return Err(refused("channel lock"));
        }
        Ok(TEXT_CHANNELS)
    }

    async fn unlock_text_channels(&self, _guild_id: u64, _reason: &str) -> Result<usize> {
        self.pause().await;
        self.record(Call::UnlockChannels);
        if self.with_state(|s| s.fail_channel_locks) {
            return Err(refused("channel unlock"));
        }
        Ok(TEXT_CHANNELS)
    }

    async fn security_scan(&self, _guild_id: u64) -> Result<SecurityScan> {
        self.pause().await;
        Ok(self.with_state(|s| s.scan.clone()))
    }

    async fn self_permissions(&self, _guild_id: u64) -> Result<u64> {
        self.pause().await;
        Ok(self.with_state(|s| s.self_permissions))
    }
}
