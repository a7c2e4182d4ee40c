//! Discord implementation of [`Platform`].
//!
//! Thin translation layer over serenity's HTTP client. Ids cross the
//! boundary as plain `u64`; every serenity error becomes
//! [`GuardianError::PlatformCallFailed`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serenity::all::{
    ChannelAction, ChannelId, ChannelType, CreateEmbed, CreateMessage, GuildChannel, GuildId, Member,
    MemberAction, PermissionOverwrite, PermissionOverwriteType, Permissions, Role, RoleAction, RoleId,
    Timestamp, UserId, UserPublicFlags,
};
use serenity::model::guild::audit_log::Action;
use serenity::async_trait;
use serenity::http::{Http, HttpError};

use crate::backup::{ChannelSnapshot, RoleSnapshot, StructureSnapshot};
use crate::error::{GuardianError, Result};
use crate::models::{ActionKind, AlertMessage, AlertSeverity, AuditEntry};
use crate::platform::{Platform, Recipient, SecurityScan};

/// Page size for member listing, the API maximum.
const MEMBER_PAGE: u64 = 1000;

pub struct DiscordPlatform {
    http: Arc<Http>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    /// Every member of the guild, one API page at a time.
    async fn all_members(&self, guild_id: GuildId) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        let mut after = None;

        loop {
            let page = self
                .http
                .get_guild_members(guild_id, Some(MEMBER_PAGE), after)
                .await
                .map_err(|e| call_failed("list members", e))?;

            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.user.id.get());
            let full = page.len() as u64 == MEMBER_PAGE;
            members.extend(page);

            if !full {
                break;
            }
        }

        Ok(members)
    }

    /// Current members holding `role_id`.
    async fn role_members(&self, guild_id: GuildId, role_id: RoleId) -> Result<Vec<u64>> {
        Ok(self
            .all_members(guild_id)
            .await?
            .iter()
            .filter(|m| m.roles.contains(&role_id))
            .map(|m| m.user.id.get())
            .collect())
    }

    async fn text_channels(&self, guild_id: GuildId) -> Result<Vec<GuildChannel>> {
        Ok(self
            .http
            .get_channels(guild_id)
            .await
            .map_err(|e| call_failed("channel listing", e))?
            .into_iter()
            .filter(|c| c.kind == ChannelType::Text)
            .collect())
    }

    /// Rewrite the `@everyone` overwrite of each text channel.
    ///
    /// Failures are logged per channel and the rest carry on.
    async fn set_send_lock(&self, guild_id: u64, locked: bool, reason: &str) -> Result<usize> {
        let guild = GuildId::new(guild_id);
        let everyone = RoleId::new(guild_id);
        let mut changed = 0;

        for channel in self.text_channels(guild).await? {
            let existing = channel
                .permission_overwrites
                .iter()
                .find(|o| o.kind == PermissionOverwriteType::Role(everyone));
            let result = match everyone_overwrite(existing, everyone, locked) {
                Some(overwrite) => channel.id.create_permission(&self.http, overwrite).await,
                None => {
                    channel
                        .id
                        .delete_permission(&self.http, PermissionOverwriteType::Role(everyone))
                        .await
                }
            };
            match result {
                Ok(()) => changed += 1,
                Err(e) => tracing::warn!(
                    guild_id,
                    channel_id = channel.id.get(),
                    locked,
                    reason,
                    error = %e,
                    "Channel permission change failed"
                ),
            }
        }

        Ok(changed)
    }
}

/// The `@everyone` overwrite a channel should carry after locking or
/// unlocking, keeping every bit other than send messages.
///
/// `None` means the overwrite ends up empty and should be deleted.
pub fn everyone_overwrite(
    existing: Option<&PermissionOverwrite>,
    everyone: RoleId,
    locked: bool,
) -> Option<PermissionOverwrite> {
    let (mut allow, mut deny) = existing
        .map(|o| (o.allow, o.deny))
        .unwrap_or((Permissions::empty(), Permissions::empty()));

    allow.remove(Permissions::SEND_MESSAGES);
    if locked {
        deny.insert(Permissions::SEND_MESSAGES);
    } else {
        deny.remove(Permissions::SEND_MESSAGES);
    }

    if allow.is_empty() && deny.is_empty() {
        return None;
    }
    Some(PermissionOverwrite {
        allow,
        deny,
        kind: PermissionOverwriteType::Role(everyone),
    })
}

/// Combined permissions granted by `roles` to a member holding `held`.
///
/// The `@everyone` role (id equal to the guild id) always applies.
pub fn member_permissions(guild_id: u64, roles: &[Role], held: &[RoleId]) -> Permissions {
    roles
        .iter()
        .filter(|r| r.id.get() == guild_id || held.contains(&r.id))
        .fold(Permissions::empty(), |acc, r| acc | r.permissions)
}

/// Audit log action type queried for each kind.
pub fn audit_action(kind: ActionKind) -> Action {
    match kind {
        ActionKind::ChannelDelete => Action::Channel(ChannelAction::Delete),
        ActionKind::RoleDelete => Action::Role(RoleAction::Delete),
        ActionKind::MemberKick => Action::Member(MemberAction::Kick),
        ActionKind::MemberBan => Action::Member(MemberAction::BanAdd),
        ActionKind::BotJoin => Action::Member(MemberAction::BotAdd),
    }
}

/// Embed colour for a severity.
pub fn severity_colour(severity: AlertSeverity) -> u32 {
    match severity {
        AlertSeverity::Critical => 0xE74C3C,
        AlertSeverity::Warning => 0xE67E22,
        AlertSeverity::Info => 0x3498DB,
    }
}

fn render_embed(alert: &AlertMessage) -> CreateEmbed {
    alert.fields.iter().fold(
        CreateEmbed::new()
            .title(&alert.title)
            .description(&alert.description)
            .colour(severity_colour(alert.severity))
            .timestamp(Timestamp::now()),
        |embed, (name, value)| embed.field(name, value, false),
    )
}

fn call_failed(operation: &str, error: serenity::Error) -> GuardianError {
    GuardianError::PlatformCallFailed(format!("{}: {}", operation, error))
}

fn is_not_found(error: &serenity::Error) -> bool {
    matches!(
        error,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

fn to_datetime(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn recent_audit_entries(
        &self,
        guild_id: u64,
        kind: ActionKind,
        limit: u8,
    ) -> Result<Vec<AuditEntry>> {
        let logs = self
            .http
            .get_audit_logs(
                GuildId::new(guild_id),
                Some(audit_action(kind)),
                None,
                None,
                Some(limit),
            )
            .await
            .map_err(|e| call_failed("audit log query", e))?;

        let bots: HashMap<UserId, bool> = logs.users.iter().map(|(id, u)| (*id, u.bot)).collect();

        Ok(logs
            .entries
            .iter()
            .filter_map(|entry| {
                let target_id = entry.target_id?.get();
                Some(AuditEntry {
                    target_id,
                    actor_id: entry.user_id.get(),
                    actor_is_bot: bots.get(&entry.user_id).copied().unwrap_or(false),
                    timestamp: to_datetime(entry.id.created_at()),
                })
            })
            .collect())
    }

    async fn is_member(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        match self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(call_failed("member lookup", e)),
        }
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        self.http
            .ban_user(GuildId::new(guild_id), UserId::new(user_id), 0, Some(reason))
            .await
            .map_err(|e| call_failed("ban", e))?;

        tracing::info!(guild_id, user_id, "User banned");
        Ok(())
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        self.http
            .kick_member(GuildId::new(guild_id), UserId::new(user_id), Some(reason))
            .await
            .map_err(|e| call_failed("kick", e))?;

        tracing::info!(guild_id, user_id, "User kicked");
        Ok(())
    }

    async fn apply_isolation_marker(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()> {
        self.http
            .add_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(|e| call_failed("add isolation role", e))
    }

    async fn clear_isolation_marker(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<()> {
        self.http
            .remove_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(|e| call_failed("remove isolation role", e))
    }

    async fn resolve_recipient(&self, guild_id: u64, target_id: u64) -> Result<Recipient> {
        let guild = GuildId::new(guild_id);

        if self.http.get_member(guild, UserId::new(target_id)).await.is_ok() {
            return Ok(Recipient::Individual(target_id));
        }

        let roles = self
            .http
            .get_guild_roles(guild)
            .await
            .map_err(|e| call_failed("role lookup", e))?;
        let role_id = RoleId::new(target_id);
        if roles.iter().any(|r| r.id == role_id) {
            return Ok(Recipient::Group(self.role_members(guild, role_id).await?));
        }

        // Owners and admins may have left the guild but still take DMs.
        match self.http.get_user(UserId::new(target_id)).await {
            Ok(_) => Ok(Recipient::Individual(target_id)),
            Err(e) if is_not_found(&e) => Ok(Recipient::Unresolvable),
            Err(e) => Err(call_failed("user lookup", e)),
        }
    }

    async fn send_direct(&self, user_id: u64, headline: &str, alert: &AlertMessage) -> Result<()> {
        let channel = UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(|e| call_failed("open DM", e))?;

        channel
            .id
            .send_message(
                &self.http,
                CreateMessage::new().content(headline).embed(render_embed(alert)),
            )
            .await
            .map_err(|e| call_failed("send DM", e))?;
        Ok(())
    }

    async fn post_log(&self, channel_id: u64, alert: &AlertMessage) -> Result<()> {
        ChannelId::new(channel_id)
            .send_message(&self.http, CreateMessage::new().embed(render_embed(alert)))
            .await
            .map_err(|e| call_failed("log post", e))?;
        Ok(())
    }

    async fn community_name(&self, guild_id: u64) -> Option<String> {
        match self.http.get_guild(GuildId::new(guild_id)).await {
            Ok(guild) => Some(guild.name),
            Err(e) => {
                tracing::debug!(guild_id, error = %e, "Guild name lookup failed");
                None
            }
        }
    }

    async fn structure_snapshot(&self, guild_id: u64) -> Result<StructureSnapshot> {
        let guild = GuildId::new(guild_id);
        let roles = self
            .http
            .get_guild_roles(guild)
            .await
            .map_err(|e| call_failed("role listing", e))?;
        let channels = self
            .http
            .get_channels(guild)
            .await
            .map_err(|e| call_failed("channel listing", e))?;

        let mut roles: Vec<RoleSnapshot> = roles
            .into_iter()
            .map(|r| RoleSnapshot {
                id: r.id.get(),
                name: r.name,
                permissions: r.permissions.bits(),
                colour: r.colour.0,
                position: r.position,
            })
            .collect();
        roles.sort_by_key(|r| (r.position, r.id));

        let mut channels: Vec<ChannelSnapshot> = channels
            .into_iter()
            .map(|c| ChannelSnapshot {
                id: c.id.get(),
                name: c.name,
                kind: format!("{:?}", c.kind).to_lowercase(),
                position: c.position,
            })
            .collect();
        channels.sort_by_key(|c| (c.position, c.id));

        Ok(StructureSnapshot {
            guild_id,
            roles,
            channels,
        })
    }

    async fn lock_text_channels(&self, guild_id: u64, reason: &str) -> Result<usize> {
        self.set_send_lock(guild_id, true, reason).await
    }

    async fn unlock_text_channels(&self, guild_id: u64, reason: &str) -> Result<usize> {
        self.set_send_lock(guild_id, false, reason).await
    }

    async fn security_scan(&self, guild_id: u64) -> Result<SecurityScan> {
        let guild = GuildId::new(guild_id);
        let roles = self
            .http
            .get_guild_roles(guild)
            .await
            .map_err(|e| call_failed("role listing", e))?;

        let mut scan = SecurityScan::default();
        for member in self.all_members(guild).await? {
            let user = &member.user;
            if user.bot {
                let verified = user
                    .public_flags
                    .is_some_and(|flags| flags.contains(UserPublicFlags::VERIFIED_BOT));
                scan.bots.push((user.id.get(), verified));
            } else if member_permissions(guild_id, &roles, &member.roles).administrator() {
                scan.administrators.push(user.id.get());
            }
        }
        Ok(scan)
    }

    async fn self_permissions(&self, guild_id: u64) -> Result<u64> {
        let guild = GuildId::new(guild_id);
        let me = self
            .http
            .get_current_user()
            .await
            .map_err(|e| call_failed("current user", e))?;
        let member = self
            .http
            .get_member(guild, me.id)
            .await
            .map_err(|e| call_failed("member lookup", e))?;
        let roles = self
            .http
            .get_guild_roles(guild)
            .await
            .map_err(|e| call_failed("role listing", e))?;

        Ok(member_permissions(guild_id, &roles, &member.roles).bits())
    }
}
