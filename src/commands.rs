//! Slash command handler for the Guardian bot.
//!
//! Implements `/guard` for configuration, manual isolation, server
//! lockdown, evidence queries and structure backups. Every subcommand needs administrator
//! permission; exemption management is further limited to the bot owner
//! when one is configured.

use std::sync::Arc;
use std::time::Instant;

use serenity::all::{
    CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, Permissions,
};

use crate::backup::BackupService;
use crate::error::{ErrorContext, GuardianError, Result};
use crate::guard::RaidGuard;
use crate::lockdown::LockState;
use crate::models::{ActionKind, CommunityConfig, Threshold};
use crate::platform::{Platform, SecurityScan};

/// Evidence records shown by `/guard evidence`.
const EVIDENCE_LIMIT: u32 = 10;
const ACTION_LOG_DEFAULT: u32 = 10;
const ACTION_LOG_MAX: u32 = 20;
const BACKUP_LIST_LIMIT: u32 = 10;
const MAX_THRESHOLD_COUNT: u32 = 50;
const MAX_THRESHOLD_WINDOW: u64 = 3600;
/// Entries listed per section of `/guard scan`.
const SCAN_LIST_LIMIT: usize = 10;

/// Permissions checked by `/guard healthcheck`.
const REQUIRED_PERMISSIONS: [(&str, Permissions); 7] = [
    ("Administrator", Permissions::ADMINISTRATOR),
    ("Manage Server", Permissions::MANAGE_GUILD),
    ("Manage Channels", Permissions::MANAGE_CHANNELS),
    ("Manage Roles", Permissions::MANAGE_ROLES),
    ("Ban Members", Permissions::BAN_MEMBERS),
    ("Kick Members", Permissions::KICK_MEMBERS),
    ("View Audit Log", Permissions::VIEW_AUDIT_LOG),
];

/// A parsed `/guard` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardCommand {
    Config,
    Toggle { kind: ActionKind, enabled: bool },
    Threshold { kind: ActionKind, count: u32, window: u64 },
    AlertsAdd(u64),
    AlertsRemove(u64),
    AlertsList,
    ExemptAdd(u64),
    ExemptRemove(u64),
    ExemptList,
    BotWhitelistAdd(u64),
    BotWhitelistRemove(u64),
    Isolate(u64),
    Unlock(u64),
    Lockdown,
    ServerUnlock,
    IsolationRole(u64),
    AutoIsolate(bool),
    Logs(u64),
    Evidence(Option<u64>),
    ActionLog(u32),
    Backup,
    Backups,
    Scan,
    HealthCheck,
    Info,
}

impl GuardCommand {
    /// Parse the top-level options of a `/guard` interaction.
    pub fn parse(options: &[CommandDataOption]) -> std::result::Result<Self, String> {
        let Some(first) = options.first() else {
            return Err("Missing subcommand.".to_string());
        };
        let args = nested(first);

        let command = match first.name.as_str() {
            "config" => Self::Config,
            "toggle" => Self::Toggle {
                kind: kind_arg(args)?,
                enabled: required(args, "state", |v| v.as_bool())?,
            },
            "threshold" => Self::Threshold {
                kind: kind_arg(args)?,
                count: int_arg(args, "count")?,
                window: int_arg(args, "window")?,
            },
            "alerts" | "exempt" | "botwhitelist" => {
                let Some(action) = args.first() else {
                    return Err("Missing action.".to_string());
                };
                Self::parse_group(&first.name, &action.name, nested(action))?
            }
            "isolate" => Self::Isolate(required(args, "user", |v| v.as_user_id())?.get()),
            "unlock" => Self::Unlock(required(args, "user", |v| v.as_user_id())?.get()),
            "lockdown" => Self::Lockdown,
            "serverunlock" => Self::ServerUnlock,
            "isolationrole" => {
                Self::IsolationRole(required(args, "role", |v| v.as_role_id())?.get())
            }
            "autoisolate" => Self::AutoIsolate(required(args, "state", |v| v.as_bool())?),
            "logs" => Self::Logs(required(args, "channel", |v| v.as_channel_id())?.get()),
            "evidence" => Self::Evidence(optional(args, "user", |v| v.as_user_id()).map(|u| u.get())),
            "actionlog" => Self::ActionLog(
                optional(args, "limit", |v| v.as_i64())
                    .map(|n| n.clamp(1, i64::from(ACTION_LOG_MAX)) as u32)
                    .unwrap_or(ACTION_LOG_DEFAULT),
            ),
            "backup" => Self::Backup,
            "backups" => Self::Backups,
            "scan" => Self::Scan,
            "healthcheck" => Self::HealthCheck,
            "info" => Self::Info,
            other => return Err(format!("Unknown subcommand `{}`.", other)),
        };
        Ok(command)
    }

    fn parse_group(
        group: &str,
        action: &str,
        args: &[CommandDataOption],
    ) -> std::result::Result<Self, String> {
        let command = match (group, action) {
            ("alerts", "list") => Self::AlertsList,
            ("alerts", "add") => Self::AlertsAdd(required(args, "target", |v| v.as_mentionable())?.get()),
            ("alerts", "remove") => {
                Self::AlertsRemove(required(args, "target", |v| v.as_mentionable())?.get())
            }
            ("exempt", "list") => Self::ExemptList,
            ("exempt", "add") => Self::ExemptAdd(required(args, "user", |v| v.as_user_id())?.get()),
            ("exempt", "remove") => {
                Self::ExemptRemove(required(args, "user", |v| v.as_user_id())?.get())
            }
            ("botwhitelist", "add") => Self::BotWhitelistAdd(bot_id_arg(args)?),
            ("botwhitelist", "remove") => Self::BotWhitelistRemove(bot_id_arg(args)?),
            _ => return Err(format!("Unknown action `{} {}`.", group, action)),
        };
        Ok(command)
    }
}

fn nested(option: &CommandDataOption) -> &[CommandDataOption] {
    match &option.value {
        CommandDataOptionValue::SubCommand(opts) | CommandDataOptionValue::SubCommandGroup(opts) => {
            opts
        }
        _ => &[],
    }
}

fn optional<'a, T>(
    args: &'a [CommandDataOption],
    name: &str,
    get: impl Fn(&'a CommandDataOptionValue) -> Option<T>,
) -> Option<T> {
    args.iter().find(|o| o.name == name).and_then(|o| get(&o.value))
}

fn required<'a, T>(
    args: &'a [CommandDataOption],
    name: &str,
    get: impl Fn(&'a CommandDataOptionValue) -> Option<T>,
) -> std::result::Result<T, String> {
    optional(args, name, get).ok_or_else(|| format!("Missing option `{}`.", name))
}

fn kind_arg(args: &[CommandDataOption]) -> std::result::Result<ActionKind, String> {
    required(args, "kind", |v| v.as_str())?
        .parse()
        .map_err(|e: GuardianError| e.to_string())
}

fn int_arg<T: TryFrom<i64>>(args: &[CommandDataOption], name: &str) -> std::result::Result<T, String> {
    let value = required(args, name, |v| v.as_i64())?;
    T::try_from(value).map_err(|_| format!("`{}` is out of range.", name))
}

fn bot_id_arg(args: &[CommandDataOption]) -> std::result::Result<u64, String> {
    required(args, "bot_id", |v| v.as_str())?
        .trim()
        .parse()
        .map_err(|_| "`bot_id` must be a numeric id.".to_string())
}

fn kind_option() -> CreateCommandOption {
    ActionKind::ALL.iter().fold(
        CreateCommandOption::new(CommandOptionType::String, "kind", "Protection to change")
            .required(true),
        |opt, kind| opt.add_string_choice(kind.label(), kind.as_str()),
    )
}

fn subcommand(name: &str, description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::SubCommand, name, description)
}

fn id_group(name: &str, description: &str, option: CreateCommandOption, with_list: bool) -> CreateCommandOption {
    let mut group = CreateCommandOption::new(CommandOptionType::SubCommandGroup, name, description)
        .add_sub_option(subcommand("add", "Add an entry").add_sub_option(option.clone()))
        .add_sub_option(subcommand("remove", "Remove an entry").add_sub_option(option));
    if with_list {
        group = group.add_sub_option(subcommand("list", "Show current entries"));
    }
    group
}

/// Slash command handler.
pub struct GuardCommandHandler {
    guard: Arc<RaidGuard>,
    backups: BackupService,
    owner_id: Option<u64>,
}

impl GuardCommandHandler {
    pub fn new(guard: Arc<RaidGuard>, backups: BackupService, owner_id: Option<u64>) -> Self {
        Self {
            guard,
            backups,
            owner_id,
        }
    }

    /// Register all slash commands with Discord.
    pub fn register_commands() -> Vec<CreateCommand> {
        vec![Self::create_guard_command()]
    }

    fn create_guard_command() -> CreateCommand {
        let user = |description: &str| {
            CreateCommandOption::new(CommandOptionType::User, "user", description).required(true)
        };
        let state = |description: &str| {
            CreateCommandOption::new(CommandOptionType::Boolean, "state", description).required(true)
        };

        CreateCommand::new("guard")
            .description("Anti-raid protection")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(subcommand("config", "Show protection settings"))
            .add_option(
                subcommand("toggle", "Turn a protection on or off")
                    .add_sub_option(kind_option())
                    .add_sub_option(state("On or off")),
            )
            .add_option(
                subcommand("threshold", "Set how many actions within a window count as a raid")
                    .add_sub_option(kind_option())
                    .add_sub_option(
                        CreateCommandOption::new(CommandOptionType::Integer, "count", "Actions")
                            .required(true)
                            .min_int_value(1)
                            .max_int_value(u64::from(MAX_THRESHOLD_COUNT)),
                    )
                    .add_sub_option(
                        CreateCommandOption::new(CommandOptionType::Integer, "window", "Seconds")
                            .required(true)
                            .min_int_value(1)
                            .max_int_value(MAX_THRESHOLD_WINDOW),
                    ),
            )
            .add_option(id_group(
                "alerts",
                "Users or roles that receive raid alerts by DM",
                CreateCommandOption::new(CommandOptionType::Mentionable, "target", "User or role")
                    .required(true),
                true,
            ))
            .add_option(id_group(
                "exempt",
                "Users that never trigger detection",
                user("User"),
                true,
            ))
            .add_option(id_group(
                "botwhitelist",
                "Bots that may be added without a response",
                CreateCommandOption::new(CommandOptionType::String, "bot_id", "Bot user id")
                    .required(true),
                false,
            ))
            .add_option(subcommand("isolate", "Isolate a user").add_sub_option(user("User to isolate")))
            .add_option(subcommand("unlock", "Lift isolation from a user").add_sub_option(user("User to unlock")))
            .add_option(subcommand("lockdown", "Stop everyone from sending messages in text channels"))
            .add_option(subcommand("serverunlock", "Lift a server lockdown"))
            .add_option(
                subcommand("isolationrole", "Set the role applied to isolated users").add_sub_option(
                    CreateCommandOption::new(CommandOptionType::Role, "role", "Isolation role")
                        .required(true),
                ),
            )
            .add_option(
                subcommand("autoisolate", "Isolate raiders instead of banning them")
                    .add_sub_option(state("On or off")),
            )
            .add_option(
                subcommand("logs", "Set the log channel").add_sub_option(
                    CreateCommandOption::new(CommandOptionType::Channel, "channel", "Log channel")
                        .required(true),
                ),
            )
            .add_option(
                subcommand("evidence", "Show recent detections").add_sub_option(
                    CreateCommandOption::new(CommandOptionType::User, "user", "Only this actor"),
                ),
            )
            .add_option(
                subcommand("actionlog", "Show recent bot actions").add_sub_option(
                    CreateCommandOption::new(CommandOptionType::Integer, "limit", "Entries to show")
                        .min_int_value(1)
                        .max_int_value(u64::from(ACTION_LOG_MAX)),
                ),
            )
            .add_option(subcommand("backup", "Snapshot roles and channels"))
            .add_option(subcommand("backups", "List structure snapshots"))
            .add_option(subcommand("scan", "List administrators and unverified bots"))
            .add_option(subcommand("healthcheck", "Check bot permissions and storage"))
            .add_option(subcommand("info", "Show bot status"))
    }

    /// Handle an incoming slash command interaction.
    pub async fn handle_command(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        if !self.check_permissions(command) {
            return self
                .respond_error(ctx, command, "You don't have permission to use this command.")
                .await;
        }

        let Some(guild_id) = command.guild_id else {
            return self
                .respond_error(ctx, command, "Command must be used in a server.")
                .await;
        };

        let parsed = match GuardCommand::parse(&command.data.options) {
            Ok(parsed) => parsed,
            Err(message) => return self.respond_error(ctx, command, &message).await,
        };

        let invoker = command.user.id.get();
        match self.execute(guild_id.get(), invoker, parsed).await {
            Ok(response) => self.respond_message(ctx, command, &response).await,
            Err(e) => {
                e.log_with_context(
                    &ErrorContext::new("guard_command")
                        .with_guild_id(guild_id.get())
                        .with_user_id(invoker),
                );
                self.respond_error(ctx, command, e.user_message()).await
            }
        }
    }

    fn check_permissions(&self, command: &CommandInteraction) -> bool {
        command
            .member
            .as_ref()
            .and_then(|m| m.permissions)
            .is_some_and(|p| p.administrator())
    }

    fn is_owner(&self, user_id: u64) -> bool {
        self.owner_id.map_or(true, |owner| owner == user_id)
    }

    /// Run a parsed command and render the reply.
    pub async fn execute(&self, guild_id: u64, invoker: u64, command: GuardCommand) -> Result<String> {
        let store = self.guard.store();

        match command {
            GuardCommand::Config => Ok(render_config(&store.snapshot(guild_id).await)),
            GuardCommand::Toggle { kind, enabled } => {
                store.update(guild_id, |c| c.set_enabled(kind, enabled)).await?;
                tracing::info!(guild_id, kind = %kind, enabled, "Protection toggled");
                Ok(format!(
                    "✅ {} detection {}.",
                    kind.label(),
                    if enabled { "enabled" } else { "disabled" }
                ))
            }
            GuardCommand::Threshold { kind, count, window } => {
                if kind == ActionKind::BotJoin {
                    return Ok("❌ Bot joins have no threshold; every unverified bot is handled.".to_string());
                }
                if !(1..=MAX_THRESHOLD_COUNT).contains(&count) || !(1..=MAX_THRESHOLD_WINDOW).contains(&window) {
                    return Ok(format!(
                        "❌ Count must be 1-{} and window 1-{} seconds.",
                        MAX_THRESHOLD_COUNT, MAX_THRESHOLD_WINDOW
                    ));
                }
                store
                    .update(guild_id, |c| {
                        let enabled = c.threshold(kind).map_or(true, |t| t.enabled);
                        c.thresholds.insert(
                            kind,
                            Threshold {
                                enabled,
                                ..Threshold::rate(count, window)
                            },
                        );
                    })
                    .await?;
                tracing::info!(guild_id, kind = %kind, count, window, "Threshold changed");
                Ok(format!(
                    "✅ {}: {} in {}s now counts as a raid.",
                    kind.label(),
                    count,
                    window
                ))
            }
            GuardCommand::AlertsAdd(target) => {
                let added = store.update(guild_id, |c| c.alert_targets.insert(target)).await?;
                Ok(if added {
                    format!("✅ {} will receive raid alerts.", mention_any(target))
                } else {
                    format!("{} already receives raid alerts.", mention_any(target))
                })
            }
            GuardCommand::AlertsRemove(target) => {
                let removed = store.update(guild_id, |c| c.alert_targets.remove(&target)).await?;
                Ok(if removed {
                    format!("✅ {} removed from raid alerts.", mention_any(target))
                } else {
                    format!("{} was not an alert target.", mention_any(target))
                })
            }
            GuardCommand::AlertsList => {
                let config = store.snapshot(guild_id).await;
                Ok(render_id_list(
                    "🔔 **Alert Targets**",
                    config.alert_targets.iter().map(|id| mention_any(*id)),
                    "No alert targets configured.",
                ))
            }
            GuardCommand::ExemptAdd(_) | GuardCommand::ExemptRemove(_) | GuardCommand::ExemptList
                if !self.is_owner(invoker) =>
            {
                Ok("❌ Only the bot owner can manage exemptions.".to_string())
            }
            GuardCommand::ExemptAdd(user) => {
                store.update(guild_id, |c| c.exempt_users.insert(user)).await?;
                tracing::info!(guild_id, user_id = user, "User exempted");
                Ok(format!("✅ <@{}> is exempt from detection.", user))
            }
            GuardCommand::ExemptRemove(user) => {
                store.update(guild_id, |c| c.exempt_users.remove(&user)).await?;
                Ok(format!("✅ <@{}> is no longer exempt.", user))
            }
            GuardCommand::ExemptList => {
                let config = store.snapshot(guild_id).await;
                Ok(render_id_list(
                    "🛡️ **Exempt Users**",
                    config.exempt_users.iter().map(|id| format!("<@{}>", id)),
                    "No exempt users.",
                ))
            }
            GuardCommand::BotWhitelistAdd(bot) => {
                store.update(guild_id, |c| c.exempt_bots.insert(bot)).await?;
                Ok(format!("✅ Bot `{}` whitelisted.", bot))
            }
            GuardCommand::BotWhitelistRemove(bot) => {
                store.update(guild_id, |c| c.exempt_bots.remove(&bot)).await?;
                Ok(format!("✅ Bot `{}` removed from the whitelist.", bot))
            }
            GuardCommand::Isolate(user) => {
                let lockdown = self.guard.lockdown();
                let was_isolated = lockdown.state(guild_id, user).await == LockState::Isolated;
                let reason = format!("Manual isolation by {}", invoker);
                lockdown.isolate(guild_id, user, &reason).await?;
                Ok(if was_isolated {
                    format!("🔒 <@{}> was already isolated; isolation role re-applied.", user)
                } else {
                    format!("🔒 <@{}> has been isolated.", user)
                })
            }
            GuardCommand::Unlock(user) => {
                let reason = format!("Unlocked by {}", invoker);
                match self.guard.lockdown().unlock(guild_id, user, &reason).await {
                    Ok(()) => Ok(format!("🔓 <@{}> has been unlocked.", user)),
                    Err(GuardianError::ActorNotPresent { .. }) => {
                        Ok(format!("❌ <@{}> is no longer in the server.", user))
                    }
                    Err(e) => Err(e),
                }
            }
            GuardCommand::Lockdown => {
                let reason = format!("Server lockdown by {}", invoker);
                Ok(match self.guard.lockdown().lock_server(guild_id, &reason).await? {
                    Some(locked) => format!(
                        "🔒 **Server locked down.** {} text channels locked.\nUse `/guard serverunlock` to lift it.",
                        locked
                    ),
                    None => "⚠️ Server is already in lockdown.".to_string(),
                })
            }
            GuardCommand::ServerUnlock => {
                let reason = format!("Lockdown lifted by {}", invoker);
                Ok(match self.guard.lockdown().unlock_server(guild_id, &reason).await? {
                    Some(unlocked) => format!(
                        "🔓 **Lockdown lifted.** {} text channels unlocked.",
                        unlocked
                    ),
                    None => "Server is not in lockdown.".to_string(),
                })
            }
            GuardCommand::IsolationRole(role) => {
                store.update(guild_id, |c| c.isolation_role_id = Some(role)).await?;
                Ok(format!("✅ Isolation role set to <@&{}>.", role))
            }
            GuardCommand::AutoIsolate(enabled) => {
                let config = store.snapshot(guild_id).await;
                if enabled && config.isolation_role_id.is_none() {
                    return Err(GuardianError::NotConfigured { guild_id });
                }
                store.update(guild_id, |c| c.auto_isolate = enabled).await?;
                Ok(if enabled {
                    "✅ Raiders will be isolated instead of banned.".to_string()
                } else {
                    "✅ Raiders will be banned.".to_string()
                })
            }
            GuardCommand::Logs(channel) => {
                store.update(guild_id, |c| c.log_channel_id = Some(channel)).await?;
                Ok(format!("✅ Detections will be logged to <#{}>.", channel))
            }
            GuardCommand::Evidence(actor) => {
                let records = store
                    .database()
                    .recent_evidence(guild_id, actor, EVIDENCE_LIMIT)
                    .await?;
                if records.is_empty() {
                    return Ok("📁 No evidence recorded.".to_string());
                }

                let mut response = String::from("📁 **Recent Evidence**\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
                for (i, record) in records.iter().enumerate() {
                    let target = record
                        .payload
                        .get("target_name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    let mass = record
                        .payload
                        .get("is_mass")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    response.push_str(&format!(
                        "**{}.** {}{} by <@{}> <t:{}:R>\n    └─ {}\n",
                        i + 1,
                        if mass { "🚨 " } else { "" },
                        record.kind.label(),
                        record.actor_id,
                        record.timestamp.timestamp(),
                        target
                    ));
                }
                Ok(response)
            }
            GuardCommand::ActionLog(limit) => {
                let records = store
                    .database()
                    .recent_actions(guild_id, limit.clamp(1, ACTION_LOG_MAX))
                    .await?;
                if records.is_empty() {
                    return Ok("📋 No actions taken yet.".to_string());
                }

                let mut response = String::from("📋 **Action Log**\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
                for record in &records {
                    response.push_str(&format!(
                        "`{}` {} by <@{}> on {} (`{}`) **{}**\n    └─ {}\n",
                        record.timestamp.format("%Y-%m-%d %H:%M"),
                        record.kind.label(),
                        record.actor_id,
                        record.target_name,
                        record.target_id,
                        record.outcome,
                        record.detail
                    ));
                }
                Ok(response)
            }
            GuardCommand::Backup => {
                let summary = self.backups.create_backup(guild_id).await?;
                Ok(format!(
                    "💾 Backup #{} saved: {} roles, {} channels.\nChecksum: `{}`",
                    summary.id,
                    summary.roles,
                    summary.channels,
                    &summary.checksum[..16.min(summary.checksum.len())]
                ))
            }
            GuardCommand::Backups => {
                let backups = self.backups.list_backups(guild_id, BACKUP_LIST_LIMIT).await?;
                if backups.is_empty() {
                    return Ok("💾 No backups yet. Use `/guard backup` to create one.".to_string());
                }
                let mut response = String::from("💾 **Structure Backups**\n");
                for b in &backups {
                    response.push_str(&format!(
                        "• #{} - {} - {} roles, {} channels\n",
                        b.id,
                        b.created_at.format("%Y-%m-%d %H:%M UTC"),
                        b.roles,
                        b.channels
                    ));
                }
                Ok(response)
            }
            GuardCommand::Scan => {
                let platform = self.guard.platform();
                let scan = platform.security_scan(guild_id).await?;
                let bot_permissions = Permissions::from_bits_truncate(platform.self_permissions(guild_id).await?);
                let backups = self.backups.count_backups(guild_id).await?;
                let config = store.snapshot(guild_id).await;
                Ok(render_scan(&scan, &config, backups, bot_permissions.administrator()))
            }
            GuardCommand::HealthCheck => {
                let permissions = match self.guard.platform().self_permissions(guild_id).await {
                    Ok(bits) => Some(Permissions::from_bits_truncate(bits)),
                    Err(e) => {
                        e.log_with_context(&ErrorContext::new("healthcheck").with_guild_id(guild_id));
                        None
                    }
                };
                let started = Instant::now();
                let database = store.database().health_check().await.map(|()| started.elapsed().as_millis());
                Ok(render_health(permissions, database.ok()))
            }
            GuardCommand::Info => {
                let config = store.snapshot(guild_id).await;
                let mode = if config.auto_isolate && config.isolation_role_id.is_some() {
                    "Isolate raiders"
                } else {
                    "Ban raiders"
                };
                Ok(format!(
                    "🛡️ **Guardian Status**\n\
                     • Version: {}\n\
                     • Built: {}\n\
                     • Commit: {}\n\
                     • Mode: **{}**\n\
                     • Server lockdown: {}\n\
                     • Isolated users: {}",
                    env!("CARGO_PKG_VERSION"),
                    option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
                    option_env!("GIT_COMMIT").unwrap_or("unknown"),
                    mode,
                    if config.lockdown_active { "🔒 Active" } else { "Inactive" },
                    config.isolated_actors.len()
                ))
            }
        }
    }

    /// Send a response message.
    async fn respond_message(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        content: &str,
    ) -> Result<()> {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        );

        match command.create_response(&ctx.http, response).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Discord may timeout or another instance may respond first
                if e.to_string().contains("already been acknowledged") {
                    Ok(())
                } else {
                    Err(GuardianError::DiscordApi(Box::new(e)))
                }
            }
        }
    }

    async fn respond_error(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        message: &str,
    ) -> Result<()> {
        self.respond_message(ctx, command, &format!("❌ {}", message))
            .await
    }
}

/// Alert targets may be users or roles; Discord renders the wrong kind as
/// an unknown mention, so both forms are shown.
fn mention_any(id: u64) -> String {
    format!("<@{}> / <@&{}>", id, id)
}

fn render_id_list(title: &str, entries: impl Iterator<Item = String>, empty: &str) -> String {
    let lines: Vec<String> = entries.map(|e| format!("• {}", e)).collect();
    if lines.is_empty() {
        empty.to_string()
    } else {
        format!("{}\n{}", title, lines.join("\n"))
    }
}

/// Render the guild's configuration for `/guard config`.
pub fn render_config(config: &CommunityConfig) -> String {
    let mut features = String::new();
    for kind in ActionKind::ALL {
        let line = match config.threshold(kind) {
            Some(t) => {
                let status = if t.enabled { "ON" } else { "OFF" };
                match (t.count, t.window) {
                    (Some(count), Some(window)) => format!("{} ({} in {}s)", status, count, window),
                    (Some(count), None) => format!("{} ({} actions)", status, count),
                    _ => status.to_string(),
                }
            }
            None => "not configured".to_string(),
        };
        features.push_str(&format!("• {}: {}\n", kind.label(), line));
    }

    format!(
        "**Guardian Configuration**\n\
         • Log Channel: {}\n\
         • Isolation Role: {}\n\
         • Auto-isolate: {}\n\
         • Exempt Users: {}\n\
         • Whitelisted Bots: {}\n\
         • Alert Targets: {}\n\
         • Isolated Users: {}\n\
         • Server Lockdown: {}\n\n\
         **Protections**\n{}",
        config
            .log_channel_id
            .map(|id| format!("<#{}>", id))
            .unwrap_or_else(|| "Not set".to_string()),
        config
            .isolation_role_id
            .map(|id| format!("<@&{}>", id))
            .unwrap_or_else(|| "Not set".to_string()),
        if config.auto_isolate { "On" } else { "Off" },
        config.exempt_users.len(),
        config.exempt_bots.len(),
        config.alert_targets.len(),
        config.isolated_actors.len(),
        if config.lockdown_active { "🔒 Active" } else { "Inactive" },
        features
    )
}

/// Render `/guard scan`.
pub fn render_scan(scan: &SecurityScan, config: &CommunityConfig, backups: u64, bot_is_admin: bool) -> String {
    let flagged: Vec<u64> = scan
        .bots
        .iter()
        .filter(|(id, verified)| !verified && !config.exempt_bots.contains(id))
        .map(|(id, _)| *id)
        .collect();

    let mut response = String::from("🔍 **Security Scan**\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    response.push_str(&format!("**Administrators:** {}\n", scan.administrators.len()));
    for id in scan.administrators.iter().take(SCAN_LIST_LIMIT) {
        response.push_str(&format!("• <@{}>\n", id));
    }
    if scan.administrators.len() > SCAN_LIST_LIMIT {
        response.push_str(&format!("• ...and {} more\n", scan.administrators.len() - SCAN_LIST_LIMIT));
    }

    response.push_str(&format!("\n**Bots:** {}\n", scan.bots.len()));
    if flagged.is_empty() {
        response.push_str("✅ No unverified bots outside the whitelist.\n");
    } else {
        response.push_str(&format!("⚠️ Unverified, not whitelisted: {}\n", flagged.len()));
        for id in flagged.iter().take(SCAN_LIST_LIMIT) {
            response.push_str(&format!("• <@{}> (`{}`)\n", id, id));
        }
    }

    response.push_str(&format!("\n**Backups:** {}\n", backups));
    response.push_str(&format!(
        "**Guardian has administrator:** {}",
        if bot_is_admin { "✅ Yes" } else { "❌ No" }
    ));
    response
}

/// Render `/guard healthcheck`. `None` marks a check that could not run.
pub fn render_health(permissions: Option<Permissions>, database_ms: Option<u128>) -> String {
    let mut response = String::from("🩺 **Health Check**\n\n**Permissions**\n");
    match permissions {
        Some(held) => {
            for (label, permission) in REQUIRED_PERMISSIONS {
                let granted = held.administrator() || held.contains(permission);
                response.push_str(&format!("{} {}\n", if granted { "✅" } else { "❌" }, label));
            }
        }
        None => response.push_str("❌ Could not read the bot's permissions\n"),
    }

    response.push_str("\n**Database**\n");
    match database_ms {
        Some(ms) => response.push_str(&format!("✅ Connected ({}ms)", ms)),
        None => response.push_str("❌ Unavailable"),
    }
    response
}
