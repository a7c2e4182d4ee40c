//! Guardian Discord bot entry point.
//!
//! Anti-raid protection: mass-action detection, isolation and alerting.

use std::sync::Arc;

use chrono::Utc;
use serenity::all::{GuildChannel, GuildId, Member, Role, RoleId, User, UserPublicFlags};
use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guardian::backup::BackupService;
use guardian::commands::GuardCommandHandler;
use guardian::config::GuardianConfig;
use guardian::database::Database;
use guardian::discord::DiscordPlatform;
use guardian::error::{GuardianError, Result};
use guardian::guard::{GuardSettings, RaidGuard};
use guardian::health::spawn_health_server;
use guardian::models::{EntityKind, RawEvent};
use guardian::platform::{Platform, TimedPlatform};
use guardian::store::CommunityStore;

/// Main event handler for the bot.
struct GuardianHandler {
    guard: Arc<RaidGuard>,
    commands: Arc<GuardCommandHandler>,
}

#[serenity::async_trait]
impl EventHandler for GuardianHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, guilds = ready.guilds.len(), "Guardian bot connected");
        self.guard.set_self_id(ready.user.id.get());

        let commands = GuardCommandHandler::register_commands();
        if let Err(e) = serenity::all::Command::set_global_commands(&ctx.http, commands).await {
            tracing::error!(error = %e, "Failed to register slash commands");
        } else {
            tracing::info!("Slash commands registered");
        }
    }

    async fn channel_delete(&self, _ctx: Context, channel: GuildChannel, _messages: Option<Vec<Message>>) {
        self.guard.dispatch(RawEvent::EntityDeleted {
            guild_id: channel.guild_id.get(),
            kind: EntityKind::Channel,
            entity_id: channel.id.get(),
            name: format!("#{}", channel.name),
            observed_at: Utc::now(),
        });
    }

    async fn guild_role_delete(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        role_id: RoleId,
        role: Option<Role>,
    ) {
        let name = role
            .map(|r| r.name)
            .unwrap_or_else(|| format!("role {}", role_id));
        self.guard.dispatch(RawEvent::EntityDeleted {
            guild_id: guild_id.get(),
            kind: EntityKind::Role,
            entity_id: role_id.get(),
            name,
            observed_at: Utc::now(),
        });
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        user: User,
        _member: Option<Member>,
    ) {
        self.guard.dispatch(RawEvent::MemberRemoved {
            guild_id: guild_id.get(),
            member_id: user.id.get(),
            member_name: user.tag(),
            observed_at: Utc::now(),
        });
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        let user = &new_member.user;
        let verified_bot = user
            .public_flags
            .is_some_and(|flags| flags.contains(UserPublicFlags::VERIFIED_BOT));

        self.guard.dispatch(RawEvent::MemberAdded {
            guild_id: new_member.guild_id.get(),
            member_id: user.id.get(),
            member_name: user.tag(),
            is_bot: user.bot,
            verified_bot,
            observed_at: Utc::now(),
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = self.commands.handle_command(&ctx, &command).await {
                tracing::error!(error = %e, "Failed to handle slash command");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // RUST_LOG controls verbosity, e.g. RUST_LOG=guardian=debug
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Guardian bot starting...");

    let config = GuardianConfig::from_env()?;
    tracing::info!(
        alert_targets = config.default_alert_targets.len(),
        audit_lookback = config.audit_lookback,
        "Configuration loaded"
    );

    let db = Database::new(&config.database_path).await?;
    tracing::info!(path = %config.database_path, "Database initialized");

    spawn_health_server(config.health_port, db.clone());

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let platform: Arc<dyn Platform> = Arc::new(TimedPlatform::new(
        DiscordPlatform::new(http),
        config.platform_timeout,
    ));

    let store = Arc::new(CommunityStore::new(
        db.clone(),
        config.default_alert_targets.clone(),
    ));
    let guard = Arc::new(RaidGuard::new(
        Arc::clone(&platform),
        store,
        GuardSettings::from(&config),
    ));
    let commands = Arc::new(GuardCommandHandler::new(
        Arc::clone(&guard),
        BackupService::new(db, platform),
        config.owner_id,
    ));
    tracing::info!("Protection engine initialized");

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS | GatewayIntents::GUILD_MODERATION;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(GuardianHandler { guard, commands })
        .await
        .map_err(|e| GuardianError::DiscordApi(Box::new(e)))?;

    tracing::info!("Starting Discord client...");

    client
        .start()
        .await
        .map_err(|e| GuardianError::DiscordApi(Box::new(e)))?;

    Ok(())
}
