//! Configuration loading from environment.
//!
//! Process-wide settings only. Per-guild settings live in
//! [`CommunityConfig`](crate::models::CommunityConfig) and are persisted in
//! the database.

use std::env;
use std::time::Duration;

use crate::error::{GuardianError, Result};

/// Audit entries inspected per correlation when `AUDIT_LOOKBACK` is unset.
pub const DEFAULT_AUDIT_LOOKBACK: u8 = 3;

/// Seconds before a Discord call is abandoned when `PLATFORM_TIMEOUT_SECS` is unset.
pub const DEFAULT_PLATFORM_TIMEOUT_SECS: u64 = 10;

/// Main configuration for the Guardian bot.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Discord bot token.
    pub discord_token: String,
    /// SQLite database path.
    pub database_path: String,
    /// Port for the health check server.
    pub health_port: u16,
    /// Bot owner, allowed to manage exemptions.
    pub owner_id: Option<u64>,
    /// Alert recipients used whenever a guild has none configured.
    pub default_alert_targets: Vec<u64>,
    /// Number of most recent audit entries scanned per event.
    pub audit_lookback: u8,
    /// Wait before querying the audit trail, for propagation lag.
    pub audit_delay: Duration,
    /// Upper bound on any single Discord call.
    pub platform_timeout: Duration,
    /// Role deletions notify even when the ban fails.
    pub role_delete_always_notify: bool,
}

impl GuardianConfig {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `DISCORD_TOKEN`: Discord bot token
    /// - `DEFAULT_ALERT_TARGETS` or `OWNER_ID`: at least one alert recipient
    ///
    /// Optional environment variables:
    /// - `DATABASE_PATH`: SQLite file (default: guardian.db)
    /// - `PORT`: health check port (default: 8080)
    /// - `AUDIT_LOOKBACK`: audit entries per lookup (default: 3)
    /// - `AUDIT_DELAY_MS`: delay before audit lookup (default: 0)
    /// - `PLATFORM_TIMEOUT_SECS`: Discord call timeout (default: 10)
    /// - `ROLE_DELETE_ALWAYS_NOTIFY`: keep alerting on failed role-deletion bans (default: true)
    pub fn from_env() -> Result<Self> {
        let discord_token = env::var("DISCORD_TOKEN")
            .map_err(|_| GuardianError::Config("DISCORD_TOKEN not set".to_string()))?;

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "guardian.db".to_string());

        let health_port = parse_or("PORT", 8080);

        let owner_id = env::var("OWNER_ID").ok().and_then(|s| s.trim().parse().ok());

        let default_alert_targets =
            resolve_default_targets(parse_id_list("DEFAULT_ALERT_TARGETS"), owner_id)?;

        let audit_lookback = parse_or("AUDIT_LOOKBACK", DEFAULT_AUDIT_LOOKBACK).max(1);
        let audit_delay = Duration::from_millis(parse_or("AUDIT_DELAY_MS", 0));
        let platform_timeout =
            Duration::from_secs(parse_or("PLATFORM_TIMEOUT_SECS", DEFAULT_PLATFORM_TIMEOUT_SECS));

        let role_delete_always_notify = env::var("ROLE_DELETE_ALWAYS_NOTIFY")
            .ok()
            .and_then(|s| parse_flag(&s))
            .unwrap_or(true);

        Ok(Self {
            discord_token,
            database_path,
            health_port,
            owner_id,
            default_alert_targets,
            audit_lookback,
            audit_delay,
            platform_timeout,
            role_delete_always_notify,
        })
    }
}

/// Parse a numeric variable, falling back to `default` when unset or invalid.
fn parse_or<T: std::str::FromStr>(var_name: &str, default: T) -> T {
    env::var(var_name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated list of snowflake IDs from an environment variable.
///
/// Entries that are not valid IDs are skipped.
fn parse_id_list(var_name: &str) -> Vec<u64> {
    env::var(var_name)
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|p| p.trim().parse::<u64>().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The default alert set must never be empty.
fn resolve_default_targets(targets: Vec<u64>, owner_id: Option<u64>) -> Result<Vec<u64>> {
    if !targets.is_empty() {
        return Ok(targets);
    }
    owner_id.map(|id| vec![id]).ok_or_else(|| {
        GuardianError::Config(
            "DEFAULT_ALERT_TARGETS or OWNER_ID must name at least one alert recipient"
                .to_string(),
        )
    })
}


#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every well-formed ID written to the list variable is read back in order.
        #[test]
        fn prop_id_list_parsing(ids in prop::collection::vec(1u64..u64::MAX, 1..10)) {
            use std::env;

            let var_name = format!("TEST_PROP_IDS_{}", uuid::Uuid::new_v4().simple());
            let joined = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");

            env::set_var(&var_name, &joined);
            let parsed = super::parse_id_list(&var_name);
            env::remove_var(&var_name);

            prop_assert_eq!(ids, parsed);
        }
    }
}
