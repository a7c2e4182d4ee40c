//! Error types for the Guardian bot.
//!
//! Every fallible path returns [`GuardianError`]. Escalation failures are
//! captured into outcomes instead of propagating, so only startup errors
//! are ever fatal.

use thiserror::Error;

/// Central error type for all Guardian operations.
#[derive(Debug, Error)]
pub enum GuardianError {
    /// No attributable actor was found in the audit trail.
    #[error("No audit entry matched target {target_id}")]
    CorrelationMiss {
        /// Entity the raw event referred to.
        target_id: u64,
    },

    /// Isolation requested but no isolation role is configured.
    #[error("Isolation role not configured for guild {guild_id}")]
    NotConfigured {
        /// Guild missing the isolation role.
        guild_id: u64,
    },

    /// The actor left the guild before the action was applied.
    #[error("User {user_id} is not a member of the server")]
    ActorNotPresent {
        /// Actor that could not be found.
        user_id: u64,
    },

    /// A platform mutation or query failed or timed out.
    #[error("Platform call failed: {0}")]
    PlatformCallFailed(String),

    /// Saving a configuration change failed; in-memory state was kept.
    #[error("Failed to persist configuration: {0}")]
    ConfigPersistFailed(String),

    /// Discord API error from serenity.
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// Configuration error (missing env vars, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal state error (dead worker, invalid state transitions).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Backup error.
    #[error("Backup error: {0}")]
    Backup(String),
}

impl GuardianError {
    /// Log error with full context using tracing.
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self {
            Self::Database(_)
            | Self::InternalState(_)
            | Self::Backup(_)
            | Self::ConfigPersistFailed(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Critical error occurred"
                );
            }
            Self::DiscordApi(_) | Self::PlatformCallFailed(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "External API error"
                );
            }
            // Expected during normal operation
            Self::CorrelationMiss { .. }
            | Self::NotConfigured { .. }
            | Self::ActorNotPresent { .. } => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Operation could not be applied"
                );
            }
            Self::Config(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "Configuration error"
                );
            }
            Self::Json(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    user_id = ?context.user_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "Data processing error"
                );
            }
        }
    }

    /// Check if this error is critical and requires alerting
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::InternalState(_)
                | Self::Backup(_)
                | Self::ConfigPersistFailed(_)
        )
    }

    /// Get user-friendly error message (hides internal details)
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CorrelationMiss { .. } => "Could not determine who performed the action",
            Self::NotConfigured { .. } => {
                "Lockdown role not configured. Use `/guard isolationrole` first"
            }
            Self::ActorNotPresent { .. } => "User not in server",
            Self::PlatformCallFailed(_) | Self::DiscordApi(_) => {
                "Discord request failed, the bot may lack permissions"
            }
            Self::ConfigPersistFailed(_) => "Change applied but could not be saved",
            Self::Config(_) => "Service configuration error",
            Self::InternalState(_) => "Internal service error",
            Self::Json(_) => "Data format error",
            Self::Database(_) => "Database service temporarily unavailable",
            Self::Backup(_) => "Backup service error",
        }
    }
}

/// Context information for error logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Unique request identifier for correlation
    pub request_id: String,
    /// User ID if available
    pub user_id: Option<u64>,
    /// Guild ID if available
    pub guild_id: Option<u64>,
    /// Operation being performed
    pub operation: String,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            guild_id: None,
            operation: operation.into(),
        }
    }

    /// Set user ID
    pub fn with_user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set guild ID
    pub fn with_guild_id(mut self, guild_id: u64) -> Self {
        self.guild_id = Some(guild_id);
        self
    }
}

/// Result type alias for Guardian operations.
pub type Result<T> = std::result::Result<T, GuardianError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_configured() {
        let err = GuardianError::NotConfigured { guild_id: 42 };
        assert_eq!(
            err.to_string(),
            "Isolation role not configured for guild 42"
        );
    }

    #[test]
    fn error_display_correlation_miss() {
        let err = GuardianError::CorrelationMiss { target_id: 99 };
        assert_eq!(err.to_string(), "No audit entry matched target 99");
        assert_eq!(err.user_message(), "Could not determine who performed the action");
    }

    #[test]
    fn error_display_actor_not_present() {
        let err = GuardianError::ActorNotPresent { user_id: 7 };
        assert_eq!(err.to_string(), "User 7 is not a member of the server");
    }

    #[test]
    fn error_display_config() {
        let err = GuardianError::Config("DISCORD_TOKEN not set".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: DISCORD_TOKEN not set"
        );
    }

    #[test]
    fn error_is_critical() {
        assert!(GuardianError::Database("test".to_string()).is_critical());
        assert!(GuardianError::ConfigPersistFailed("test".to_string()).is_critical());
        assert!(!GuardianError::PlatformCallFailed("403".to_string()).is_critical());
        assert!(!GuardianError::CorrelationMiss { target_id: 1 }.is_critical());
        assert!(!GuardianError::Config("test".to_string()).is_critical());
    }

    #[test]
    fn error_user_message_hides_details() {
        let err = GuardianError::Database("SELECT * FROM community_config".to_string());
        assert_eq!(
            err.user_message(),
            "Database service temporarily unavailable"
        );
        assert!(!err.user_message().contains("community_config"));

        let err = GuardianError::PlatformCallFailed("Missing Permissions (50013)".to_string());
        assert!(!err.user_message().contains("50013"));
    }

    #[test]
    fn error_context_builder() {
        let ctx = ErrorContext::new("isolate")
            .with_user_id(12345)
            .with_guild_id(67890);

        assert_eq!(ctx.operation, "isolate");
        assert_eq!(ctx.user_id, Some(12345));
        assert_eq!(ctx.guild_id, Some(67890));
    }

    #[test]
    fn error_context_generates_request_id() {
        let ctx1 = ErrorContext::new("op1");
        let ctx2 = ErrorContext::new("op2");

        assert_ne!(ctx1.request_id, ctx2.request_id);
        assert!(!ctx1.request_id.is_empty());
    }
}
