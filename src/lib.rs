//! Guardian: anti-raid protection for Discord servers.
//!
//! Watches destructive moderation events (channel and role deletions,
//! kicks, bans, bot additions), attributes each one to an actor through the
//! audit log, and responds when an actor exceeds a per-server rate
//! threshold by isolating or removing them and alerting the server's
//! alert targets.

pub mod alerts;
pub mod backup;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod database;
pub mod detector;
pub mod discord;
pub mod error;
pub mod escalation;
pub mod guard;
pub mod health;
pub mod lanes;
pub mod lockdown;
pub mod models;
pub mod platform;
pub mod store;

#[cfg(test)]
mod test_support;
