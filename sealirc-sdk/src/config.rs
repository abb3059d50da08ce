//! Server connection records.
//!
//! A [`ServerConfig`] is what the record store keeps per configured network
//! and what a connection is started from. It is validated before any
//! connection attempt so a bad record never reaches the state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 6667;
pub const DEFAULT_TLS_PORT: u16 = 6697;

/// Wait after the transport comes up before sending registration.
pub const REGISTRATION_SETTLE: Duration = Duration::from_millis(100);
/// Auto-join fallback when the server never finishes its MOTD.
pub const MOTD_FALLBACK: Duration = Duration::from_secs(10);
/// Delay before the first auto-join.
pub const AUTO_JOIN_BASE_DELAY: Duration = Duration::from_millis(500);
/// Extra delay between consecutive auto-joins.
pub const AUTO_JOIN_STAGGER: Duration = Duration::from_millis(300);
/// Time the transport gets to flush `QUIT` before it is closed.
pub const QUIT_GRACE: Duration = Duration::from_millis(500);

/// One configured IRC network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Row id in the record store (`None` until saved).
    #[serde(default)]
    pub id: Option<i64>,
    /// Display name chosen by the user.
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    pub nickname: String,
    /// Nick to fall back to when `nickname` is in use.
    #[serde(default)]
    pub alt_nickname: Option<String>,
    pub username: String,
    pub realname: String,
    /// Comma-separated channel list joined after registration.
    #[serde(default)]
    pub auto_join_channels: String,
    #[serde(default = "default_encoding")]
    pub default_encoding: String,
    #[serde(default)]
    pub auto_connect: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_encoding() -> String {
    "UTF-8".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: "localhost".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            tls: false,
            nickname: "user".to_string(),
            alt_nickname: Some("user_".to_string()),
            username: "user".to_string(),
            realname: "SealIRC User".to_string(),
            auto_join_channels: String::new(),
            default_encoding: default_encoding(),
            auto_connect: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server name is required")]
    MissingName,
    #[error("hostname is required")]
    MissingHostname,
    #[error("port must be non-zero")]
    InvalidPort,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} may not contain spaces: {value:?}")]
    Whitespace { field: &'static str, value: String },
}

impl ServerConfig {
    /// Reject records that can't be used to register on a server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::MissingHostname);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        for (field, value) in [("nickname", &self.nickname), ("username", &self.username)] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
            if value.contains(char::is_whitespace) {
                return Err(ConfigError::Whitespace {
                    field,
                    value: value.clone(),
                });
            }
        }
        if let Some(alt) = &self.alt_nickname {
            if alt.contains(char::is_whitespace) {
                return Err(ConfigError::Whitespace {
                    field: "alt_nickname",
                    value: alt.clone(),
                });
            }
        }
        if self.realname.trim().is_empty() {
            return Err(ConfigError::MissingField("realname"));
        }
        Ok(())
    }

    /// `host:port` for the TCP connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Identity used for key derivation (see [`crate::crypto::canonical_server_id`]).
    pub fn canonical_id(&self) -> &str {
        crate::crypto::canonical_server_id(&self.name, Some(&self.hostname))
    }

    /// Alternate nick, or the configured nick with `_` appended.
    pub fn alt_nick(&self) -> String {
        match &self.alt_nickname {
            Some(alt) if !alt.trim().is_empty() => alt.clone(),
            _ => format!("{}_", self.nickname),
        }
    }

    /// Auto-join list, trimmed and normalized to channel names.
    pub fn auto_join(&self) -> Vec<String> {
        self.auto_join_channels
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(normalize_channel)
            .collect()
    }
}

/// Prefix `#` when a channel name has no channel sigil.
pub fn normalize_channel(channel: &str) -> String {
    let channel = channel.trim();
    if channel.starts_with('#') {
        channel.to_string()
    } else {
        format!("#{channel}")
    }
}

/// Whether a target names a channel rather than a nick.
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}
