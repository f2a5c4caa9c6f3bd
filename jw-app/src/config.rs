//! Jabberwock configuration loader.

use jw_chat::{CannedReplies, SessionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub account: AccountConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub contacts: ContactsConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub keepalive: KeepAliveConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account id, usually `<user_id>@<host>`.
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Session resource. Some services skip room history replay for the
    /// "bot" resource.
    #[serde(default = "default_resource")]
    pub resource: String,
}

fn default_port() -> u16 {
    5222
}

fn default_resource() -> String {
    "bot".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomsConfig {
    /// Conference (multi-user chat) domain, e.g. `conf.chat.example.com`.
    #[serde(default)]
    pub domain: String,
    /// Nickname used when joining rooms.
    #[serde(default)]
    pub nickname: String,
    /// Leading token a room message must carry to be treated as a command.
    #[serde(default)]
    pub wake_word: String,
    /// Room ids without the conference domain, e.g. `1234_ops`.
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactsConfig {
    #[serde(default)]
    pub ids: Vec<String>,
    /// Direct chats are inherently addressed to the bot; opt in to the
    /// wake-word filter per deployment if needed.
    #[serde(default)]
    pub require_wake_word: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_msg_missing_arguments")]
    pub missing_arguments: String,
    #[serde(default = "default_msg_invalid_request")]
    pub invalid_request: String,
    #[serde(default = "default_msg_error")]
    pub error: String,
    #[serde(default = "default_msg_fatal")]
    pub fatal: String,
}

fn default_msg_missing_arguments() -> String {
    CannedReplies::default().missing_arguments
}

fn default_msg_invalid_request() -> String {
    CannedReplies::default().invalid_request
}

fn default_msg_error() -> String {
    CannedReplies::default().error
}

fn default_msg_fatal() -> String {
    CannedReplies::default().fatal
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            missing_arguments: default_msg_missing_arguments(),
            invalid_request: default_msg_invalid_request(),
            error: default_msg_error(),
            fatal: default_msg_fatal(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepAliveConfig {
    #[serde(default = "default_keepalive_enabled")]
    pub enabled: bool,
    #[serde(default = "default_keepalive_schedule")]
    pub schedule: String,
}

fn default_keepalive_enabled() -> bool {
    true
}

fn default_keepalive_schedule() -> String {
    jw_chat::DEFAULT_KEEPALIVE_SCHEDULE.to_string()
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: default_keepalive_enabled(),
            schedule: default_keepalive_schedule(),
        }
    }
}

impl BridgeConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
        let cfg = Self::from_toml(&contents)
            .map_err(|e| anyhow::anyhow!("config {}: {e}", path.display()))?;
        Ok((cfg, path))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let mut cfg: BridgeConfig =
            toml::from_str(contents).map_err(|e| anyhow::anyhow!("parse config: {e}"))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("JABBERWOCK_HOST") {
            if !v.trim().is_empty() {
                self.account.host = v;
            }
        }
        if let Ok(v) = std::env::var("JABBERWOCK_USER") {
            if !v.trim().is_empty() {
                self.account.user = v;
            }
        }
        if let Ok(v) = std::env::var("JABBERWOCK_PASSWORD") {
            if !v.trim().is_empty() {
                self.account.password = v;
            }
        }
        if let Ok(v) = std::env::var("JABBERWOCK_WAKE_WORD") {
            if !v.trim().is_empty() {
                self.rooms.wake_word = v;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.account.host.trim().is_empty() {
            return Err(anyhow::anyhow!("account.host is required"));
        }
        if self.account.user.trim().is_empty() {
            return Err(anyhow::anyhow!("account.user is required"));
        }
        if !self.account.user.contains('@') {
            tracing::warn!(
                user = %self.account.user,
                host = %self.account.host,
                "account.user has no host part; ids usually look like <user_id>@<host>"
            );
        }
        if !self.rooms.ids.is_empty() {
            if self.rooms.domain.trim().is_empty() {
                return Err(anyhow::anyhow!("rooms.domain is required when rooms are configured"));
            }
            if self.rooms.nickname.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "rooms.nickname is required when rooms are configured"
                ));
            }
            if self.rooms.wake_word.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "rooms.wake_word is required when rooms are configured"
                ));
            }
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.account.host.clone(),
            port: self.account.port,
            user: self.account.user.clone(),
            nickname: self.rooms.nickname.clone(),
            conference_domain: self.rooms.domain.clone(),
        }
    }

    pub fn canned_replies(&self) -> CannedReplies {
        CannedReplies {
            missing_arguments: self.messages.missing_arguments.clone(),
            invalid_request: self.messages.invalid_request.clone(),
            error: self.messages.error.clone(),
            fatal: self.messages.fatal.clone(),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".jabberwock").join("config.toml")
}
