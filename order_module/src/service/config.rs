use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::adapters::DiscordSettings;
use crate::mailbox::{ImapConfig, MailFilter};
use crate::workflow::{Assignee, EngineConfig};

use super::BoxError;

pub const DEFAULT_STATUS_CHANNEL: &str = "admin-status-monitor";
pub const DEFAULT_LEDGER_DIR: &str = ".order_orchestrator/ledger";
const DEFAULT_IMAP_HOST: &str = "imap.mail.yahoo.com";
const DEFAULT_MAIL_SENDER: &str = "no-reply@itemku.com";
const DEFAULT_MAIL_SUBJECT: &str = "Dagangan Kamu Dibeli!";
const CONFIG_FILE_NAME: &str = "orchestrator.toml";

/// Optional `orchestrator.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct OrchestratorConfigFile {
    pub status_channel: Option<String>,
    #[serde(default)]
    pub fallback_assignees: Vec<FallbackAssigneeConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FallbackAssigneeConfig {
    pub id: String,
    pub label: Option<String>,
}

#[derive(Clone)]
pub struct ServiceConfig {
    pub discord_bot_token: String,
    pub discord_guild_id: u64,
    /// Shared channel where new orders are announced.
    pub orders_channel_id: u64,
    pub status_channel_name: String,
    pub imap: ImapConfig,
    pub mail_filter: MailFilter,
    pub poll_interval: Duration,
    pub recency_window: chrono::Duration,
    pub ledger_root: PathBuf,
    pub display_offset: FixedOffset,
    pub completed_retention: chrono::Duration,
    pub fallback_assignees: Vec<Assignee>,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("discord_bot_token", &"***")
            .field("discord_guild_id", &self.discord_guild_id)
            .field("orders_channel_id", &self.orders_channel_id)
            .field("status_channel_name", &self.status_channel_name)
            .field("imap", &self.imap)
            .field("mail_filter", &self.mail_filter)
            .field("poll_interval", &self.poll_interval)
            .field("recency_window", &self.recency_window)
            .field("ledger_root", &self.ledger_root)
            .field("display_offset", &self.display_offset)
            .field("completed_retention", &self.completed_retention)
            .field("fallback_assignees", &self.fallback_assignees)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let config_file = match resolve_config_path()? {
            Some(path) => load_config_file(&path)?,
            None => OrchestratorConfigFile::default(),
        };

        let discord_bot_token = required(&["DISCORD_BOT_TOKEN"])?;
        let discord_guild_id = required_id("DISCORD_GUILD_ID")?;
        let orders_channel_id = required_id("DISCORD_CHANNEL_ID")?;
        let status_channel_name = config_file
            .status_channel
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_STATUS_CHANNEL)
            .to_string();

        let imap = ImapConfig {
            host: first_non_empty(&["IMAP_HOST", "YAHOO_IMAP_HOST"])
                .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            port: first_non_empty(&["IMAP_PORT", "YAHOO_IMAP_PORT"])
                .and_then(|value| value.parse::<u16>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(993),
            username: required(&["IMAP_USER", "YAHOO_EMAIL"])?,
            password: required(&["IMAP_PASSWORD", "YAHOO_PASSWORD"])?,
            folder: env_var_non_empty("IMAP_FOLDER").unwrap_or_else(|| "INBOX".to_string()),
        };
        let mail_filter = MailFilter::new(
            env_var_non_empty("MAIL_SENDER").unwrap_or_else(|| DEFAULT_MAIL_SENDER.to_string()),
            env_var_non_empty("MAIL_SUBJECT").unwrap_or_else(|| DEFAULT_MAIL_SUBJECT.to_string()),
        );

        let poll_interval = env_var_non_empty("POLL_INTERVAL_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .or_else(|| {
                env_var_non_empty("CHECK_INTERVAL")
                    .and_then(|value| value.parse::<u64>().ok())
                    .filter(|value| *value >= 1000)
                    .map(Duration::from_millis)
            })
            .unwrap_or_else(|| Duration::from_secs(30));
        let recency_window = positive_hours("RECENCY_WINDOW_HOURS", 24);
        let completed_retention = positive_hours("COMPLETED_RETENTION_HOURS", 24);
        let display_offset = env_var_non_empty("DISPLAY_UTC_OFFSET_HOURS")
            .and_then(|value| value.parse::<i32>().ok())
            .filter(|hours| (-12..=14).contains(hours))
            .and_then(|hours| FixedOffset::east_opt(hours * 3600))
            .or_else(|| FixedOffset::east_opt(7 * 3600))
            .ok_or("invalid display offset")?;

        let ledger_root = match env_var_non_empty("LEDGER_ROOT") {
            Some(raw) => resolve_path(raw)?,
            None => default_ledger_root()?,
        };

        let fallback_assignees = if config_file.fallback_assignees.is_empty() {
            EngineConfig::default().fallback_assignees
        } else {
            config_file
                .fallback_assignees
                .iter()
                .filter(|fallback| !fallback.id.trim().is_empty())
                .map(|fallback| {
                    let id = fallback.id.trim();
                    let label = fallback
                        .label
                        .as_deref()
                        .map(str::trim)
                        .filter(|label| !label.is_empty())
                        .unwrap_or(id);
                    Assignee::new(id, label)
                })
                .collect()
        };

        Ok(Self {
            discord_bot_token,
            discord_guild_id,
            orders_channel_id,
            status_channel_name,
            imap,
            mail_filter,
            poll_interval,
            recency_window,
            ledger_root,
            display_offset,
            completed_retention,
            fallback_assignees,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fallback_assignees: self.fallback_assignees.clone(),
            completed_retention: self.completed_retention,
            display_offset: self.display_offset,
        }
    }

    pub fn discord_settings(&self) -> DiscordSettings {
        DiscordSettings {
            guild_id: self.discord_guild_id,
            orders_channel_id: self.orders_channel_id,
            status_channel_name: self.status_channel_name.clone(),
            display_offset: self.display_offset,
        }
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn first_non_empty(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env_var_non_empty(key))
}

fn required(keys: &[&str]) -> Result<String, BoxError> {
    first_non_empty(keys).ok_or_else(|| format!("{} is not set", keys.join(" or ")).into())
}

fn required_id(key: &str) -> Result<u64, BoxError> {
    let raw = required(&[key])?;
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| format!("{} must be a Discord snowflake id, got {:?}", key, raw).into())
}

fn positive_hours(key: &str, default: i64) -> chrono::Duration {
    env_var_non_empty(key)
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|hours| *hours > 0)
        .and_then(chrono::Duration::try_hours)
        .unwrap_or_else(|| chrono::Duration::hours(default))
}

fn resolve_config_path() -> Result<Option<PathBuf>, io::Error> {
    if let Some(path) = env_var_non_empty("ORCHESTRATOR_CONFIG_PATH") {
        return Ok(Some(PathBuf::from(path)));
    }
    let direct = env::current_dir()?.join(CONFIG_FILE_NAME);
    Ok(direct.exists().then_some(direct))
}

fn load_config_file(path: &Path) -> Result<OrchestratorConfigFile, BoxError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;
    toml::from_str::<OrchestratorConfigFile>(&content)
        .map_err(|err| format!("failed to parse {}: {}", path.display(), err).into())
}

fn default_ledger_root() -> Result<PathBuf, io::Error> {
    let home = dirs::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))?;
    Ok(home.join(DEFAULT_LEDGER_DIR))
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}
