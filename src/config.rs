use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_NAME: &str = "JarvisBot";
const DEFAULT_DB_PATH: &str = "data/jarvisbot.db";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_NOTIFY_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_UPLOAD_CHANNEL: &str = "general";
const DEFAULT_API_BASE: &str = "https://slack.com/api";
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// A value could not be interpreted.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Optional on-disk settings. Every field can also come from the environment.
#[derive(Deserialize, Default)]
struct ConfigFile {
    token: Option<String>,
    db_path: Option<String>,
    /// Display name the bot answers to in channels
    name: Option<String>,
    /// Directory for logs and transient uploads
    data_dir: Option<String>,
    notify_addr: Option<String>,
    upload_channel: Option<String>,
    /// Recipient of "someone is waiting" notifications
    default_user: Option<String>,
    welcome_channel: Option<String>,
    log_channel: Option<String>,
    lenient_parsing: Option<bool>,
    api_base: Option<String>,
    reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub db_path: PathBuf,
    pub name: String,
    /// Directory for state files (logs, uploads).
    pub data_dir: PathBuf,
    pub notify_addr: SocketAddr,
    pub upload_channel: String,
    pub default_user: Option<String>,
    /// Channel for the first-run welcome. Falls back to the first channel in the roster.
    pub welcome_channel: Option<String>,
    pub log_channel: Option<String>,
    /// Accept "i am expecting" with leading whitespace and any casing.
    pub lenient_parsing: bool,
    pub api_base: String,
    pub reconnect_delay: Duration,
}

impl Config {
    /// Load from an optional JSON file, then apply `BOT_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(path, |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file = match path {
            Some(path) => {
                let config_path = path.to_path_buf();
                let content = std::fs::read_to_string(&config_path)
                    .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
                serde_json::from_str::<ConfigFile>(&content)
                    .map_err(|e| ConfigError::ParseJson { path: config_path, source: e })?
            }
            None => ConfigFile::default(),
        };

        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup("BOT_API_KEY") {
            file.token = Some(v);
        }
        if let Some(v) = lookup("BOT_DB_PATH") {
            file.db_path = Some(v);
        }
        if let Some(v) = lookup("BOT_NAME") {
            file.name = Some(v);
        }
        if let Some(v) = lookup("BOT_DATA_DIR") {
            file.data_dir = Some(v);
        }
        if let Some(v) = lookup("BOT_NOTIFY_ADDR") {
            file.notify_addr = Some(v);
        }
        if let Some(v) = lookup("BOT_UPLOAD_CHANNEL") {
            file.upload_channel = Some(v);
        }
        if let Some(v) = lookup("BOT_DEFAULT_USER") {
            file.default_user = Some(v);
        }
        if let Some(v) = lookup("BOT_WELCOME_CHANNEL") {
            file.welcome_channel = Some(v);
        }
        if let Some(v) = lookup("BOT_LOG_CHANNEL") {
            file.log_channel = Some(v);
        }
        if let Some(v) = lookup("BOT_LENIENT_PARSING") {
            file.lenient_parsing = Some(parse_bool("BOT_LENIENT_PARSING", &v)?);
        }
        if let Some(v) = lookup("SLACK_API_BASE") {
            file.api_base = Some(v);
        }
        if let Some(v) = lookup("BOT_RECONNECT_DELAY_SECS") {
            let secs = v
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue { key: "BOT_RECONNECT_DELAY_SECS", value: v.clone() })?;
            file.reconnect_delay_secs = Some(secs);
        }

        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let token = file.token.map(|t| t.trim().to_string()).unwrap_or_default();
        if token.is_empty() {
            return Err(ConfigError::Validation("BOT_API_KEY (token) is required".into()));
        }
        // Slack tokens are prefixed xoxb- (bot) or xoxp-/xoxa- (legacy user/app)
        if !token.starts_with("xox") {
            return Err(ConfigError::Validation(
                "token appears invalid (expected a Slack token such as xoxb-...)".into(),
            ));
        }

        let notify_raw = file.notify_addr.unwrap_or_else(|| DEFAULT_NOTIFY_ADDR.to_string());
        let notify_addr = notify_raw
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidValue { key: "notify_addr", value: notify_raw.clone() })?;

        let name = file
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        let upload_channel = file
            .upload_channel
            .map(|c| c.trim().trim_start_matches('#').to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_UPLOAD_CHANNEL.to_string());

        Ok(Self {
            token,
            db_path: PathBuf::from(file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string())),
            name,
            data_dir: PathBuf::from(file.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            notify_addr,
            upload_channel,
            default_user: file.default_user.map(|u| u.trim_start_matches('@').to_string()),
            welcome_channel: file.welcome_channel.map(|c| c.trim_start_matches('#').to_string()),
            log_channel: file.log_channel,
            lenient_parsing: file.lenient_parsing.unwrap_or(false),
            api_base: file
                .api_base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            reconnect_delay: Duration::from_secs(
                file.reconnect_delay_secs.unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
            ),
        })
    }

    /// Directory where artifacts are staged before upload.
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value: value.to_string() }),
    }
}
