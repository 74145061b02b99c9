use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;

use crate::channel::{AesKey, CryptoError};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// `encoding_aes_key` does not decode to an AES-256 key.
    InvalidKey(CryptoError),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidKey(source) => write!(f, "invalid encoding_aes_key: {}", source),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidKey(source) => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Application message API with an access token.
    Push,
    /// Group robot webhooks.
    Webhook,
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Callback token from the admin console.
    token: String,
    /// 43-character EncodingAESKey.
    encoding_aes_key: String,
    #[serde(default)]
    corp_id: String,
    #[serde(default)]
    agent_id: i64,
    #[serde(default)]
    corp_secret: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_week")]
    current_week: i64,
    /// How long before class a reminder goes out.
    #[serde(default = "default_reminder_minutes")]
    reminder_minutes: u32,
    #[serde(default = "default_notify_to")]
    notify_to: String,
    #[serde(default)]
    webhook_urls: Vec<String>,
    sink: Option<SinkKind>,
    course_file: Option<String>,
    timezone: Option<String>,
    /// Directory for state files (logs). Defaults to current directory.
    data_dir: Option<String>,
    salutation: Option<String>,
    #[serde(default = "default_true")]
    announce_on_startup: bool,
    /// Seconds between course file checks (0 = disabled).
    #[serde(default = "default_reload_interval")]
    reload_interval_secs: u64,
    #[serde(default = "default_api_base")]
    api_base: String,
    #[serde(default = "default_http_timeout")]
    http_timeout_secs: u64,
}

fn default_port() -> u16 {
    5000
}

fn default_week() -> i64 {
    1
}

fn default_reminder_minutes() -> u32 {
    30
}

fn default_notify_to() -> String {
    "@all".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reload_interval() -> u64 {
    60
}

fn default_api_base() -> String {
    "https://qyapi.weixin.qq.com".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

const MAX_REMINDER_MINUTES: u32 = 24 * 60;

pub struct Config {
    /// Path to the config file. The week counter is persisted here.
    pub config_path: PathBuf,
    pub token: String,
    pub aes_key: AesKey,
    pub corp_id: String,
    pub agent_id: i64,
    pub corp_secret: String,
    pub port: u16,
    pub current_week: u32,
    pub reminder_minutes: u32,
    /// Recipient of reminders: user ids joined by `|`, or `@all`.
    pub notify_to: String,
    pub webhook_urls: Vec<String>,
    pub sink: SinkKind,
    /// Course list, resolved against the config file's directory.
    pub course_file: PathBuf,
    pub timezone: Tz,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    pub salutation: Option<String>,
    pub announce_on_startup: bool,
    pub reload_interval_secs: u64,
    pub api_base: String,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.token.trim().is_empty() {
            return Err(ConfigError::Validation("token is required".into()));
        }
        let aes_key = AesKey::from_encoding(file.encoding_aes_key.trim()).map_err(ConfigError::InvalidKey)?;

        if file.current_week < 1 || file.current_week > i64::from(u32::MAX) {
            return Err(ConfigError::Validation(format!(
                "current_week must be a positive integer, got {}",
                file.current_week
            )));
        }
        if file.reminder_minutes > MAX_REMINDER_MINUTES {
            return Err(ConfigError::Validation(format!(
                "reminder_minutes must be at most {} (one day), got {}",
                MAX_REMINDER_MINUTES, file.reminder_minutes
            )));
        }
        if file.http_timeout_secs == 0 {
            return Err(ConfigError::Validation("http_timeout_secs must be positive".into()));
        }

        let webhook_urls: Vec<String> = file
            .webhook_urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        // Without an explicit choice, webhooks win only when there are no app credentials.
        let sink = file.sink.unwrap_or(if !webhook_urls.is_empty() && file.corp_id.is_empty() {
            SinkKind::Webhook
        } else {
            SinkKind::Push
        });
        match sink {
            SinkKind::Push if file.corp_id.is_empty() || file.corp_secret.is_empty() => {
                return Err(ConfigError::Validation(
                    "push delivery needs corp_id and corp_secret".into(),
                ));
            }
            SinkKind::Webhook if webhook_urls.is_empty() => {
                return Err(ConfigError::Validation(
                    "webhook delivery needs at least one entry in webhook_urls".into(),
                ));
            }
            _ => {}
        }

        let timezone = match file.timezone.as_deref() {
            None => chrono_tz::Asia::Shanghai,
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", name)))?,
        };

        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let course_file = base_dir.join(file.course_file.as_deref().unwrap_or("courses.json"));

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            token: file.token,
            aes_key,
            corp_id: file.corp_id,
            agent_id: file.agent_id,
            corp_secret: file.corp_secret,
            port: file.port,
            current_week: file.current_week as u32,
            reminder_minutes: file.reminder_minutes,
            notify_to: file.notify_to,
            webhook_urls,
            sink,
            course_file,
            timezone,
            data_dir,
            salutation: file.salutation.filter(|s| !s.trim().is_empty()),
            announce_on_startup: file.announce_on_startup,
            reload_interval_secs: file.reload_interval_secs,
            api_base: file.api_base,
            http_timeout_secs: file.http_timeout_secs,
        })
    }
}
