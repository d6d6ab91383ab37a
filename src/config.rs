use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub stream: Option<StreamConfig>,
    #[serde(default)]
    pub notifications: Option<NotificationsConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct StreamConfig {
    pub table: Option<String>,
    pub base_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_reconnect_attempts: Option<usize>,
    pub degraded_probe_secs: Option<u64>,
}

impl StreamConfig {
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or("wash_requests")
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms.unwrap_or(500))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.unwrap_or(30_000))
    }

    pub fn max_reconnect_attempts(&self) -> usize {
        self.max_reconnect_attempts.unwrap_or(5)
    }

    pub fn degraded_probe_interval(&self) -> Duration {
        Duration::from_secs(self.degraded_probe_secs.unwrap_or(60))
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct NotificationsConfig {
    pub dispatch_log_capacity: Option<usize>,
}

impl NotificationsConfig {
    pub fn dispatch_log_capacity(&self) -> usize {
        self.dispatch_log_capacity.unwrap_or(200)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl LoggingConfig {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads `path`, or the per-user default location when `path` is `None`.
    /// A missing default file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text),
            Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn stream(&self) -> StreamConfig {
        self.stream.clone().unwrap_or_default()
    }

    pub fn notifications(&self) -> NotificationsConfig {
        self.notifications.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("washalert").join("config.toml"))
}
