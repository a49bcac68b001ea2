//! Persisted user settings.
//!
//! One pretty-printed JSON file in the data directory. A missing or
//! unreadable file yields defaults so a fresh install starts cleanly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::SettingsError;
use crate::protocol::DEFAULT_PORT;

/// Seconds between discovery broadcasts.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 20;

/// Seconds of silence after which a peer counts as offline.
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 70;

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Keys accepted by [`Settings::set`].
pub const SETTING_KEYS: [&str; 4] = ["displayName", "port", "heartbeatInterval", "staleThreshold"];

const FALLBACK_NAME: &str = "User";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub display_name: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub stale_threshold_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            port: DEFAULT_PORT,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            stale_threshold_secs: DEFAULT_STALE_THRESHOLD_SECS,
        }
    }
}

/// The machine's host name, or a generic name if it has none.
pub fn default_display_name() -> String {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

fn invalid(key: &str, message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Settings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.display_name.trim().is_empty() {
            return Err(invalid("displayName", "name cannot be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port", "port must be between 1 and 65535"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(invalid("heartbeatInterval", "must be at least 1 second"));
        }
        if self.stale_threshold_secs <= self.heartbeat_interval_secs {
            return Err(invalid(
                "staleThreshold",
                format!(
                    "must be longer than the heartbeat interval ({}s)",
                    self.heartbeat_interval_secs
                ),
            ));
        }
        Ok(())
    }

    /// Set one value from its textual form. The result is validated as a whole.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut updated = self.clone();

        match key {
            "displayName" | "name" => updated.display_name = value.trim().to_string(),
            "port" => {
                updated.port = value
                    .parse()
                    .map_err(|_| invalid("port", format!("'{}' is not a port number", value)))?;
            }
            "heartbeatInterval" => {
                updated.heartbeat_interval_secs = parse_secs(key, value)?;
            }
            "staleThreshold" => {
                updated.stale_threshold_secs = parse_secs(key, value)?;
            }
            other => {
                return Err(invalid(
                    other,
                    format!("unknown setting, expected one of: {}", SETTING_KEYS.join(", ")),
                ))
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, SettingsError> {
    value
        .parse()
        .map_err(|_| invalid(key, format!("'{}' is not a number of seconds", value)))
}

/// File-backed settings.
///
/// Takes a directory in the constructor so tests and front-ends can choose
/// where the file lives.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: PathBuf) -> Result<Self, SettingsError> {
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            path: dir.join(SETTINGS_FILE_NAME),
        })
    }

    /// Store in the platform data directory.
    pub fn open_default() -> Result<Self, SettingsError> {
        let dir = super::default_data_dir().ok_or(SettingsError::NoDataDirectory)?;
        Self::new(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults when the file is missing,
    /// unparsable or invalid.
    pub async fn load(&self) -> Settings {
        match self.try_load().await {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(e) => {
                log::warn!(
                    "Ignoring settings file {}: {}",
                    self.path.display(),
                    e
                );
                Settings::default()
            }
        }
    }

    async fn try_load(&self) -> Result<Option<Settings>, SettingsError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).await?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;

        Ok(Some(settings))
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        settings.validate()?;

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content).await?;

        log::debug!("Saved settings to {}", self.path.display());
        Ok(())
    }

    /// Delete the file and return the defaults.
    pub async fn reset(&self) -> Result<Settings, SettingsError> {
        if self.path.exists() {
            fs::remove_file(&self.path).await?;
        }
        Ok(Settings::default())
    }
}
